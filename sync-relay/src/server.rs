//! Relay server.
//!
//! Accepts plaintext relay requests, opens a leg to the requested device
//! and forwards bytes. Each accepted connection runs its own task through
//! two states:
//!
//! ```text
//! AwaitingRequest ──RELAY <id>──► lookup ──► connect ──OK──► Forwarding
//!        │                          │           │
//!    malformed                   unknown      failed
//!        ▼                          ▼           ▼
//!      close             DEVICE UNKNOWN    CONNECTION FAILED
//! ```

use crate::config::RelayConfig;
use crate::error::{ProtocolError, ProtocolResult, RelayError, Result};
use crate::limits::RelayLimits;
use crate::protocol::{RelayRequest, RelayResponse, MAX_REQUEST_LEN};
use crate::session::RelaySession;
use socket2::SockRef;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Live connection bookkeeping the relay consults.
///
/// The relay can only reach devices this node is itself connected to, at
/// the address that connection was made on.
pub trait PeerDirectory: Send + Sync {
    /// Address of the live connection to the device with this textual id.
    fn connected_address(&self, device_id: &str) -> Option<SocketAddr>;
}

impl PeerDirectory for HashMap<String, SocketAddr> {
    fn connected_address(&self, device_id: &str) -> Option<SocketAddr> {
        self.get(device_id).copied()
    }
}

/// How long a connection may take to send its relay request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How often idle per-IP rate limiter entries are evicted.
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// Operational counters for the relay.
///
/// All counters except `active_sessions` only grow (reset on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Connections accepted on the relay port.
    pub connections_total: AtomicU64,
    /// Connections refused by admission limits.
    pub rate_limit_hits: AtomicU64,
    /// Malformed or truncated requests.
    pub protocol_errors: AtomicU64,
    /// Requests answered `DEVICE UNKNOWN`.
    pub unknown_devices: AtomicU64,
    /// Requests answered `CONNECTION FAILED`.
    pub connection_failures: AtomicU64,
    /// Sessions that reached forwarding.
    pub sessions_total: AtomicU64,
    /// Sessions currently forwarding.
    pub active_sessions: AtomicU64,
    /// Bytes forwarded in both directions by finished sessions.
    pub bytes_forwarded: AtomicU64,
}

/// Relay server.
pub struct RelayServer {
    config: RelayConfig,
    directory: Arc<dyn PeerDirectory>,
    limits: RelayLimits,
    metrics: RelayMetrics,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("config", &self.config)
            .field("limits", &self.limits)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl RelayServer {
    /// Create a relay server over the given connection bookkeeping.
    pub fn new(config: RelayConfig, directory: Arc<dyn PeerDirectory>) -> Self {
        let limits = RelayLimits::new(&config);
        Self {
            config,
            directory,
            limits,
            metrics: RelayMetrics::default(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Bind the configured relay address.
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(|source| RelayError::Bind {
                address: self.config.bind_address.clone(),
                source,
            })
    }

    /// Accept relay connections forever, one task per connection.
    ///
    /// Accept errors are logged and the loop continues.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => tracing::info!("Relay server listening on {}", addr),
            Err(e) => tracing::info!("Relay server listening (address unavailable: {})", e),
        }

        let limits = self.limits.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(LIMITER_PRUNE_INTERVAL);
            loop {
                timer.tick().await;
                limits.shrink();
            }
        });

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Unable to accept relay connection: {}", e);
                    continue;
                }
            };

            self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);

            if let Err(e) = self.limits.check_request(peer.ip()) {
                tracing::warn!("Relay connection from {} refused: {}", peer, e);
                self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            tracing::debug!("Received relay connection from {}", peer);
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, peer).await;
            });
        }
    }

    /// Run one relay connection to completion.
    ///
    /// A session slot is only taken once a well-formed request has arrived,
    /// and is held until the session ends.
    pub async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        let request = match timeout(REQUEST_TIMEOUT, read_request(&mut stream)).await {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => {
                tracing::info!("Invalid relay request from {}: {}", peer, e);
                self.metrics.protocol_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(_) => {
                tracing::info!("Relay request from {}: {}", peer, ProtocolError::TimedOut);
                self.metrics.protocol_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let _permit = match self.limits.try_open_session() {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!("Relay request from {} refused: {}", peer, e);
                self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let Some(target_addr) = self.directory.connected_address(request.device_id()) else {
            tracing::info!(
                "Relay request from {} for {}: device unknown in local table",
                peer,
                request.device_id()
            );
            self.metrics.unknown_devices.fetch_add(1, Ordering::Relaxed);
            let _ = reply(&mut stream, &RelayResponse::DeviceUnknown).await;
            return;
        };

        tracing::info!(
            "Relay request from {} for {} at {}",
            peer,
            request.device_id(),
            target_addr
        );

        let target = match TcpStream::connect(target_addr).await {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!("Unable to open relay leg to {}: {}", target_addr, e);
                self.metrics.connection_failures.fetch_add(1, Ordering::Relaxed);
                let _ = reply(&mut stream, &RelayResponse::ConnectionFailed).await;
                return;
            }
        };

        if let Err(e) = reply(&mut stream, &RelayResponse::Ok).await {
            tracing::debug!("Relay requester {} went away before OK: {}", peer, e);
            return;
        }

        if let Err(e) = SockRef::from(&target).set_keepalive(true) {
            tracing::debug!("Failed to enable keep-alive on relay leg: {}", e);
        }

        self.metrics.sessions_total.fetch_add(1, Ordering::Relaxed);
        self.metrics.active_sessions.fetch_add(1, Ordering::Relaxed);

        let stats = RelaySession::new(stream, target, request.device_id()).run().await;

        self.metrics.active_sessions.fetch_sub(1, Ordering::Relaxed);
        self.metrics
            .bytes_forwarded
            .fetch_add(stats.total(), Ordering::Relaxed);
    }
}

/// Read until the received bytes form a complete relay request.
async fn read_request(stream: &mut TcpStream) -> ProtocolResult<RelayRequest> {
    let mut buf = Vec::with_capacity(MAX_REQUEST_LEN);
    let mut chunk = [0u8; MAX_REQUEST_LEN];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(request) = RelayRequest::parse(&buf)? {
            return Ok(request);
        }
    }
}

async fn reply(stream: &mut TcpStream, response: &RelayResponse) -> std::io::Result<()> {
    stream.write_all(&response.as_bytes()).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn start_relay(directory: HashMap<String, SocketAddr>) -> (Arc<RelayServer>, SocketAddr) {
        let config = RelayConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..RelayConfig::default()
        };
        let server = Arc::new(RelayServer::new(config, Arc::new(directory)));
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.clone().serve(listener));
        (server, addr)
    }

    async fn read_line(stream: &mut TcpStream) -> Vec<u8> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while !line.ends_with(b"\r\n") {
            stream.read_exact(&mut byte).await.unwrap();
            line.push(byte[0]);
        }
        line
    }

    #[tokio::test]
    async fn relays_bytes_to_known_device() {
        let target_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target_listener.local_addr().unwrap();
        let directory = HashMap::from([("ABC123".to_string(), target_addr)]);
        let (server, relay_addr) = start_relay(directory).await;

        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(b"RELAY ABC123").await.unwrap();
        assert_eq!(read_line(&mut client).await, b"OK\r\n");

        let (mut target, _) = target_listener.accept().await.unwrap();

        client.write_all(b"first ").await.unwrap();
        client.write_all(b"second").await.unwrap();
        let mut buf = [0u8; 12];
        target.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"first second");

        target.write_all(b"reply").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"reply");

        assert_eq!(server.metrics().sessions_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unknown_device_gets_exact_reply_and_close() {
        let (server, relay_addr) = start_relay(HashMap::new()).await;

        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(b"RELAY XYZ999").await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"DEVICE UNKNOWN\r\n");
        assert_eq!(server.metrics().unknown_devices.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unreachable_target_gets_connection_failed() {
        // Bind then drop to get a port nobody listens on.
        let closed_addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let directory = HashMap::from([("DEAD-BEEF".to_string(), closed_addr)]);
        let (_server, relay_addr) = start_relay(directory).await;

        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(b"RELAY DEAD-BEEF").await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"CONNECTION FAILED\r\n");
    }

    #[tokio::test]
    async fn malformed_request_is_closed_without_reply() {
        let (server, relay_addr) = start_relay(HashMap::new()).await;

        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(b"RELAY lower-case").await.unwrap();

        let mut reply = Vec::new();
        let _ = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut reply))
            .await
            .expect("server should close the connection");
        assert!(reply.is_empty());
        assert_eq!(server.metrics().protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn request_split_across_writes_is_reassembled() {
        let target_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let directory = HashMap::from([(
            "ABC123".to_string(),
            target_listener.local_addr().unwrap(),
        )]);
        let (_server, relay_addr) = start_relay(directory).await;

        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(b"REL").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"AY ABC123\r\n").await.unwrap();

        assert_eq!(read_line(&mut client).await, b"OK\r\n");
    }

    #[tokio::test]
    async fn line_ending_split_across_writes_is_reassembled() {
        let target_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let directory = HashMap::from([(
            "ABC123".to_string(),
            target_listener.local_addr().unwrap(),
        )]);
        let (server, relay_addr) = start_relay(directory).await;

        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(b"RELAY ABC123\r").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"\n").await.unwrap();

        assert_eq!(read_line(&mut client).await, b"OK\r\n");
        assert_eq!(server.metrics().protocol_errors.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn idle_connections_do_not_hold_session_slots() {
        let target_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let directory = HashMap::from([(
            "ABC123".to_string(),
            target_listener.local_addr().unwrap(),
        )]);
        let config = RelayConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_concurrent_sessions: 2,
            ..RelayConfig::default()
        };
        let server = Arc::new(RelayServer::new(config, Arc::new(directory)));
        let listener = server.bind().await.unwrap();
        let relay_addr = listener.local_addr().unwrap();
        tokio::spawn(server.clone().serve(listener));

        // Connected but silent.
        let _idle_a = TcpStream::connect(relay_addr).await.unwrap();
        let _idle_b = TcpStream::connect(relay_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(b"RELAY ABC123\r\n").await.unwrap();
        let line = tokio::time::timeout(Duration::from_secs(5), read_line(&mut client))
            .await
            .expect("relay should answer while idle connections are open");
        assert_eq!(line, b"OK\r\n");
        assert_eq!(server.metrics().rate_limit_hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn hashmap_directory_lookup() {
        let addr: SocketAddr = "10.0.0.9:22000".parse().unwrap();
        let directory = HashMap::from([("ABC123".to_string(), addr)]);
        assert_eq!(directory.connected_address("ABC123"), Some(addr));
        assert_eq!(directory.connected_address("XYZ999"), None);
    }
}
