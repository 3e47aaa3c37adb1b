//! Outbound connections.
//!
//! One loop sweeps every configured device that is not connected, tries
//! each candidate address in order, and falls back to relaying through a
//! connected device when a direct connection fails. Every handshaken
//! connection goes to the supervisor; the dialer never admits anything
//! itself.
//!
//! The delay between sweeps is shared by all devices. It starts at one
//! second, doubles after every sweep, is capped at the reconnect interval,
//! and is never reset while the process runs.

use crate::config::{AddressSpec, DeviceConfig};
use crate::connection::RawConnection;
use crate::context::NodeContext;
use crate::relay::connect_via_relay;
use crate::socket::tune_socket;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use sync_relay::RelayClient;
use sync_types::DeviceId;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Delay before the second sweep.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Shared inter-sweep delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    /// A backoff starting at `initial`, never exceeding `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
        }
    }

    /// Delay to sleep now; doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

/// Complete an address with the default port where it has none.
///
/// `host` and `host:` get `default_port`; `host:port` is returned as is.
/// Bare IPv6 addresses are bracketed.
pub fn normalize_address(addr: &str, default_port: u16) -> String {
    if let Some(rest) = addr.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, "")) | Some((host, ":")) => format!("[{}]:{}", host, default_port),
            _ => addr.to_string(),
        };
    }

    match addr.split_once(':') {
        None => format!("{}:{}", addr, default_port),
        Some((host, "")) => format!("{}:{}", host, default_port),
        Some((_, port)) if !port.contains(':') => addr.to_string(),
        Some(_) => match addr.parse::<Ipv6Addr>() {
            Ok(ip) => SocketAddr::new(ip.into(), default_port).to_string(),
            Err(_) => addr.to_string(),
        },
    }
}

/// The dial loop.
#[derive(Debug)]
pub struct Dialer {
    ctx: Arc<NodeContext>,
    out: mpsc::Sender<RawConnection>,
    relay: RelayClient,
    backoff: Backoff,
}

impl Dialer {
    /// Create a dialer feeding `out`.
    pub fn new(ctx: Arc<NodeContext>, out: mpsc::Sender<RawConnection>) -> Self {
        let backoff = Backoff::new(INITIAL_BACKOFF, ctx.config.node.reconnect_interval());
        Self {
            ctx,
            out,
            relay: RelayClient::new(),
            backoff,
        }
    }

    /// Use a non-standard relay port when falling back to relaying.
    pub fn with_relay_client(mut self, relay: RelayClient) -> Self {
        self.relay = relay;
        self
    }

    /// Sweep forever, sleeping the shared backoff between sweeps.
    ///
    /// Returns only when the supervisor is gone.
    pub async fn run(mut self) {
        loop {
            if !self.dial_round().await {
                tracing::debug!("Dialer stopped: supervisor gone");
                return;
            }
            let delay = self.backoff.next_delay();
            tracing::trace!("Next dial round in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// One sweep over the configured devices.
    ///
    /// Returns false when the supervisor channel is closed.
    pub async fn dial_round(&self) -> bool {
        for device in &self.ctx.config.devices {
            if device.id == self.ctx.my_id || self.ctx.connections.is_connected(&device.id) {
                continue;
            }

            for addr in self.candidate_addresses(device).await {
                let Some(conn) = self.dial(&device.id, &addr).await else {
                    continue;
                };
                if self.out.send(conn).await.is_err() {
                    return false;
                }
                break;
            }
        }
        true
    }

    /// Literal addresses and discovery results, in configured order.
    async fn candidate_addresses(&self, device: &DeviceConfig) -> Vec<String> {
        let mut candidates = Vec::new();
        for spec in &device.addresses {
            match spec {
                AddressSpec::Literal(addr) => candidates.push(addr.clone()),
                AddressSpec::Dynamic => {
                    if let Some(discovery) = &self.ctx.discovery {
                        candidates.extend(discovery.lookup(&device.id).await);
                    }
                }
            }
        }
        candidates
    }

    /// Direct connection, then relay fallback, then handshake.
    async fn dial(&self, device: &DeviceId, addr: &str) -> Option<RawConnection> {
        let addr = normalize_address(addr, self.ctx.config.node.default_port);

        let resolved = match tokio::net::lookup_host(&addr).await {
            Ok(mut addrs) => addrs.next(),
            Err(e) => {
                tracing::info!("Failed to resolve {}: {}", addr, e);
                return None;
            }
        }?;

        let stream = match TcpStream::connect(resolved).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::info!("Failed to connect to {} at {}: {}", device, addr, e);
                self.dial_via_relay(device).await?
            }
        };

        tune_socket(&stream);
        match self.ctx.tls.connect(stream).await {
            Ok(conn) => Some(conn),
            Err(e) => {
                tracing::info!("TLS handshake with {} at {} failed: {}", device, addr, e);
                None
            }
        }
    }

    /// First connected device whose relay service opens a path to `target`.
    async fn dial_via_relay(&self, target: &DeviceId) -> Option<TcpStream> {
        for relay in self.ctx.connections.connected_devices() {
            match connect_via_relay(&self.ctx, &self.relay, &relay, target).await {
                Ok(stream) => {
                    tracing::info!("Relaying to {} through {}", target, relay);
                    return Some(stream);
                }
                Err(e) => tracing::debug!("Relay through {} to {} failed: {}", relay, target, e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30, 30]);
    }

    #[test]
    fn backoff_initial_respects_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn normalize_bare_host_gets_default_port() {
        assert_eq!(normalize_address("10.0.0.5", 22000), "10.0.0.5:22000");
        assert_eq!(normalize_address("example.com", 22000), "example.com:22000");
    }

    #[test]
    fn normalize_empty_port_gets_default_port() {
        assert_eq!(normalize_address("10.0.0.5:", 22000), "10.0.0.5:22000");
    }

    #[test]
    fn normalize_keeps_explicit_port() {
        assert_eq!(normalize_address("10.0.0.5:9999", 22000), "10.0.0.5:9999");
        assert_eq!(normalize_address("[::1]:9999", 22000), "[::1]:9999");
    }

    #[test]
    fn normalize_ipv6() {
        assert_eq!(normalize_address("[::1]", 22000), "[::1]:22000");
        assert_eq!(normalize_address("[::1]:", 22000), "[::1]:22000");
        assert_eq!(normalize_address("fe80::1", 22000), "[fe80::1]:22000");
    }
}
