//! Wire-level relay client.
//!
//! Asks a relay device to open a path to a target device. On success the
//! returned socket is a raw pipe to the target, ready for the secure
//! handshake.

use crate::error::{ProtocolError, ProtocolResult, RelayError, Result};
use crate::protocol::{RelayRequest, RelayResponse, MAX_RESPONSE_LEN, RELAY_PORT};
use std::net::{IpAddr, SocketAddr};
use sync_types::DeviceId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Client for the relay protocol.
#[derive(Debug, Clone, Copy)]
pub struct RelayClient {
    port: u16,
}

impl Default for RelayClient {
    fn default() -> Self {
        Self { port: RELAY_PORT }
    }
}

impl RelayClient {
    /// Client for the well-known relay port.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client for a relay service on a non-standard port.
    pub fn with_port(port: u16) -> Self {
        Self { port }
    }

    /// The relay port this client connects to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Request a path to `target` through the relay service on `relay_host`.
    ///
    /// The socket is dropped (closed) on any outcome other than `OK`.
    pub async fn request(&self, relay_host: IpAddr, target: &DeviceId) -> Result<TcpStream> {
        let relay_addr = SocketAddr::new(relay_host, self.port);
        let mut stream = TcpStream::connect(relay_addr).await?;

        stream.write_all(&RelayRequest::new(target).encode()).await?;

        let line = read_response_line(&mut stream).await?;
        match RelayResponse::parse(&line) {
            RelayResponse::Ok => {
                tracing::debug!("Relay via {} to {:?} established", relay_addr, target);
                Ok(stream)
            }
            refused => {
                tracing::debug!("Relay via {} to {:?} refused: {}", relay_addr, target, refused);
                Err(RelayError::Refused(refused))
            }
        }
    }
}

/// Read one response line, never consuming bytes past its `\n`.
///
/// A peer that closes after sending a partial line still yields that line.
async fn read_response_line(stream: &mut TcpStream) -> ProtocolResult<Vec<u8>> {
    let mut line = Vec::with_capacity(MAX_RESPONSE_LEN);
    let mut byte = [0u8; 1];

    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return if line.is_empty() {
                Err(ProtocolError::ConnectionClosed)
            } else {
                Ok(line)
            };
        }

        line.push(byte[0]);
        if byte[0] == b'\n' {
            return Ok(line);
        }
        if line.len() >= MAX_RESPONSE_LEN {
            return Err(ProtocolError::TooLong {
                limit: MAX_RESPONSE_LEN,
            });
        }
    }
}
