//! Byte forwarding for an established relay session.
//!
//! A session pairs the requester's socket with the leg the relay opened to
//! the target. Two forwarding tasks copy bytes, one per direction. The
//! first task whose read or write fails (EOF included) tears the whole
//! session down; both sockets are closed once both tasks have returned.

use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Per-read buffer size for forwarding.
pub const FORWARD_BUFFER_SIZE: usize = 16 * 1024;

/// Byte counts for a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    /// Bytes copied requester → target.
    pub upstream: u64,
    /// Bytes copied target → requester.
    pub downstream: u64,
}

impl ForwardStats {
    /// Total bytes copied in both directions.
    pub fn total(&self) -> u64 {
        self.upstream + self.downstream
    }
}

/// A live relay session between a requester and a target.
#[derive(Debug)]
pub struct RelaySession {
    requester: TcpStream,
    target: TcpStream,
    target_id: String,
}

impl RelaySession {
    /// Pair two connected sockets.
    pub fn new(requester: TcpStream, target: TcpStream, target_id: impl Into<String>) -> Self {
        Self {
            requester,
            target,
            target_id: target_id.into(),
        }
    }

    /// Forward bytes until either side fails, then close both sockets.
    ///
    /// There is no idle timeout; a peer that never closes holds the
    /// session open.
    pub async fn run(self) -> ForwardStats {
        let started = Instant::now();
        let target_id = self.target_id;
        let (requester_read, requester_write) = self.requester.into_split();
        let (target_read, target_write) = self.target.into_split();
        let closed = CancellationToken::new();

        let upstream = tokio::spawn(forward(requester_read, target_write, closed.clone()));
        let downstream = tokio::spawn(forward(target_read, requester_write, closed.clone()));

        let (upstream, downstream) = tokio::join!(upstream, downstream);
        let stats = ForwardStats {
            upstream: upstream.unwrap_or_default(),
            downstream: downstream.unwrap_or_default(),
        };

        tracing::info!(
            "Relay session to {} closed after {:?} ({} bytes up, {} bytes down)",
            target_id,
            started.elapsed(),
            stats.upstream,
            stats.downstream
        );
        stats
    }
}

/// Copy one direction until a read or write fails or the session closes.
///
/// Both halves are dropped on return. The socket itself closes once the
/// opposite task drops its halves too.
async fn forward(
    mut from: OwnedReadHalf,
    mut to: OwnedWriteHalf,
    closed: CancellationToken,
) -> u64 {
    let mut buf = vec![0u8; FORWARD_BUFFER_SIZE];
    let mut copied = 0u64;

    loop {
        let n = tokio::select! {
            _ = closed.cancelled() => break,
            read = from.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };

        let written = tokio::select! {
            _ = closed.cancelled() => break,
            write = to.write_all(&buf[..n]) => write,
        };
        if written.is_err() {
            break;
        }
        copied += n as u64;
    }

    closed.cancel();
    let _ = to.shutdown().await;
    copied
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Returns (client end, server end) of a loopback TCP connection.
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn forwards_both_directions_in_order() {
        let (mut requester, requester_relay_end) = socket_pair().await;
        let (target_relay_end, mut target) = socket_pair().await;

        let session = RelaySession::new(requester_relay_end, target_relay_end, "T");
        let handle = tokio::spawn(session.run());

        requester.write_all(b"hello ").await.unwrap();
        requester.write_all(b"target").await.unwrap();
        let mut buf = [0u8; 12];
        target.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello target");

        target.write_all(b"hi requester").await.unwrap();
        let mut buf = [0u8; 12];
        requester.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi requester");

        drop(requester);
        let stats = handle.await.unwrap();
        assert_eq!(stats.upstream, 12);
        assert_eq!(stats.downstream, 12);
        assert_eq!(stats.total(), 24);
    }

    #[tokio::test]
    async fn closing_one_side_closes_the_other() {
        let (requester, requester_relay_end) = socket_pair().await;
        let (target_relay_end, mut target) = socket_pair().await;

        let handle = tokio::spawn(RelaySession::new(requester_relay_end, target_relay_end, "T").run());

        drop(requester);
        handle.await.unwrap();

        let mut rest = Vec::new();
        let n = target.read_to_end(&mut rest).await.unwrap();
        assert_eq!(n, 0);
    }
}
