//! TCP socket tuning applied to every transport connection.

use socket2::{SockRef, TcpKeepalive};
use std::time::Duration;
use tokio::net::TcpStream;

/// Keep-alive period for transport connections.
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(60);

/// Discard unsent data on close, disable small-packet coalescing and
/// enable keep-alive.
///
/// Each option is best-effort; failures are logged and the connection is
/// kept.
pub fn tune_socket(stream: &TcpStream) {
    let sock = SockRef::from(stream);

    if let Err(e) = sock.set_linger(Some(Duration::ZERO)) {
        tracing::info!("Failed to set linger: {}", e);
    }
    if let Err(e) = sock.set_nodelay(true) {
        tracing::info!("Failed to set no-delay: {}", e);
    }
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_PERIOD)
        .with_interval(KEEPALIVE_PERIOD);
    if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
        tracing::info!("Failed to set keep-alive: {}", e);
    }
}
