//! Inbound connections.

use crate::connection::RawConnection;
use crate::error::{NodeError, Result};
use crate::socket::tune_socket;
use crate::tls::TlsSetup;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Bind one listen address.
///
/// # Errors
///
/// Returns [`NodeError::Bind`]; a node that cannot listen is unreachable,
/// so callers treat this as fatal.
pub async fn bind(address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .map_err(|source| NodeError::Bind {
            address: address.to_string(),
            source,
        })
}

/// Accept, tune and handshake connections until the supervisor is gone.
///
/// The handshake runs inline, so a slow peer delays the next accept. The
/// send blocks until the supervisor takes the connection.
pub async fn serve(listener: TcpListener, tls: TlsSetup, out: mpsc::Sender<RawConnection>) {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    tracing::info!("Listening for connections on {}", local);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Accept error on {}: {}", local, e);
                continue;
            }
        };

        tune_socket(&stream);
        let conn = match tls.accept(stream).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::info!("TLS handshake with {} failed: {}", peer, e);
                continue;
            }
        };

        if out.send(conn).await.is_err() {
            tracing::debug!("Listener on {} stopped: supervisor gone", local);
            return;
        }
    }
}
