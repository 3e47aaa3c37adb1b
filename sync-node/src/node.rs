//! Node startup: wires listeners, dialer, relay service and supervisor.

use crate::config::Config;
use crate::connection::PeerConnection;
use crate::context::NodeContext;
use crate::dialer::Dialer;
use crate::discovery::StaticDiscovery;
use crate::error::Result;
use crate::events::LogEvents;
use crate::listener;
use crate::registry::ConnectionTable;
use crate::supervisor::Supervisor;
use crate::tls::TlsIdentity;
use std::sync::Arc;
use sync_relay::RelayServer;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// Connections buffered between the supervisor and the sync layer.
const SYNC_QUEUE_DEPTH: usize = 16;

/// Run the node until every listener and the dialer have stopped.
///
/// # Errors
///
/// Fails if a listen address cannot be bound or the identity cannot be
/// turned into a TLS configuration.
pub async fn run(config: Config, identity: TlsIdentity) -> Result<()> {
    let (sync_tx, sync_rx) = mpsc::channel(SYNC_QUEUE_DEPTH);
    let connections = Arc::new(ConnectionTable::new(sync_tx));

    let discovery = config.discovery.clone();
    let relay_config = config.relay.clone();
    let listen_addresses = config.node.listen_addresses.clone();

    let mut ctx = NodeContext::new(config, &identity, connections.clone(), Arc::new(LogEvents))?;
    if !discovery.is_empty() {
        ctx = ctx.with_discovery(Arc::new(StaticDiscovery::new(discovery)));
    }
    let ctx = Arc::new(ctx);
    tracing::info!("My ID: {}", ctx.my_id);

    // Capacity 1: producers wait for the supervisor.
    let (raw_tx, raw_rx) = mpsc::channel(1);

    for address in &listen_addresses {
        let bound = listener::bind(address).await?;
        tokio::spawn(listener::serve(bound, ctx.tls.clone(), raw_tx.clone()));
    }

    if relay_config.enabled {
        let relay = Arc::new(RelayServer::new(relay_config, connections.clone()));
        match relay.bind().await {
            Ok(bound) => {
                tokio::spawn(relay.serve(bound));
            }
            Err(e) => tracing::warn!("Relay service disabled: {}", e),
        }
    }

    tokio::spawn(hold_connections(sync_rx, connections));
    tokio::spawn(Dialer::new(ctx.clone(), raw_tx).run());

    Supervisor::new(ctx, raw_rx).run().await;
    Ok(())
}

/// Minimal sync layer: keep each admitted connection open until the peer
/// closes it, then forget the device so it can reconnect.
pub async fn hold_connections(
    mut incoming: mpsc::Receiver<PeerConnection>,
    connections: Arc<ConnectionTable>,
) {
    while let Some(mut conn) = incoming.recv().await {
        let connections = connections.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                match conn.reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("Connection {} read error: {}", conn.name, e);
                        break;
                    }
                }
            }
            connections.remove(&conn.device_id);
            tracing::info!("Connection to {} at {} closed", conn.device_id, conn.name);
        });
    }
}
