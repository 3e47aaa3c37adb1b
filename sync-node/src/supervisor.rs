//! Connection admission.
//!
//! The supervisor is the only consumer of the channel the listener and
//! dialer push handshaken connections onto. It admits one connection at a
//! time, which is what keeps the duplicate and self-connection checks free
//! of races.
//!
//! ## Admission pipeline
//!
//! ```text
//! RawConnection
//!   ├─ ALPN != bep/1.0          → log only
//!   ├─ certificates != 1        → drop
//!   ├─ id == our id             → drop
//!   ├─ id already connected     → drop
//!   ├─ configured device
//!   │    ├─ name mismatch       → drop (warn)
//!   │    └─ name ok             → limit, publish, record, DeviceConnected
//!   └─ unconfigured device      → drop, DeviceRejected unless ignored
//! ```

use crate::connection::{display_addr, PeerConnection, RawConnection};
use crate::context::NodeContext;
use crate::events::Event;
use crate::tls::{certificate_matches_name, BEP_PROTOCOL, DEFAULT_CERT_NAME};
use std::sync::Arc;
use sync_types::DeviceId;
use tokio::sync::mpsc;

/// Why a connection was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The peer presented zero or several certificates.
    CertificateCount(usize),
    /// The peer is this node.
    SelfConnection,
    /// The device already has a connection.
    AlreadyConnected(DeviceId),
    /// The certificate name does not match the device's configured name.
    CertificateName(DeviceId),
    /// The device is not configured.
    UnknownDevice(DeviceId),
    /// The device is not configured and is explicitly ignored.
    IgnoredDevice(DeviceId),
    /// The sync layer is gone.
    SyncLayerClosed(DeviceId),
}

/// Outcome of admitting one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Published to the sync layer.
    Accepted(DeviceId),
    /// Dropped.
    Rejected(Rejection),
}

/// Single consumer of handshaken connections.
#[derive(Debug)]
pub struct Supervisor {
    ctx: Arc<NodeContext>,
    incoming: mpsc::Receiver<RawConnection>,
}

impl Supervisor {
    /// Create a supervisor draining `incoming`.
    pub fn new(ctx: Arc<NodeContext>, incoming: mpsc::Receiver<RawConnection>) -> Self {
        Self { ctx, incoming }
    }

    /// Admit connections until every producer is gone.
    pub async fn run(mut self) {
        while let Some(conn) = self.incoming.recv().await {
            self.admit(conn).await;
        }
        tracing::debug!("Supervisor stopped: no more producers");
    }

    /// Run the admission pipeline on one connection.
    ///
    /// A rejected connection is dropped, which closes it.
    pub async fn admit(&self, conn: RawConnection) -> Admission {
        let name = conn.name();

        if conn.alpn_protocol.as_deref() != Some(BEP_PROTOCOL) {
            tracing::info!("Peer {} did not negotiate bep/1.0", name);
        }

        if conn.peer_certificates.len() != 1 {
            tracing::info!(
                "Got peer certificate list of length {} != 1 from {}; protocol error",
                conn.peer_certificates.len(),
                name
            );
            return Admission::Rejected(Rejection::CertificateCount(conn.peer_certificates.len()));
        }
        let certificate = &conn.peer_certificates[0];
        let remote_id = DeviceId::from_certificate(certificate);

        if remote_id == self.ctx.my_id {
            tracing::info!("Connected to myself ({}) at {}; dropping", remote_id, name);
            return Admission::Rejected(Rejection::SelfConnection);
        }

        if self.ctx.connections.is_connected(&remote_id) {
            tracing::info!("Connected to already connected device {} at {}; dropping", remote_id, name);
            return Admission::Rejected(Rejection::AlreadyConnected(remote_id));
        }

        let Some(device) = self.ctx.config.device(&remote_id) else {
            let address = display_addr(conn.remote_addr);
            if self.ctx.config.is_ignored(&remote_id) {
                tracing::info!("Connection from ignored device {} at {}; dropping", remote_id, address);
                return Admission::Rejected(Rejection::IgnoredDevice(remote_id));
            }
            tracing::info!("Connection from unknown device {} at {}; dropping", remote_id, address);
            self.ctx.events.emit(Event::DeviceRejected {
                device: remote_id,
                address,
            });
            return Admission::Rejected(Rejection::UnknownDevice(remote_id));
        };

        let expected_name = if device.cert_name.is_empty() {
            DEFAULT_CERT_NAME
        } else {
            device.cert_name.as_str()
        };
        if !certificate_matches_name(certificate, expected_name) {
            tracing::warn!(
                "Device {} at {} presented a certificate not valid for {:?}; dropping",
                remote_id,
                name,
                expected_name
            );
            return Admission::Rejected(Rejection::CertificateName(remote_id));
        }

        let limit = self.ctx.lan.should_limit(conn.remote_addr);
        let (reader, writer) = tokio::io::split(conn.stream);
        let peer = PeerConnection {
            device_id: remote_id,
            name,
            remote_addr: conn.remote_addr,
            compression: device.compression,
            reader: self.ctx.bandwidth.wrap_reader(reader, limit),
            writer: self.ctx.bandwidth.wrap_writer(writer, limit),
        };

        if let Err(e) = self.ctx.connections.add_connection(peer).await {
            tracing::warn!("Dropping connection to {}: {}", remote_id, e);
            return Admission::Rejected(Rejection::SyncLayerClosed(remote_id));
        }

        let addr = display_addr(conn.remote_addr);
        tracing::info!("Established secure connection to {} at {} (limited: {})", remote_id, addr, limit);
        self.ctx.events.emit(Event::DeviceConnected { id: remote_id, addr });
        Admission::Accepted(remote_id)
    }
}
