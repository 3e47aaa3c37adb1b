//! Shared fixtures for node integration tests.

#![allow(dead_code)]

use peersync_node::config::{AddressSpec, Config, DeviceConfig};
use peersync_node::events::{Event, EventSink};
use peersync_node::{ConnectionTable, NodeContext, PeerConnection, RawConnection, TlsIdentity};
use rustls::pki_types::CertificateDer;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use sync_types::DeviceId;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

/// Collects every emitted event.
#[derive(Default)]
pub struct RecordingEvents(Mutex<Vec<Event>>);

impl RecordingEvents {
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

impl EventSink for RecordingEvents {
    fn emit(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }
}

pub struct TestNode {
    pub identity: TlsIdentity,
    pub ctx: Arc<NodeContext>,
    pub events: Arc<RecordingEvents>,
    pub sync_rx: mpsc::Receiver<PeerConnection>,
}

pub fn device(id: DeviceId, addresses: &[&str]) -> DeviceConfig {
    DeviceConfig {
        id,
        addresses: addresses
            .iter()
            .map(|a| AddressSpec::from(a.to_string()))
            .collect(),
        cert_name: String::new(),
        compression: true,
    }
}

pub fn node(config: Config) -> TestNode {
    node_with_identity(TlsIdentity::generate("syncthing").unwrap(), config)
}

pub fn node_with_identity(identity: TlsIdentity, config: Config) -> TestNode {
    let (sync_tx, sync_rx) = mpsc::channel(16);
    let connections = Arc::new(ConnectionTable::new(sync_tx));
    let events = Arc::new(RecordingEvents::default());
    let ctx = NodeContext::new(config, &identity, connections, events.clone()).unwrap();
    TestNode {
        identity,
        ctx: Arc::new(ctx),
        events,
        sync_rx,
    }
}

/// An in-memory connection that "presented" the given certificates.
pub fn raw_connection(certs: &[&CertificateDer<'static>], remote: &str) -> RawConnection {
    raw_connection_with_peer(certs, remote).0
}

/// Like [`raw_connection`], also returning the far end of the stream so
/// writes on the connection succeed.
pub fn raw_connection_with_peer(
    certs: &[&CertificateDer<'static>],
    remote: &str,
) -> (RawConnection, DuplexStream) {
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let conn = RawConnection {
        stream: Box::new(ours),
        peer_certificates: certs.iter().map(|c| (*c).clone()).collect(),
        alpn_protocol: Some(b"bep/1.0".to_vec()),
        local_addr: Some("127.0.0.1:22000".parse().unwrap()),
        remote_addr: Some(remote.parse::<SocketAddr>().unwrap()),
    };
    (conn, theirs)
}
