//! Dialer tests over loopback: direct dials and relay fallback.

mod common;

use common::{device, node};
use peersync_node::config::Config;
use peersync_node::discovery::StaticDiscovery;
use peersync_node::{listener, Dialer, NodeContext, PeerConnection, Supervisor, TlsIdentity};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use sync_relay::{RelayClient, RelayConfig, RelayServer};
use sync_types::DeviceId;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

/// Start a listener for `identity`; returns its address and the channel
/// its handshaken connections arrive on.
async fn listen(
    identity: &TlsIdentity,
) -> (SocketAddr, mpsc::Receiver<peersync_node::RawConnection>) {
    let bound = listener::bind("127.0.0.1:0").await.unwrap();
    let addr = bound.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(listener::serve(
        bound,
        peersync_node::TlsSetup::new(identity).unwrap(),
        tx,
    ));
    (addr, rx)
}

async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn config_with(devices: Vec<peersync_node::DeviceConfig>) -> Config {
    Config {
        devices,
        ..Config::default()
    }
}

#[tokio::test]
async fn direct_dial_reaches_listener_and_is_admitted() {
    let remote = TlsIdentity::generate("syncthing").unwrap();
    let remote_id = remote.device_id();
    let (remote_addr, mut remote_rx) = listen(&remote).await;

    let dead = closed_port().await;
    let mut local = node(config_with(vec![device(
        remote_id,
        &[dead.to_string().as_str(), remote_addr.to_string().as_str()],
    )]));
    let (tx, mut rx) = mpsc::channel(1);
    let dialer = Dialer::new(local.ctx.clone(), tx);

    let round = tokio::spawn(async move { dialer.dial_round().await });
    let dialed = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(round.await.unwrap());

    let accepted = timeout(WAIT, remote_rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        DeviceId::from_certificate(&accepted.peer_certificates[0]),
        local.identity.device_id()
    );

    let supervisor = Supervisor::new(local.ctx.clone(), mpsc::channel(1).1);
    assert_eq!(
        supervisor.admit(dialed).await,
        peersync_node::Admission::Accepted(remote_id)
    );
    let published: PeerConnection = local.sync_rx.recv().await.unwrap();
    assert_eq!(published.device_id, remote_id);
}

#[tokio::test]
async fn dynamic_address_uses_discovery() {
    let remote = TlsIdentity::generate("syncthing").unwrap();
    let remote_id = remote.device_id();
    let (remote_addr, mut remote_rx) = listen(&remote).await;

    let local = common::node(config_with(vec![device(remote_id, &["dynamic"])]));
    let identity = local.identity;
    let ctx = NodeContext::new(
        local.ctx.config.clone(),
        &identity,
        local.ctx.connections.clone(),
        local.events.clone(),
    )
    .unwrap()
    .with_discovery(Arc::new(StaticDiscovery::new(HashMap::from([(
        remote_id,
        vec![remote_addr.to_string()],
    )]))));

    let (tx, mut rx) = mpsc::channel(1);
    let dialer = Dialer::new(Arc::new(ctx), tx);
    tokio::spawn(async move { dialer.dial_round().await });

    let dialed = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        DeviceId::from_certificate(&dialed.peer_certificates[0]),
        remote_id
    );
    timeout(WAIT, remote_rx.recv()).await.unwrap().unwrap();
}

#[tokio::test]
async fn connected_and_own_devices_are_skipped() {
    let remote = TlsIdentity::generate("syncthing").unwrap();
    let (remote_addr, _remote_rx) = listen(&remote).await;

    let me = TlsIdentity::generate("syncthing").unwrap();
    let my_id = me.device_id();
    let local = common::node_with_identity(
        me,
        config_with(vec![
            device(my_id, &[remote_addr.to_string().as_str()]),
            device(remote.device_id(), &[remote_addr.to_string().as_str()]),
        ]),
    );
    let (ours, _theirs) = tokio::io::duplex(64);
    let (reader, writer) = tokio::io::split(ours);
    local
        .ctx
        .connections
        .add_connection(PeerConnection {
            device_id: remote.device_id(),
            name: "existing".into(),
            remote_addr: Some(remote_addr),
            compression: true,
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(1);
    let dialer = Dialer::new(local.ctx.clone(), tx);
    assert!(dialer.dial_round().await);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn failed_direct_dial_falls_back_to_relay() {
    // Target: reachable only by the relay.
    let target = TlsIdentity::generate("syncthing").unwrap();
    let target_id = target.device_id();
    let (target_addr, mut target_rx) = listen(&target).await;

    // Relay device: knows the target's live address.
    let relay_id = DeviceId::from_certificate(b"relay device");
    let relay = Arc::new(RelayServer::new(
        RelayConfig {
            bind_address: "127.0.0.1:0".into(),
            ..RelayConfig::default()
        },
        Arc::new(HashMap::from([(target_id.to_string(), target_addr)])),
    ));
    let relay_listener = relay.bind().await.unwrap();
    let relay_port = relay_listener.local_addr().unwrap().port();
    tokio::spawn(relay.clone().serve(relay_listener));

    // Local node: target's configured address is dead, relay is connected.
    let dead = closed_port().await;
    let local = node(config_with(vec![
        device(relay_id, &["127.0.0.1:1"]),
        device(target_id, &[dead.to_string().as_str()]),
    ]));
    let (ours, _theirs) = tokio::io::duplex(64);
    let (reader, writer) = tokio::io::split(ours);
    local
        .ctx
        .connections
        .add_connection(PeerConnection {
            device_id: relay_id,
            name: "relay".into(),
            remote_addr: Some("127.0.0.1:45000".parse().unwrap()),
            compression: true,
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(1);
    let dialer = Dialer::new(local.ctx.clone(), tx)
        .with_relay_client(RelayClient::with_port(relay_port));
    tokio::spawn(async move { dialer.dial_round().await });

    let dialed = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        DeviceId::from_certificate(&dialed.peer_certificates[0]),
        target_id
    );
    let accepted = timeout(WAIT, target_rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        DeviceId::from_certificate(&accepted.peer_certificates[0]),
        local.identity.device_id()
    );
    assert_eq!(relay.metrics().sessions_total.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn relay_to_itself_is_refused() {
    let local = node(config_with(vec![device(
        DeviceId::from_certificate(b"r"),
        &["127.0.0.1:1"],
    )]));
    let relay = DeviceId::from_certificate(b"r");
    let err = peersync_node::relay::connect_via_relay(
        &local.ctx,
        &RelayClient::new(),
        &relay,
        &relay,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        peersync_node::relay::RelayPathError::SameDevice(_)
    ));
}

#[tokio::test]
async fn relay_requires_configured_addresses_and_live_connection() {
    let relay = DeviceId::from_certificate(b"r");
    let target = DeviceId::from_certificate(b"t");
    let local = node(config_with(vec![
        device(relay, &["127.0.0.1:1"]),
        device(target, &[]),
    ]));

    let err = peersync_node::relay::connect_via_relay(
        &local.ctx,
        &RelayClient::new(),
        &relay,
        &target,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        peersync_node::relay::RelayPathError::NotConfigured(id) if id == target
    ));

    let local = node(config_with(vec![
        device(relay, &["127.0.0.1:1"]),
        device(target, &["127.0.0.1:2"]),
    ]));
    let err = peersync_node::relay::connect_via_relay(
        &local.ctx,
        &RelayClient::new(),
        &relay,
        &target,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        peersync_node::relay::RelayPathError::NotConnected(id) if id == relay
    ));
}
