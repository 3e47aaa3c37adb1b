//! Live connection bookkeeping.
//!
//! One record per connected device. The supervisor is the only writer of
//! new records; the sync layer removes a record when its connection ends.
//! The relay service reads addresses through [`PeerDirectory`].

use crate::connection::PeerConnection;
use crate::error::{NodeError, Result};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::time::SystemTime;
use sync_relay::PeerDirectory;
use sync_types::DeviceId;
use tokio::sync::mpsc;

/// Bookkeeping for one connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    /// Remote address of the connection, if it is an IP endpoint.
    pub address: Option<SocketAddr>,
    /// When the connection was admitted.
    pub connected_at: SystemTime,
}

/// Table of currently connected devices.
///
/// A device is connected exactly while it has a record here.
#[derive(Debug)]
pub struct ConnectionTable {
    records: DashMap<DeviceId, ConnectionRecord>,
    sync_tx: mpsc::Sender<PeerConnection>,
}

impl ConnectionTable {
    /// Create a table that hands admitted connections to `sync_tx`.
    pub fn new(sync_tx: mpsc::Sender<PeerConnection>) -> Self {
        Self {
            records: DashMap::new(),
            sync_tx,
        }
    }

    /// Whether the device currently has a connection.
    pub fn is_connected(&self, device: &DeviceId) -> bool {
        self.records.contains_key(device)
    }

    /// Remote address of the device's connection.
    pub fn address_of(&self, device: &DeviceId) -> Option<SocketAddr> {
        self.records.get(device).and_then(|r| r.address)
    }

    /// Ids of all connected devices.
    pub fn connected_devices(&self) -> Vec<DeviceId> {
        self.records.iter().map(|r| *r.key()).collect()
    }

    /// Number of connected devices.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no device is connected.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record the connection and hand it to the sync layer.
    ///
    /// The record exists before this returns, so a second connection from
    /// the same device admitted afterwards is seen as a duplicate.
    pub async fn add_connection(&self, conn: PeerConnection) -> Result<()> {
        let device = conn.device_id;
        self.records.insert(
            device,
            ConnectionRecord {
                address: conn.remote_addr,
                connected_at: SystemTime::now(),
            },
        );

        if self.sync_tx.send(conn).await.is_err() {
            self.records.remove(&device);
            return Err(NodeError::SyncLayerClosed);
        }
        Ok(())
    }

    /// Forget the device's connection.
    pub fn remove(&self, device: &DeviceId) -> Option<ConnectionRecord> {
        self.records.remove(device).map(|(_, record)| record)
    }
}

impl PeerDirectory for ConnectionTable {
    fn connected_address(&self, device_id: &str) -> Option<SocketAddr> {
        let device: DeviceId = device_id.parse().ok()?;
        self.address_of(&device)
    }
}
