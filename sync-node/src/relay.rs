//! Reaching a device through another connected device's relay service.

use crate::context::NodeContext;
use sync_relay::{RelayClient, RelayError};
use sync_types::DeviceId;
use tokio::net::TcpStream;

/// Why a relayed path could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum RelayPathError {
    /// Relay and target are the same device.
    #[error("cannot relay to {0} through itself")]
    SameDevice(DeviceId),

    /// The device is not configured or has no addresses.
    #[error("device {0} is not configured with an address")]
    NotConfigured(DeviceId),

    /// The relay device has no live connection to us.
    #[error("relay device {0} is not connected")]
    NotConnected(DeviceId),

    /// The relay service refused or failed.
    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Ask `relay`'s relay service for a raw socket to `target`.
///
/// The relay is contacted on the host of its live connection, not on its
/// configured addresses.
pub async fn connect_via_relay(
    ctx: &NodeContext,
    client: &RelayClient,
    relay: &DeviceId,
    target: &DeviceId,
) -> Result<TcpStream, RelayPathError> {
    if relay == target {
        return Err(RelayPathError::SameDevice(*relay));
    }
    for device in [relay, target] {
        let configured = ctx
            .config
            .device(device)
            .is_some_and(|d| !d.addresses.is_empty());
        if !configured {
            return Err(RelayPathError::NotConfigured(*device));
        }
    }

    let relay_addr = ctx
        .connections
        .address_of(relay)
        .ok_or(RelayPathError::NotConnected(*relay))?;

    Ok(client.request(relay_addr.ip(), target).await?)
}
