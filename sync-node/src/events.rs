//! Events published by the node.

use serde::Serialize;
use sync_types::DeviceId;

/// Something other components may want to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A device passed admission.
    DeviceConnected {
        /// The device.
        id: DeviceId,
        /// Its remote address.
        addr: String,
    },
    /// An unconfigured device tried to connect.
    DeviceRejected {
        /// The device.
        device: DeviceId,
        /// Its remote address.
        address: String,
    },
}

/// Receives node events.
pub trait EventSink: Send + Sync {
    /// Publish one event. Must not block.
    fn emit(&self, event: Event);
}

/// Writes every event as one JSON line under the `events` log target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEvents;

impl EventSink for LogEvents {
    fn emit(&self, event: Event) {
        match serde_json::to_string(&event) {
            Ok(line) => tracing::info!(target: "events", "{}", line),
            Err(e) => tracing::warn!("Failed to encode event {:?}: {}", event, e),
        }
    }
}
