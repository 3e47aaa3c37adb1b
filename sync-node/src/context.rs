//! Shared state of a running node.

use crate::bandwidth::Bandwidth;
use crate::classify::LanPolicy;
use crate::config::Config;
use crate::discovery::Discovery;
use crate::error::Result;
use crate::events::EventSink;
use crate::registry::ConnectionTable;
use crate::tls::{TlsIdentity, TlsSetup};
use std::sync::Arc;
use sync_types::DeviceId;

/// Everything the listener, dialer and supervisor share.
pub struct NodeContext {
    /// This device's id.
    pub my_id: DeviceId,
    /// Loaded configuration.
    pub config: Config,
    /// Which peers are bandwidth-limited.
    pub lan: LanPolicy,
    /// Live connections.
    pub connections: Arc<ConnectionTable>,
    /// Lookup for `dynamic` addresses, if any.
    pub discovery: Option<Arc<dyn Discovery>>,
    /// Event publication.
    pub events: Arc<dyn EventSink>,
    /// Shared rate limiters.
    pub bandwidth: Bandwidth,
    /// Handshake setup for our identity.
    pub tls: TlsSetup,
}

impl NodeContext {
    /// Assemble the context from configuration and identity.
    pub fn new(
        config: Config,
        identity: &TlsIdentity,
        connections: Arc<ConnectionTable>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let lan = LanPolicy::new(
            config.node.limit_bandwidth_in_lan,
            config.node.parse_local_subnets()?,
        );
        let bandwidth = Bandwidth::new(config.node.max_recv_kbps, config.node.max_send_kbps);

        Ok(Self {
            my_id: identity.device_id(),
            config,
            lan,
            connections,
            discovery: None,
            events,
            bandwidth,
            tls: TlsSetup::new(identity)?,
        })
    }

    /// Attach a discovery service.
    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("my_id", &self.my_id)
            .field("devices", &self.config.devices.len())
            .field("connected", &self.connections.len())
            .field("discovery", &self.discovery.is_some())
            .field("bandwidth", &self.bandwidth)
            .finish_non_exhaustive()
    }
}
