//! Address lookup for devices configured as `dynamic`.

use async_trait::async_trait;
use std::collections::HashMap;
use sync_types::DeviceId;

/// Resolves a device id to candidate dial addresses.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Candidate addresses for `device`, best first. Empty when unknown.
    async fn lookup(&self, device: &DeviceId) -> Vec<String>;
}

/// Discovery backed by a fixed table from the configuration file.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    table: HashMap<DeviceId, Vec<String>>,
}

impl StaticDiscovery {
    /// Wrap a device → addresses table.
    pub fn new(table: HashMap<DeviceId, Vec<String>>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn lookup(&self, device: &DeviceId) -> Vec<String> {
        self.table.get(device).cloned().unwrap_or_default()
    }
}
