//! Relay service configuration.
//!
//! Read from the `[relay]` section of the node configuration file.

use crate::protocol::RELAY_PORT;
use serde::Deserialize;

/// Relay service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Run the relay service (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Bind address for the relay listener (default: 0.0.0.0:22001).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Relay requests accepted per source IP per minute (default: 30).
    #[serde(default = "default_requests_per_minute_per_ip")]
    pub requests_per_minute_per_ip: u32,
    /// Maximum simultaneously open relay connections (default: 256).
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    format!("0.0.0.0:{}", RELAY_PORT)
}

fn default_requests_per_minute_per_ip() -> u32 {
    30
}

fn default_max_concurrent_sessions() -> usize {
    256
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bind_address: default_bind_address(),
            requests_per_minute_per_ip: default_requests_per_minute_per_ip(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
        }
    }
}
