//! Configuration loading for the peersync node.
//!
//! Configuration is loaded from a TOML file (default: `peersync.toml`).
//! Every section is optional; missing fields fall back to defaults.

use ipnet::IpNet;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use sync_relay::RelayConfig;
use sync_types::DeviceId;

/// Default port of the secure transport.
pub const DEFAULT_PORT: u16 = 22000;

/// Address sentinel meaning "ask discovery".
pub const DYNAMIC_ADDRESS: &str = "dynamic";

/// Root configuration for a peersync node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Devices whose connections are silently dropped.
    #[serde(default)]
    pub ignored_devices: Vec<DeviceId>,
    /// Node options.
    #[serde(default)]
    pub node: NodeOptions,
    /// Relay service configuration.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Configured remote devices.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    /// Static discovery table: device id → addresses.
    #[serde(default)]
    pub discovery: HashMap<DeviceId, Vec<String>>,
}

/// Node-wide options.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeOptions {
    /// Addresses to accept secure connections on (default: 0.0.0.0:22000).
    #[serde(default = "default_listen_addresses")]
    pub listen_addresses: Vec<String>,
    /// Port assumed for addresses without one (default: 22000).
    #[serde(default = "default_port")]
    pub default_port: u16,
    /// Upper bound of the dial backoff in seconds (default: 60).
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,
    /// Apply bandwidth limits to LAN peers too (default: false).
    #[serde(default)]
    pub limit_bandwidth_in_lan: bool,
    /// Subnets considered local, in CIDR notation.
    #[serde(default)]
    pub local_subnets: Vec<String>,
    /// Outbound cap in KiB/s, 0 for none (default: 0).
    #[serde(default)]
    pub max_send_kbps: u32,
    /// Inbound cap in KiB/s, 0 for none (default: 0).
    #[serde(default)]
    pub max_recv_kbps: u32,
    /// PEM certificate path (default: cert.pem).
    #[serde(default = "default_cert_path")]
    pub cert_path: PathBuf,
    /// PEM PKCS#8 private key path (default: key.pem).
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
}

/// A configured remote device.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Device identity.
    pub id: DeviceId,
    /// Where to dial it, in preference order.
    #[serde(default)]
    pub addresses: Vec<AddressSpec>,
    /// Expected certificate name; empty means the default name.
    #[serde(default)]
    pub cert_name: String,
    /// Compress the sync protocol on this connection (default: true).
    #[serde(default = "default_compression")]
    pub compression: bool,
}

/// One configured address entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum AddressSpec {
    /// Resolve through discovery at dial time.
    Dynamic,
    /// `host`, `host:` or `host:port`.
    Literal(String),
}

impl From<String> for AddressSpec {
    fn from(value: String) -> Self {
        if value == DYNAMIC_ADDRESS {
            Self::Dynamic
        } else {
            Self::Literal(value)
        }
    }
}

// Default value functions
fn default_listen_addresses() -> Vec<String> {
    vec![format!("0.0.0.0:{}", DEFAULT_PORT)]
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_reconnect_interval_secs() -> u64 {
    60
}

fn default_cert_path() -> PathBuf {
    PathBuf::from("cert.pem")
}

fn default_key_path() -> PathBuf {
    PathBuf::from("key.pem")
}

fn default_compression() -> bool {
    true
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            listen_addresses: default_listen_addresses(),
            default_port: default_port(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            limit_bandwidth_in_lan: false,
            local_subnets: Vec::new(),
            max_send_kbps: 0,
            max_recv_kbps: 0,
            cert_path: default_cert_path(),
            key_path: default_key_path(),
        }
    }
}

impl NodeOptions {
    /// Upper bound of the dial backoff.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    /// Parse the configured local subnets.
    ///
    /// # Errors
    ///
    /// Returns an error for the first entry that is not valid CIDR.
    pub fn parse_local_subnets(&self) -> Result<Vec<IpNet>, ConfigError> {
        self.local_subnets
            .iter()
            .map(|value| {
                value.parse().map_err(|source| ConfigError::InvalidSubnet {
                    value: value.clone(),
                    source,
                })
            })
            .collect()
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check option values that the parser alone cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.reconnect_interval_secs == 0 {
            return Err(ConfigError::InvalidOption {
                reason: "node.reconnect_interval_secs must be > 0",
            });
        }
        if self.node.listen_addresses.is_empty() {
            return Err(ConfigError::InvalidOption {
                reason: "node.listen_addresses must not be empty",
            });
        }
        self.node.parse_local_subnets()?;
        Ok(())
    }

    /// Look up a configured device.
    pub fn device(&self, id: &DeviceId) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.id == *id)
    }

    /// Whether connections from this device are explicitly ignored.
    pub fn is_ignored(&self, id: &DeviceId) -> bool {
        self.ignored_devices.contains(id)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A local subnet entry is not valid CIDR.
    #[error("invalid local subnet {value:?}: {source}")]
    InvalidSubnet {
        /// The rejected entry.
        value: String,
        /// Underlying parse error.
        source: ipnet::AddrParseError,
    },
    /// An option is out of range.
    #[error("invalid option: {reason}")]
    InvalidOption {
        /// What is wrong.
        reason: &'static str,
    },
}
