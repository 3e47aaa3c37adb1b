//! Device identity for peersync.

use crate::error::SyncError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of a [`DeviceId`] in bytes.
pub const DEVICE_ID_LEN: usize = 32;

/// Characters per dash-separated group in the textual form.
const GROUP_LEN: usize = 8;

/// A unique identifier for a device in the sync network.
///
/// The SHA-256 digest of the DER-encoded certificate the device presents
/// during the TLS handshake. Displayed as upper-case hex in dash-separated
/// groups of eight, e.g. `5E1A...-...`, which keeps it inside the
/// `[A-Z0-9-]` alphabet of the relay protocol.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId([u8; DEVICE_ID_LEN]);

impl DeviceId {
    /// Derive the DeviceId of a DER-encoded certificate.
    pub fn from_certificate(der: &[u8]) -> Self {
        let digest = Sha256::digest(der);
        let mut bytes = [0u8; DEVICE_ID_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Create a DeviceId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == DEVICE_ID_LEN {
            let mut arr = [0u8; DEVICE_ID_LEN];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Get the raw bytes of this DeviceId.
    pub fn as_bytes(&self) -> &[u8; DEVICE_ID_LEN] {
        &self.0
    }

    /// The first dash-separated group, for compact log lines.
    pub fn short(&self) -> String {
        hex::encode_upper(&self.0[..GROUP_LEN / 2])
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode_upper(self.0);
        for (i, group) in hex.as_bytes().chunks(GROUP_LEN).enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            // hex output is always ASCII
            f.write_str(std::str::from_utf8(group).map_err(|_| fmt::Error)?)?;
        }
        Ok(())
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.short())
    }
}

impl FromStr for DeviceId {
    type Err = SyncError;

    /// Parse the textual form. Dashes are optional and case is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| *c != '-').collect();
        if compact.len() != DEVICE_ID_LEN * 2 {
            return Err(SyncError::InvalidDeviceId {
                input: s.to_string(),
                reason: "wrong length",
            });
        }

        let bytes = hex::decode(&compact).map_err(|_| SyncError::InvalidDeviceId {
            input: s.to_string(),
            reason: "not hex",
        })?;

        Self::from_bytes(&bytes).ok_or_else(|| SyncError::InvalidDeviceId {
            input: s.to_string(),
            reason: "wrong length",
        })
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
