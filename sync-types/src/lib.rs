//! # sync-types
//!
//! Identity types shared by the peersync crates.
//!
//! - [`DeviceId`] - Network-wide device identity, derived from the device certificate
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;

pub use error::SyncError;
pub use ids::{DeviceId, DEVICE_ID_LEN};
