//! Error types for peersync identity handling.

use thiserror::Error;

/// Errors that can occur when handling peersync identities.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Textual device id could not be parsed
    #[error("invalid device id {input:?}: {reason}")]
    InvalidDeviceId {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}
