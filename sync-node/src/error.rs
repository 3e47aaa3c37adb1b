//! Node error types.

use crate::config::ConfigError;
use crate::tls::TlsError;
use thiserror::Error;

/// Errors that stop the node or one of its components.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// TLS identity or configuration failure.
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// A listen address could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// The address that failed.
        address: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The sync layer stopped accepting connections.
    #[error("sync layer closed")]
    SyncLayerClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
