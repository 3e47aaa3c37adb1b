//! Error types for sync-relay.

use crate::protocol::RelayResponse;

/// Main error type for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The relay answered with something other than `OK`.
    #[error("relay refused: {0}")]
    Refused(RelayResponse),

    /// Relay listener could not be bound.
    #[error("failed to bind relay listener on {address}: {source}")]
    Bind {
        /// The address that could not be bound.
        address: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Relay wire protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Request or response line did not match the grammar.
    #[error("malformed relay line: {reason}")]
    Malformed {
        /// Reason the line is invalid.
        reason: &'static str,
    },

    /// Line exceeded the protocol bound without completing.
    #[error("relay line longer than {limit} bytes")]
    TooLong {
        /// Maximum accepted length.
        limit: usize,
    },

    /// Peer did not send a complete line in time.
    #[error("no complete relay line before the deadline")]
    TimedOut,

    /// Peer closed the socket before a complete line arrived.
    #[error("connection closed before a complete line")]
    ConnectionClosed,

    /// Socket error while reading or writing a line.
    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
