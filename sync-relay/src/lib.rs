//! # sync-relay
//!
//! Single-hop relay for peersync devices that cannot reach each other
//! directly (typically both behind NAT).
//!
//! A device that is already connected to both parties brokers the path:
//!
//! ```text
//! Device A ──── TCP :22001 ────► Relay device ──── TCP ────► Device B
//!          "RELAY <B's id>"       looks up B's        opens leg
//!          ◄──── "OK\r\n" ─────   live address
//!          ◄═════════ raw byte pipe (TLS runs end to end) ═════════►
//! ```
//!
//! ## Protocol
//!
//! Plaintext ASCII on the relay port:
//! - Client → Server: `RELAY <device-id>`, device-id in `[A-Z0-9-]+`
//! - Server → Client: `OK\r\n`, `DEVICE UNKNOWN\r\n` or `CONNECTION FAILED\r\n`
//!
//! After `OK` the socket is a transparent pipe to the target; the secure
//! handshake happens end to end through it, so the relay never sees
//! plaintext.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod limits;
pub mod protocol;
pub mod server;
pub mod session;

pub use client::RelayClient;
pub use config::RelayConfig;
pub use error::{ProtocolError, RelayError};
pub use protocol::{RelayRequest, RelayResponse, RELAY_PORT};
pub use server::{PeerDirectory, RelayMetrics, RelayServer};
