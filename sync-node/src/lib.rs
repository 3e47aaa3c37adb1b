//! # sync-node
//!
//! Connection layer of a peersync device.
//!
//! Turns TCP sockets into verified, deduplicated and rate-limited peer
//! connections, keeps trying to reach every configured device, and falls
//! back to a single-hop relay through an already connected device when a
//! direct connection fails.
//!
//! ```text
//!  Listener (per address) ─┐
//!                          ├─► mpsc ─► Supervisor ─► ConnectionTable ─► sync layer
//!  Dialer ─────────────────┘                              │
//!    └─ on failure: RelayClient ──► peer's RelayServer    └─► RelayServer (ours)
//! ```
//!
//! The supervisor is the channel's only consumer. Admission checks run one
//! connection at a time, so no lock guards the duplicate check.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bandwidth;
pub mod classify;
pub mod config;
pub mod connection;
pub mod context;
pub mod dialer;
pub mod discovery;
pub mod error;
pub mod events;
pub mod listener;
pub mod node;
pub mod registry;
pub mod relay;
pub mod socket;
pub mod supervisor;
pub mod tls;

pub use config::{AddressSpec, Config, ConfigError, DeviceConfig};
pub use connection::{PeerConnection, RawConnection};
pub use context::NodeContext;
pub use dialer::{normalize_address, Backoff, Dialer};
pub use error::NodeError;
pub use registry::{ConnectionRecord, ConnectionTable};
pub use supervisor::{Admission, Rejection, Supervisor};
pub use tls::{TlsIdentity, TlsSetup};
