//! Govnode Network
//!
//! Gossip plumbing for the governance layer: wire messages and framing,
//! masternode sync progress, fulfilled-request tracking and inbound
//! dispatch into the registry, payment and budget components.

pub mod dispatch;
pub mod error;
pub mod fulfilled;
pub mod message;
pub mod sync;

pub use dispatch::Dispatcher;
pub use error::{NetworkError, Result};
pub use fulfilled::{FulfilledRequests, FULFILLED_EXPIRY_SECONDS};
pub use message::{read_message, write_message, Destination, WireMessage, MAX_PAYLOAD_SIZE};
pub use sync::{MasternodeSync, SyncStage, SYNC_THRESHOLD, SYNC_TIMEOUT_SECONDS};

/// Network version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
