//! Govnode Core Library
//!
//! Shared primitives for the masternode governance layer: hashes, outpoints,
//! scripts, chain parameters, collaborator traits and cache framing.

pub mod chain;
pub mod error;
pub mod gossip;
pub mod hash;
pub mod params;
pub mod persist;
pub mod signer;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export main types
pub use chain::{
    ChainView, Clock, CollateralCandidate, Spork, SporkPolicy, SuperblockSchedule, SyncProgress,
    SystemClock, Wallet,
};
pub use error::{CoreError, ReadResult, SignerError, SnapshotError};
pub use gossip::{InvKind, Inventory, Outbound, Outbox, PeerId, QueueOutbox, SyncItem};
pub use hash::{sha256d, Hash256, HashWriter};
pub use params::{ChainParams, Network, MIN_PAYMENTS_PROTOCOL, PROTOCOL_VERSION};
pub use persist::SnapshotFile;
pub use signer::MessageSigner;
pub use types::{Amount, Coin, KeyId, OutPoint, PubKey, Script, SecretKey, Transaction, TxOut, COIN};
