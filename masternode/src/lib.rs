//! Govnode Masternode Module
//!
//! Masternode identity and liveness: announcements, pings, the lifecycle
//! state machine, deterministic scoring and the registry that ties them
//! together.

pub mod active;
pub mod broadcast;
pub mod error;
pub mod manager;
pub mod ping;
pub mod types;

pub use active::{ActiveMasternode, ActiveStatus, LocalVoter};
pub use broadcast::MasternodeBroadcast;
pub use error::{MasternodeError, Result};
pub use manager::MasternodeManager;
pub use ping::MasternodePing;
pub use types::{CollateralStatus, Masternode, MasternodeState};

/// Masternode module version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
