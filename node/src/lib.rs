//! Govnode Node
//!
//! Runs the governance layer inside a host node: configuration, logging,
//! component wiring, the periodic driver and the block reward checks the
//! host calls while validating and creating blocks.

pub mod config;
pub mod driver;
pub mod logging;
pub mod services;
pub mod validation;

pub use config::{ConfigError, NodeConfig, DUMP_SECONDS};
pub use driver::{Driver, MAINTENANCE_TICKS, VOTE_AHEAD_BLOCKS};
pub use services::{CacheFiles, Collaborators, GovernanceNode};
pub use validation::BlockRewards;

/// Node version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
