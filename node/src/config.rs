//! Node configuration (`govnode.toml`)
//!
//! Example:
//!
//! ```toml
//! network = "test"
//! data_dir = "$HOME/.govnode"
//! masternode = true
//! masternode_privkey = "<64 hex chars>"
//! masternode_addr = "203.0.113.7:23513"
//! budget_mode = "suggest"
//! log_level = "info"
//! dump_interval_secs = 900
//! ```

use govnode_core::{ChainParams, Network, SecretKey};
use govnode_treasury::BudgetMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default seconds between cache dumps
pub const DUMP_SECONDS: u64 = 15 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid masternode_privkey: expected 64 hex characters")]
    InvalidPrivateKey,

    #[error("masternode = true requires masternode_privkey")]
    MissingPrivateKey,

    #[error("dump_interval_secs must be at least 1")]
    InvalidDumpInterval,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub network: Network,
    pub data_dir: PathBuf,
    /// Run the local masternode
    pub masternode: bool,
    /// Operator key, hex
    pub masternode_privkey: Option<String>,
    /// Public address announced for the local masternode
    pub masternode_addr: Option<SocketAddr>,
    pub budget_mode: BudgetMode,
    pub log_level: String,
    pub dump_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: Network::Main,
            data_dir: PathBuf::from(expand_path("$HOME/.govnode")),
            masternode: false,
            masternode_privkey: None,
            masternode_addr: None,
            budget_mode: BudgetMode::default(),
            log_level: "info".to_string(),
            dump_interval_secs: DUMP_SECONDS,
        }
    }
}

/// Substitute `$HOME` in a configured path
pub fn expand_path(path: &str) -> String {
    path.replace("$HOME", &std::env::var("HOME").unwrap_or_default())
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: NodeConfig = toml::from_str(contents)?;
        config.data_dir = PathBuf::from(expand_path(&config.data_dir.to_string_lossy()));
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dump_interval_secs == 0 {
            return Err(ConfigError::InvalidDumpInterval);
        }
        if self.masternode && self.masternode_privkey.is_none() {
            return Err(ConfigError::MissingPrivateKey);
        }
        self.operator_key()?;
        Ok(())
    }

    pub fn params(&self) -> ChainParams {
        ChainParams::for_network(self.network)
    }

    /// Operator key when running a masternode
    pub fn operator_key(&self) -> Result<Option<SecretKey>, ConfigError> {
        match &self.masternode_privkey {
            Some(hex) => SecretKey::from_hex(hex.trim())
                .map(Some)
                .ok_or(ConfigError::InvalidPrivateKey),
            None => Ok(None),
        }
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
