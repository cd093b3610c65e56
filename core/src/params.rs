//! Per-network chain parameters

use crate::types::{Amount, COIN};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current protocol version spoken by this node
pub const PROTOCOL_VERSION: u32 = 70920;

/// Peers below this version get no DoS penalty for old-format announcements
pub const MIN_PEER_MNANNOUNCE: u32 = 70913;

/// Minimum protocol a masternode must run to be paid or to vote
pub const MIN_PAYMENTS_PROTOCOL: u32 = PROTOCOL_VERSION - 1;

pub const MAINNET_PORT: u16 = 23511;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Main,
    Test,
    Regtest,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Main => "main",
            Network::Test => "test",
            Network::Regtest => "regtest",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Ok(Network::Main),
            "test" | "testnet" => Ok(Network::Test),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainParams {
    pub network: Network,
    /// Network magic bytes, also written into every cache file
    pub magic: [u8; 4],
    pub default_port: u16,
    /// Seconds between blocks
    pub target_spacing: i64,
    /// Blocks per budget payment cycle
    pub budget_cycle_blocks: i64,
    /// Confirmations a budget fee transaction needs
    pub budget_fee_confirmations: i64,
    /// Age a proposal needs before it can pass
    pub proposal_establishment_secs: i64,
    /// Blocks before the next cycle start in which finalization begins
    pub finalization_window: i64,
    pub masternode_collateral: Amount,
    pub last_pow_block: i64,
}

impl ChainParams {
    pub fn main() -> Self {
        let budget_cycle_blocks = 14 * 24 * 60 * 60 / 60;
        Self {
            network: Network::Main,
            magic: [0x90, 0xc4, 0xfd, 0xe9],
            default_port: MAINNET_PORT,
            target_spacing: 60,
            budget_cycle_blocks,
            budget_fee_confirmations: 6,
            proposal_establishment_secs: 24 * 60 * 60,
            finalization_window: budget_cycle_blocks / 14 * 2,
            masternode_collateral: 100_000 * COIN,
            last_pow_block: 259_200,
        }
    }

    pub fn test() -> Self {
        let spacing = 60;
        Self {
            network: Network::Test,
            magic: [0x45, 0x76, 0x65, 0xba],
            default_port: 23513,
            target_spacing: spacing,
            budget_cycle_blocks: 24 * 6 * 60 / spacing,
            budget_fee_confirmations: 3,
            proposal_establishment_secs: 5 * 60,
            finalization_window: 64,
            masternode_collateral: 100_000 * COIN,
            last_pow_block: 200,
        }
    }

    pub fn regtest() -> Self {
        let spacing = 60;
        let budget_cycle_blocks = 24 * 6 * 60 / spacing;
        Self {
            network: Network::Regtest,
            magic: [0xa1, 0xcf, 0x7e, 0xac],
            default_port: 23515,
            target_spacing: spacing,
            budget_cycle_blocks,
            budget_fee_confirmations: 3,
            proposal_establishment_secs: 5 * 60,
            finalization_window: budget_cycle_blocks / 14 * 2,
            masternode_collateral: 100_000 * COIN,
            last_pow_block: 250,
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Main => Self::main(),
            Network::Test => Self::test(),
            Network::Regtest => Self::regtest(),
        }
    }

    pub fn is_mainnet(&self) -> bool {
        self.network == Network::Main
    }

    pub fn is_regtest(&self) -> bool {
        self.network == Network::Regtest
    }

    /// First height of the cycle after the one containing `height`
    pub fn next_cycle_start(&self, height: i64) -> i64 {
        height - height % self.budget_cycle_blocks + self.budget_cycle_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_lengths() {
        assert_eq!(ChainParams::main().budget_cycle_blocks, 20160);
        assert_eq!(ChainParams::test().budget_cycle_blocks, 144);
        assert_eq!(ChainParams::main().finalization_window, 2880);
        assert_eq!(ChainParams::test().finalization_window, 64);
        assert_eq!(ChainParams::regtest().finalization_window, 20);
    }

    #[test]
    fn test_next_cycle_start() {
        let params = ChainParams::test();
        assert_eq!(params.next_cycle_start(0), 144);
        assert_eq!(params.next_cycle_start(143), 144);
        assert_eq!(params.next_cycle_start(144), 288);
    }

    #[test]
    fn test_network_parse() {
        assert_eq!("mainnet".parse::<Network>(), Ok(Network::Main));
        assert_eq!("regtest".parse::<Network>(), Ok(Network::Regtest));
        assert!("foo".parse::<Network>().is_err());
    }
}
