//! Masternode type definitions

use crate::ping::MasternodePing;
use govnode_core::{Amount, ChainView, Hash256, HashWriter, OutPoint, PubKey, Script};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Collateral confirmations before a masternode may be announced
pub const MIN_CONFIRMATIONS: i64 = 15;
/// Minimum gap between an announcement and its first valid ping
pub const MIN_MNP_SECONDS: i64 = 10 * 60;
/// Minimum gap between two announcements of the same masternode
pub const MIN_MNB_SECONDS: i64 = 5 * 60;
pub const PING_SECONDS: i64 = 5 * 60;
pub const EXPIRATION_SECONDS: i64 = 120 * 60;
pub const REMOVAL_SECONDS: i64 = 130 * 60;
pub const CHECK_SECONDS: i64 = 5;
pub const DSEG_SECONDS: i64 = 3 * 60 * 60;

/// Pings anchor to the block this far below the tip
pub const PING_ANCHOR_DEPTH: i64 = 12;
/// Oldest anchor a ping may reference, in blocks below the tip
pub const PING_MAX_ANCHOR_AGE: i64 = 24;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MasternodeState {
    PreEnabled,
    Enabled,
    Expired,
    OutpointSpent,
    Remove,
    WatchdogExpired,
    PoseBan,
    VinSpent,
}

impl MasternodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MasternodeState::PreEnabled => "PRE_ENABLED",
            MasternodeState::Enabled => "ENABLED",
            MasternodeState::Expired => "EXPIRED",
            MasternodeState::OutpointSpent => "OUTPOINT_SPENT",
            MasternodeState::Remove => "REMOVE",
            MasternodeState::WatchdogExpired => "WATCHDOG_EXPIRED",
            MasternodeState::PoseBan => "POSE_BAN",
            MasternodeState::VinSpent => "VIN_SPENT",
        }
    }
}

impl fmt::Display for MasternodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollateralStatus {
    Ok,
    UtxoNotFound,
    InvalidAmount,
}

/// Check the collateral output backing a masternode
pub fn collateral_status(
    chain: &dyn ChainView,
    outpoint: &OutPoint,
    required: Amount,
) -> CollateralStatus {
    match chain.unspent_output(outpoint) {
        None => CollateralStatus::UtxoNotFound,
        Some(coin) if coin.output.value != required => CollateralStatus::InvalidAmount,
        Some(_) => CollateralStatus::Ok,
    }
}

/// A masternode as held in the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Masternode {
    pub vin: OutPoint,
    pub addr: SocketAddr,
    pub pubkey_collateral: PubKey,
    pub pubkey_masternode: PubKey,
    pub signature: Vec<u8>,
    pub sig_time: i64,
    pub protocol_version: u32,
    pub last_ping: Option<MasternodePing>,
    pub state: MasternodeState,
    pub last_checked: i64,
}

impl Masternode {
    pub fn is_enabled(&self) -> bool {
        self.state == MasternodeState::Enabled
    }

    pub fn is_pre_enabled(&self) -> bool {
        self.state == MasternodeState::PreEnabled
    }

    pub fn status(&self) -> &'static str {
        self.state.as_str()
    }

    /// Script the collateral pays to, used as the payment payee
    pub fn payee(&self) -> Script {
        Script::pay_to_pubkey_hash(&self.pubkey_collateral)
    }

    /// Whether the last ping is younger than `seconds` at time `at`
    pub fn is_pinged_within(&self, seconds: i64, at: i64) -> bool {
        match &self.last_ping {
            None => false,
            Some(ping) => at - ping.sig_time < seconds,
        }
    }

    pub fn is_broadcasted_within(&self, seconds: i64, now: i64) -> bool {
        now - self.sig_time < seconds
    }

    /// Re-derive the lifecycle state
    pub fn check(&mut self, now: i64, force: bool, chain: &dyn ChainView, collateral: Amount) {
        if !force && now - self.last_checked < CHECK_SECONDS {
            return;
        }
        self.last_checked = now;

        // once spent, always spent
        if self.state == MasternodeState::VinSpent {
            return;
        }

        if !self.is_pinged_within(REMOVAL_SECONDS, now) {
            self.state = MasternodeState::Remove;
            return;
        }

        if !self.is_pinged_within(EXPIRATION_SECONDS, now) {
            self.state = MasternodeState::Expired;
            return;
        }

        let last_ping_time = self.last_ping.as_ref().map(|p| p.sig_time).unwrap_or(0);
        if last_ping_time - self.sig_time < MIN_MNP_SECONDS {
            self.state = MasternodeState::PreEnabled;
            return;
        }

        if collateral_status(chain, &self.vin, collateral) != CollateralStatus::Ok {
            self.state = MasternodeState::OutpointSpent;
            return;
        }

        self.state = MasternodeState::Enabled;
    }

    /// Deterministic score of this masternode for the block at `height`
    pub fn calculate_score(&self, height: i64, chain: &dyn ChainView) -> Hash256 {
        let block_hash = match chain.block_hash(height) {
            Some(hash) => hash,
            None => return Hash256::ZERO,
        };
        let aux = self.vin.txid.add_u32(self.vin.index);

        let h2 = HashWriter::new().write_hash(&block_hash).finish();
        let h3 = HashWriter::new()
            .write_hash(&block_hash)
            .write_hash(&aux)
            .finish();

        h3.abs_diff(&h2)
    }
}
