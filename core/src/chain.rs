//! Collaborators the governance layer reads from: the block chain, the
//! clock, feature switches, sync progress and the local wallet

use crate::error::Result;
use crate::hash::Hash256;
use crate::types::{Amount, Coin, OutPoint, PubKey, SecretKey, Transaction};
use serde::{Deserialize, Serialize};

/// Read-only view of the active chain
pub trait ChainView: Send + Sync {
    /// Height of the active tip, `None` before genesis is connected
    fn tip_height(&self) -> Option<i64>;

    fn block_hash(&self, height: i64) -> Option<Hash256>;

    fn block_height(&self, hash: &Hash256) -> Option<i64>;

    fn block_time(&self, height: i64) -> Option<i64>;

    fn unspent_output(&self, outpoint: &OutPoint) -> Option<Coin>;

    /// Transaction and the height of the block containing it, if mined
    fn transaction(&self, txid: &Hash256) -> Option<(Transaction, Option<i64>)>;

    fn block_subsidy(&self, height: i64, proof_of_stake: bool) -> Amount;

    /// Share of `block_value` owed to the masternode at `height`
    fn masternode_payment(&self, height: i64, block_value: Amount) -> Amount;

    /// Confirmations of an outpoint's funding output, 0 when unknown or spent
    fn input_age(&self, outpoint: &OutPoint) -> i64 {
        match (self.unspent_output(outpoint), self.tip_height()) {
            (Some(coin), Some(tip)) => tip - coin.height + 1,
            _ => 0,
        }
    }
}

/// Network-wide feature switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Spork {
    MasternodePaymentEnforcement,
    BudgetEnforcement,
    EnableSuperblocks,
    PayUpdatedNodes,
}

pub trait SporkPolicy: Send + Sync {
    fn is_active(&self, spork: Spork) -> bool;
}

/// Which heights pay a finalized budget instead of a masternode
pub trait SuperblockSchedule: Send + Sync {
    fn is_budget_payment_block(&self, height: i64) -> bool;
}

/// Network-adjusted wall clock, in unix seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Sync progress as tracked by the network layer
pub trait SyncProgress: Send + Sync {
    fn is_blockchain_synced(&self) -> bool;

    fn is_masternode_list_synced(&self) -> bool;

    /// Budget objects have been fetched from peers
    fn is_budget_synced(&self) -> bool;

    fn is_synced(&self) -> bool;

    /// A masternode announcement was accepted or was already known
    fn added_masternode_list(&self) {}

    fn added_masternode_winner(&self) {}

    fn added_budget_item(&self) {}
}

/// A wallet output that can back a masternode
#[derive(Debug, Clone)]
pub struct CollateralCandidate {
    pub outpoint: OutPoint,
    pub pubkey: PubKey,
    pub secret: SecretKey,
}

pub trait Wallet: Send + Sync {
    fn collateral_outputs(&self, amount: Amount) -> Vec<CollateralCandidate>;

    /// Create and commit an `OP_RETURN <hash>` transaction paying `fee`,
    /// returning its txid
    fn create_budget_collateral(&self, hash: &Hash256, fee: Amount) -> Result<Hash256>;
}
