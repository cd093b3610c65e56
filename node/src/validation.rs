//! Block reward checks offered to the host chain
//!
//! Superblock heights pay the winning finalized budget; every other block
//! pays the elected masternode. Both checks are only enforced once the node
//! has finished syncing and the matching enforcement spork is on.

use govnode_consensus::MasternodePayments;
use govnode_core::{
    Amount, ChainParams, Script, Spork, SporkPolicy, SuperblockSchedule, SyncProgress, Transaction,
};
use govnode_treasury::{BudgetManager, TrxValidationStatus};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct BlockRewards {
    params: ChainParams,
    sporks: Arc<dyn SporkPolicy>,
    sync: Arc<dyn SyncProgress>,
    payments: Arc<MasternodePayments>,
    budget: Arc<BudgetManager>,
}

impl BlockRewards {
    pub fn new(
        params: ChainParams,
        sporks: Arc<dyn SporkPolicy>,
        sync: Arc<dyn SyncProgress>,
        payments: Arc<MasternodePayments>,
        budget: Arc<BudgetManager>,
    ) -> Self {
        Self {
            params,
            sporks,
            sync,
            payments,
            budget,
        }
    }

    fn superblocks_enabled(&self) -> bool {
        self.sporks.is_active(Spork::EnableSuperblocks)
    }

    /// Check the reward transaction of the block at `height`
    pub fn is_block_payee_valid(&self, tx: &Transaction, height: i64) -> bool {
        if !self.sync.is_synced() {
            debug!(height, "client not synced, skipping block payee checks");
            return true;
        }

        if self.superblocks_enabled() && self.budget.is_budget_payment_block(height) {
            match self.budget.is_transaction_valid(tx, height) {
                TrxValidationStatus::Valid => return true,
                TrxValidationStatus::Invalid => {
                    warn!(height, "invalid budget payment detected");
                    if self.sporks.is_active(Spork::BudgetEnforcement) {
                        return false;
                    }
                    debug!("budget enforcement is disabled, accepting block");
                }
                // a masternode gets paid instead
                TrxValidationStatus::DoublePayment | TrxValidationStatus::VoteThreshold => {}
            }
        }

        if self.payments.is_transaction_valid(tx, height) {
            return true;
        }
        warn!(height, "invalid masternode payment detected");
        if self.sporks.is_active(Spork::MasternodePaymentEnforcement) {
            return false;
        }
        debug!("masternode payment enforcement is disabled, accepting block");
        true
    }

    /// Check the value minted by the block at `height`
    pub fn is_block_value_valid(&self, height: i64, expected: Amount, minted: Amount) -> bool {
        if !self.sync.is_synced() {
            // superblocks always fall in the first blocks of a cycle
            if height % self.params.budget_cycle_blocks < 100 {
                return true;
            }
            return minted <= expected;
        }

        if !self.superblocks_enabled() {
            return minted <= expected;
        }
        if self.budget.is_budget_payment_block(height) {
            return true;
        }
        minted <= expected
    }

    /// Add the owed payment to a new coinbase or coinstake for the block
    /// after `tip`
    pub fn fill_block_payee(
        &self,
        tip: i64,
        tx: &mut Transaction,
        fees: Amount,
        proof_of_stake: bool,
    ) -> Option<Script> {
        if self.is_budget_block(tip + 1) {
            self.budget
                .fill_block_payee(tx, fees, proof_of_stake)
                .map(|(payee, _)| payee)
        } else {
            self.payments.fill_block_payee(tx, fees, proof_of_stake)
        }
    }

    pub fn required_payments_string(&self, height: i64) -> String {
        if self.is_budget_block(height) {
            self.budget.required_payments_string(height)
        } else {
            self.payments.required_payments_string(height)
        }
    }

    fn is_budget_block(&self, height: i64) -> bool {
        self.superblocks_enabled() && self.budget.is_budget_payment_block(height)
    }
}

impl SuperblockSchedule for BlockRewards {
    fn is_budget_payment_block(&self, height: i64) -> bool {
        self.is_budget_block(height)
    }
}
