//! Finalized budgets
//!
//! A finalized budget fixes the payments of one cycle: one proposal per
//! block starting at the cycle's first block. Masternodes vote on the
//! finalized budgets that match their own view of the budget, and blocks in
//! the cycle must pay according to the most voted one.

use crate::collateral::{check_collateral, CollateralStatus};
use crate::cycle::{Validation, MAX_BUDGET_PAYMENTS};
use crate::error::{BudgetError, Result};
use crate::proposal::BudgetProposal;
use crate::vote::{check_vote_update, FinalizedBudgetVote};
use govnode_core::{Amount, Hash256, HashWriter, OutPoint, Script, Transaction};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Outcome of checking a block's payments against finalized budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrxValidationStatus {
    /// No budget payment found in the block
    Invalid,
    Valid,
    /// The proposal was already paid in this cycle
    DoublePayment,
    /// No finalized budget has enough votes
    VoteThreshold,
}

impl fmt::Display for TrxValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrxValidationStatus::Invalid => "Invalid",
            TrxValidationStatus::Valid => "Valid",
            TrxValidationStatus::DoublePayment => "DoublePayment",
            TrxValidationStatus::VoteThreshold => "VoteThreshold",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetPayment {
    pub proposal_hash: Hash256,
    pub payee: Script,
    pub amount: Amount,
}

impl BudgetPayment {
    pub fn new(proposal_hash: Hash256, payee: Script, amount: Amount) -> Self {
        Self {
            proposal_hash,
            payee,
            amount,
        }
    }
}

fn budget_hash(name: &str, block_start: i64, payments: &[BudgetPayment]) -> Hash256 {
    let mut w = HashWriter::new();
    w.write_str(name)
        .write_i64(block_start)
        .write_u32(payments.len() as u32);
    for p in payments {
        w.write_hash(&p.proposal_hash)
            .write_bytes(p.payee.as_bytes())
            .write_i64(p.amount);
    }
    w.finish()
}

/// `fbs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedBudgetBroadcast {
    pub name: String,
    pub block_start: i64,
    pub payments: Vec<BudgetPayment>,
    pub fee_txid: Hash256,
    pub time: i64,
}

impl FinalizedBudgetBroadcast {
    pub fn new(name: &str, block_start: i64, payments: Vec<BudgetPayment>, fee_txid: Hash256) -> Self {
        Self {
            name: name.to_string(),
            block_start,
            payments,
            fee_txid,
            time: 0,
        }
    }

    pub fn hash(&self) -> Hash256 {
        budget_hash(&self.name, self.block_start, &self.payments)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedBudget {
    pub name: String,
    pub block_start: i64,
    pub payments: Vec<BudgetPayment>,
    pub fee_txid: Hash256,
    pub time: i64,
    pub votes: BTreeMap<OutPoint, FinalizedBudgetVote>,
    pub valid: bool,
    /// The local masternode already considered voting on it
    #[serde(skip)]
    pub auto_checked: bool,
    /// Proposal payments seen in blocks of this cycle
    #[serde(skip)]
    payment_history: HashMap<Hash256, i64>,
}

impl From<&FinalizedBudgetBroadcast> for FinalizedBudget {
    fn from(b: &FinalizedBudgetBroadcast) -> Self {
        Self {
            name: b.name.clone(),
            block_start: b.block_start,
            payments: b.payments.clone(),
            fee_txid: b.fee_txid,
            time: b.time,
            votes: BTreeMap::new(),
            valid: true,
            auto_checked: false,
            payment_history: HashMap::new(),
        }
    }
}

impl From<&FinalizedBudget> for FinalizedBudgetBroadcast {
    fn from(b: &FinalizedBudget) -> Self {
        Self {
            name: b.name.clone(),
            block_start: b.block_start,
            payments: b.payments.clone(),
            fee_txid: b.fee_txid,
            time: b.time,
        }
    }
}

impl FinalizedBudget {
    pub fn hash(&self) -> Hash256 {
        budget_hash(&self.name, self.block_start, &self.payments)
    }

    /// Last block paying this budget
    pub fn block_end(&self) -> i64 {
        self.block_start + self.payments.len() as i64 - 1
    }

    pub fn covers(&self, height: i64) -> bool {
        height >= self.block_start && height <= self.block_end()
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    pub fn total_payout(&self) -> Amount {
        self.payments.iter().map(|p| p.amount).sum()
    }

    pub fn payment_by_block(&self, height: i64) -> Option<&BudgetPayment> {
        let index = height - self.block_start;
        if index < 0 {
            return None;
        }
        self.payments.get(index as usize)
    }

    pub fn payee_and_amount(&self, height: i64) -> Option<(Script, Amount)> {
        self.payment_by_block(height)
            .map(|p| (p.payee.clone(), p.amount))
    }

    pub fn is_valid(&mut self, v: &Validation) -> Result<()> {
        let cycle = v.cycle.blocks();
        if self.block_start % cycle != 0 {
            return Err(BudgetError::invalid("Invalid BlockStart"));
        }
        if self.block_end() - self.block_start > MAX_BUDGET_PAYMENTS {
            return Err(BudgetError::invalid("Invalid BlockEnd"));
        }
        if self.payments.len() as i64 > MAX_BUDGET_PAYMENTS {
            return Err(BudgetError::invalid("Invalid budget payments count (too many)"));
        }
        if self.name.is_empty() {
            return Err(BudgetError::invalid("Invalid Budget Name"));
        }
        if self.block_start == 0 {
            return Err(BudgetError::invalid(format!(
                "Budget {} Invalid BlockStart == 0",
                self.name
            )));
        }
        if self.fee_txid.is_null() {
            return Err(BudgetError::invalid(format!("Budget {} Invalid FeeTx == 0", self.name)));
        }
        if self.total_payout() > v.cycle.total_budget(self.block_start) {
            return Err(BudgetError::invalid(format!(
                "Budget {} Invalid Payout (more than max)",
                self.name
            )));
        }
        if v.check_collateral {
            match check_collateral(&v.cycle, &self.fee_txid, &self.hash(), true) {
                CollateralStatus::Valid { time, .. } => self.time = time,
                CollateralStatus::Invalid { reason, .. } => {
                    return Err(BudgetError::invalid(format!(
                        "Budget {} Invalid Collateral : {}",
                        self.name, reason
                    )));
                }
            }
        }
        if let Some(tip) = v.tip {
            // keep budgets until two cycles after their last payment
            let max_age = v.cycle.next_start(tip) - 2 * cycle;
            if self.block_end() < max_age {
                return Err(BudgetError::invalid(format!(
                    "Budget {} (ends at block {}) too old and obsolete",
                    self.name,
                    self.block_end()
                )));
            }
        }
        Ok(())
    }

    pub fn add_or_update_vote(&mut self, vote: &FinalizedBudgetVote, now: i64) -> Result<()> {
        let existing = self.votes.get(&vote.vin).map(|v| v.time);
        check_vote_update(existing, vote.time, now, &vote.hash())?;
        self.votes.insert(vote.vin, vote.clone());
        Ok(())
    }

    pub fn clean_and_remove(&mut self, is_known: impl Fn(&OutPoint) -> bool) {
        for vote in self.votes.values_mut() {
            vote.valid = is_known(&vote.vin);
        }
    }

    /// Whether the payments are exactly `proposals` by hash, payee and amount
    pub fn matches(&self, proposals: &[BudgetProposal]) -> bool {
        if proposals.is_empty() {
            debug!(target: "mnbudget", "CheckAndVote - No proposals to check against");
            return false;
        }
        if proposals.len() != self.payments.len() {
            debug!(
                target: "mnbudget",
                "CheckAndVote - Budget proposal length mismatch {} {}",
                proposals.len(),
                self.payments.len()
            );
            return false;
        }

        let mut ours: Vec<(Hash256, &Script, Amount)> = proposals
            .iter()
            .map(|p| (p.hash(), &p.payee, p.amount))
            .collect();
        ours.sort_by(|a, b| a.0.cmp(&b.0));
        let mut theirs: Vec<&BudgetPayment> = self.payments.iter().collect();
        theirs.sort_by(|a, b| a.proposal_hash.cmp(&b.proposal_hash));

        for (i, (payment, (hash, payee, amount))) in theirs.iter().zip(ours.iter()).enumerate() {
            if payment.proposal_hash != *hash {
                debug!(target: "mnbudget", "CheckAndVote - item #{} doesn't match {} {}", i, payment.proposal_hash, hash);
                return false;
            }
            if &payment.payee != *payee {
                debug!(target: "mnbudget", "CheckAndVote - item #{} payee doesn't match", i);
                return false;
            }
            if payment.amount != *amount {
                debug!(
                    target: "mnbudget",
                    "CheckAndVote - item #{} payment amount doesn't match {} {}",
                    i,
                    payment.amount,
                    amount
                );
                return false;
            }
        }
        true
    }

    /// Record a payment of `proposal_hash` at `height`. True when it was
    /// already paid in this cycle.
    pub fn is_paid_already(&mut self, proposal_hash: &Hash256, height: i64) -> bool {
        let (start, end) = (self.block_start, self.block_end());
        self.payment_history.retain(|hash, paid_at| {
            let keep = *paid_at >= start && *paid_at <= end;
            if !keep {
                debug!(
                    target: "mnbudget",
                    "IsPaidAlready - Budget Proposal {}, Block {} from old cycle deleted",
                    hash,
                    paid_at
                );
            }
            keep
        });

        if self.payment_history.contains_key(proposal_hash) {
            return true;
        }
        self.payment_history.insert(*proposal_hash, height);
        false
    }

    pub fn is_transaction_valid(&mut self, tx: &Transaction, height: i64) -> TrxValidationStatus {
        let payment = match self.payment_by_block(height) {
            Some(payment) => payment.clone(),
            None => {
                debug!(
                    target: "mnbudget",
                    "IsTransactionValid - Invalid block {} for budget starting at {}",
                    height,
                    self.block_start
                );
                return TrxValidationStatus::Invalid;
            }
        };

        let mut status = TrxValidationStatus::Invalid;
        for out in &tx.outputs {
            if out.script == payment.payee && out.value == payment.amount {
                if self.is_paid_already(&payment.proposal_hash, height) {
                    debug!(
                        target: "mnbudget",
                        "IsTransactionValid - Double Budget Payment of {} for proposal {} detected",
                        payment.amount,
                        payment.proposal_hash
                    );
                    // one double payment disables budget payments for the block
                    return TrxValidationStatus::DoublePayment;
                }
                status = TrxValidationStatus::Valid;
            }
        }
        if status == TrxValidationStatus::Invalid {
            debug!(
                target: "mnbudget",
                "IsTransactionValid - Missing required payment - {}: {} c: {}",
                payment.payee.to_address(),
                payment.amount,
                height - self.block_start
            );
        }
        status
    }

    /// Names (or hashes, when unknown) of the paid proposals
    pub fn proposals_string(&self, name_of: impl Fn(&Hash256) -> Option<String>) -> String {
        self.payments
            .iter()
            .map(|p| name_of(&p.proposal_hash).unwrap_or_else(|| p.proposal_hash.to_string()))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `"OK"`, or the payments that don't match a known proposal
    pub fn status(&self, find: impl Fn(&Hash256) -> Option<(Script, Amount)>) -> String {
        let mut unknown = Vec::new();
        let mut mismatched = Vec::new();
        for payment in &self.payments {
            match find(&payment.proposal_hash) {
                None => unknown.push(payment.proposal_hash.to_string()),
                Some((payee, amount)) => {
                    if payee != payment.payee || amount != payment.amount {
                        mismatched.push(payment.proposal_hash.to_string());
                    }
                }
            }
        }
        if unknown.is_empty() && mismatched.is_empty() {
            return "OK".to_string();
        }
        let mut ret = String::new();
        if !unknown.is_empty() {
            ret.push_str("Unknown proposal hash! Check this proposal before voting: ");
            ret.push_str(&unknown.join(","));
        }
        if !mismatched.is_empty() {
            ret.push_str("Budget payee/nAmount doesn't match our proposal! ");
            ret.push_str(&mismatched.join(","));
        }
        ret
    }
}
