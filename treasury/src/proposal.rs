//! Budget proposals
//!
//! A proposal asks for `amount` per cycle, paid to `payee` for every cycle
//! between `block_start` and `block_end`. Masternodes vote on it; the ones
//! with the widest net support fit into each cycle's budget.

use crate::collateral::{check_collateral, CollateralStatus};
use crate::cycle::{Validation, MAX_BUDGET_PAYMENTS};
use crate::error::{BudgetError, Result};
use crate::vote::{check_vote_update, BudgetVote, VoteOutcome};
use govnode_core::{Amount, Hash256, HashWriter, OutPoint, Script, COIN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_PROPOSAL_AMOUNT: Amount = 10 * COIN;
pub const MAX_PROPOSAL_NAME_LEN: usize = 20;
pub const MAX_PROPOSAL_URL_LEN: usize = 64;

fn proposal_hash(
    name: &str,
    url: &str,
    block_start: i64,
    block_end: i64,
    amount: Amount,
    payee: &Script,
) -> Hash256 {
    HashWriter::new()
        .write_str(name)
        .write_str(url)
        .write_i64(block_start)
        .write_i64(block_end)
        .write_i64(amount)
        .write_bytes(payee.as_bytes())
        .finish()
}

/// `mprop`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalBroadcast {
    pub name: String,
    pub url: String,
    pub block_start: i64,
    pub block_end: i64,
    pub payee: Script,
    pub amount: Amount,
    pub fee_txid: Hash256,
    /// Time of the block holding the fee, filled in by collateral checks
    pub time: i64,
}

impl ProposalBroadcast {
    /// Proposal paying `amount` for `payment_count` cycles from the cycle
    /// containing `block_start`
    #[allow(clippy::too_many_arguments)]
    pub fn with_payment_count(
        name: &str,
        url: &str,
        payment_count: i64,
        payee: Script,
        amount: Amount,
        block_start: i64,
        fee_txid: Hash256,
        cycle_blocks: i64,
    ) -> Result<Self> {
        if name.len() > MAX_PROPOSAL_NAME_LEN {
            return Err(BudgetError::invalid(format!(
                "Invalid proposal name, limit of {} characters",
                MAX_PROPOSAL_NAME_LEN
            )));
        }
        if url.len() > MAX_PROPOSAL_URL_LEN {
            return Err(BudgetError::invalid(format!(
                "Invalid url, limit of {} characters",
                MAX_PROPOSAL_URL_LEN
            )));
        }
        if payment_count < 1 || payment_count > MAX_BUDGET_PAYMENTS {
            return Err(BudgetError::invalid("Invalid payment count, must be more than zero"));
        }
        let cycle_start = block_start - block_start % cycle_blocks;
        // ends one cycle after the last payment so it is dropped only then
        let block_end = cycle_start + (cycle_blocks + 1) * payment_count;
        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            block_start,
            block_end,
            payee,
            amount,
            fee_txid,
            time: 0,
        })
    }

    pub fn hash(&self) -> Hash256 {
        proposal_hash(
            &self.name,
            &self.url,
            self.block_start,
            self.block_end,
            self.amount,
            &self.payee,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetProposal {
    pub name: String,
    pub url: String,
    pub block_start: i64,
    pub block_end: i64,
    pub payee: Script,
    pub amount: Amount,
    pub fee_txid: Hash256,
    pub time: i64,
    /// Last vote per masternode collateral
    pub votes: BTreeMap<OutPoint, BudgetVote>,
    pub valid: bool,
    /// Amount granted by the last budget selection
    pub allotted: Amount,
}

impl From<&ProposalBroadcast> for BudgetProposal {
    fn from(b: &ProposalBroadcast) -> Self {
        Self {
            name: b.name.clone(),
            url: b.url.clone(),
            block_start: b.block_start,
            block_end: b.block_end,
            payee: b.payee.clone(),
            amount: b.amount,
            fee_txid: b.fee_txid,
            time: b.time,
            votes: BTreeMap::new(),
            valid: true,
            allotted: 0,
        }
    }
}

impl From<&BudgetProposal> for ProposalBroadcast {
    fn from(p: &BudgetProposal) -> Self {
        Self {
            name: p.name.clone(),
            url: p.url.clone(),
            block_start: p.block_start,
            block_end: p.block_end,
            payee: p.payee.clone(),
            amount: p.amount,
            fee_txid: p.fee_txid,
            time: p.time,
        }
    }
}

impl BudgetProposal {
    /// Content hash; votes and local flags are not part of it
    pub fn hash(&self) -> Hash256 {
        proposal_hash(
            &self.name,
            &self.url,
            self.block_start,
            self.block_end,
            self.amount,
            &self.payee,
        )
    }

    /// Full validity check. Collateral checks refresh `time`.
    pub fn is_valid(&mut self, v: &Validation) -> Result<()> {
        let name = &self.name;
        if self.nays() - self.yeas() > (v.enabled / 10) as i64 {
            return Err(BudgetError::invalid(format!("Proposal {}: Active removal", name)));
        }
        if self.block_start < 0 {
            return Err(BudgetError::invalid("Invalid Proposal"));
        }
        if self.block_end < self.block_start {
            return Err(BudgetError::invalid(format!(
                "Proposal {}: Invalid nBlockEnd (end before start)",
                name
            )));
        }
        if self.amount < MIN_PROPOSAL_AMOUNT {
            return Err(BudgetError::invalid(format!("Proposal {}: Invalid nAmount", name)));
        }
        if self.payee.is_empty() {
            return Err(BudgetError::invalid(format!(
                "Proposal {}: Invalid Payment Address",
                name
            )));
        }
        if v.check_collateral {
            match check_collateral(&v.cycle, &self.fee_txid, &self.hash(), false) {
                CollateralStatus::Valid { time, .. } => self.time = time,
                CollateralStatus::Invalid { reason, .. } => {
                    return Err(BudgetError::invalid(format!(
                        "Proposal {}: Invalid collateral ({})",
                        self.name, reason
                    )));
                }
            }
        }
        let name = &self.name;
        if self.payee.is_pay_to_script_hash() {
            return Err(BudgetError::invalid(format!(
                "Proposal {}: Multisig is not currently supported.",
                name
            )));
        }
        // at most a tenth of what the cycle mints
        if self.amount > v.cycle.total_budget(self.block_start) {
            return Err(BudgetError::invalid(format!(
                "Proposal {}: Payment more than max",
                name
            )));
        }
        if let Some(tip) = v.tip {
            let cycle = v.cycle.blocks();
            let proposal_end = self.block_start + cycle * self.total_payment_count(cycle);
            if proposal_end < tip {
                return Err(BudgetError::invalid(format!(
                    "Proposal {}: Invalid nBlockEnd ({}) < current height ({})",
                    name, proposal_end, tip
                )));
            }
        }
        Ok(())
    }

    /// Old enough for every node to have seen it
    pub fn is_established(&self, now: i64, establishment_secs: i64) -> bool {
        self.time < now - establishment_secs
    }

    /// Covers the whole budget window and has enough net support
    pub fn is_passing(
        &self,
        tip: Option<i64>,
        budget_start: i64,
        budget_end: i64,
        mn_count: usize,
        now: i64,
        establishment_secs: i64,
    ) -> bool {
        self.valid
            && tip.is_some()
            && self.block_start <= budget_start
            && self.block_end >= budget_end
            && self.yeas() - self.nays() > (mn_count / 10) as i64
            && self.is_established(now, establishment_secs)
    }

    /// Replace the masternode's previous vote, if allowed
    pub fn add_or_update_vote(&mut self, vote: &BudgetVote, now: i64) -> Result<()> {
        let existing = self.votes.get(&vote.vin).map(|v| v.time);
        check_vote_update(existing, vote.time, now, &vote.hash())?;
        self.votes.insert(vote.vin, vote.clone());
        Ok(())
    }

    /// Only votes from masternodes still in the registry count
    pub fn clean_and_remove(&mut self, is_known: impl Fn(&OutPoint) -> bool) {
        for vote in self.votes.values_mut() {
            vote.valid = is_known(&vote.vin);
        }
    }

    fn count(&self, outcome: VoteOutcome) -> i64 {
        self.votes
            .values()
            .filter(|v| v.valid && v.outcome == outcome)
            .count() as i64
    }

    pub fn yeas(&self) -> i64 {
        self.count(VoteOutcome::Yes)
    }

    pub fn nays(&self) -> i64 {
        self.count(VoteOutcome::No)
    }

    pub fn abstains(&self) -> i64 {
        self.count(VoteOutcome::Abstain)
    }

    /// Share of yes among yes and no, counting every stored vote
    pub fn ratio(&self) -> f64 {
        let yeas = self
            .votes
            .values()
            .filter(|v| v.outcome == VoteOutcome::Yes)
            .count();
        let nays = self
            .votes
            .values()
            .filter(|v| v.outcome == VoteOutcome::No)
            .count();
        if yeas + nays == 0 {
            return 0.0;
        }
        yeas as f64 / (yeas + nays) as f64
    }

    pub fn block_start_cycle(&self, cycle: i64) -> i64 {
        self.block_start - self.block_start % cycle
    }

    /// Start of the cycle `tip` is in, while the proposal is still running
    pub fn block_current_cycle(&self, tip: i64, cycle: i64) -> Option<i64> {
        if tip >= self.block_end {
            return None;
        }
        Some(tip - tip % cycle)
    }

    pub fn total_payment_count(&self, cycle: i64) -> i64 {
        (self.block_end - self.block_start_cycle(cycle)) / cycle
    }

    pub fn remaining_payment_count(&self, tip: i64, cycle: i64) -> i64 {
        match self.block_current_cycle(tip, cycle) {
            Some(current) => {
                let payments = (self.block_end - current) / cycle - 1;
                payments.min(self.total_payment_count(cycle))
            }
            None => 0,
        }
    }
}
