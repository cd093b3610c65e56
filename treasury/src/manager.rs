//! Budget manager
//!
//! Owns every proposal and finalized budget this node knows about, admits
//! them and their votes from peers, decides which finalized budget pays a
//! superblock and, in "suggest" mode, proposes the next one itself.

use crate::collateral::{check_collateral, CollateralStatus, BUDGET_FEE_TX};
use crate::cycle::{BudgetTotals, Cycle, Validation};
use crate::error::{BudgetError, Result};
use crate::finalized::{
    BudgetPayment, FinalizedBudget, FinalizedBudgetBroadcast, TrxValidationStatus,
};
use crate::gate::VoteGate;
use crate::proposal::{BudgetProposal, ProposalBroadcast};
use crate::vote::{BudgetVote, FinalizedBudgetVote, VoteOutcome};
use govnode_core::gossip::report_misbehaving;
use govnode_core::{
    Amount, ChainParams, ChainView, Hash256, InvKind, Inventory, OutPoint, Outbound, PeerId,
    Script, SnapshotFile, SuperblockSchedule, SyncItem, SyncProgress, Transaction, TxOut, Wallet,
};
use govnode_masternode::{LocalVoter, MasternodeManager};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const CACHE_FILE_NAME: &str = "budget.dat";
pub const CACHE_MAGIC: &str = "MasternodeBudget";

/// Name of the finalized budget this node suggests
pub const FINAL_BUDGET_NAME: &str = "main";

/// Heavy maintenance runs on tips divisible by this
pub const NEW_BLOCK_INTERVAL: i64 = 14;

const ASKED_FOR_EXPIRY_SECONDS: i64 = 60 * 60 * 24;

/// How long a peer waits before it may ask for the full vote list again
pub const VOTE_SYNC_INTERVAL_SECONDS: i64 = 3 * 60 * 60;

/// What the local node does about finalized budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetMode {
    /// Never vote
    Off,
    /// Submit our own finalized budget near the end of each cycle
    #[default]
    Suggest,
    /// Vote on finalized budgets matching our own selection
    Auto,
}

impl BudgetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetMode::Off => "off",
            BudgetMode::Suggest => "suggest",
            BudgetMode::Auto => "auto",
        }
    }
}

impl FromStr for BudgetMode {
    type Err = BudgetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(BudgetMode::Off),
            "suggest" => Ok(BudgetMode::Suggest),
            "auto" => Ok(BudgetMode::Auto),
            other => Err(BudgetError::invalid(format!("Unknown budget mode '{}'", other))),
        }
    }
}

impl fmt::Display for BudgetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BudgetState {
    proposals: BTreeMap<Hash256, BudgetProposal>,
    finalized: BTreeMap<Hash256, FinalizedBudget>,
    seen_proposals: HashMap<Hash256, ProposalBroadcast>,
    seen_votes: HashMap<Hash256, BudgetVote>,
    /// Votes for objects we have not seen yet, by vote hash
    orphan_votes: HashMap<Hash256, BudgetVote>,
    seen_finalized: HashMap<Hash256, FinalizedBudgetBroadcast>,
    seen_finalized_votes: HashMap<Hash256, FinalizedBudgetVote>,
    orphan_finalized_votes: HashMap<Hash256, FinalizedBudgetVote>,
    /// Collateral we created for our own finalized budgets
    #[serde(skip)]
    collateral_txids: HashMap<Hash256, Hash256>,
    /// Object hashes we requested from peers, and when
    #[serde(skip)]
    asked_for: HashMap<Hash256, i64>,
    /// Waiting for collateral confirmations
    #[serde(skip)]
    immature_proposals: HashMap<Hash256, ProposalBroadcast>,
    #[serde(skip)]
    immature_finalized: HashMap<Hash256, FinalizedBudgetBroadcast>,
    /// Peers that asked for a full sync, and when
    #[serde(skip)]
    vote_sync_requests: HashMap<PeerId, i64>,
    /// Start of the last cycle we submitted a finalized budget for
    #[serde(skip)]
    submitted_height: i64,
}

pub struct BudgetManager {
    registry: Arc<MasternodeManager>,
    sync: Arc<dyn SyncProgress>,
    wallet: Arc<dyn Wallet>,
    mode: BudgetMode,
    gate: Mutex<VoteGate>,
    totals: BudgetTotals,
    state: Mutex<BudgetState>,
}

impl BudgetManager {
    pub fn new(
        registry: Arc<MasternodeManager>,
        sync: Arc<dyn SyncProgress>,
        wallet: Arc<dyn Wallet>,
        mode: BudgetMode,
        gate: VoteGate,
    ) -> Self {
        Self {
            registry,
            sync,
            wallet,
            mode,
            gate: Mutex::new(gate),
            totals: BudgetTotals::new(),
            state: Mutex::new(BudgetState::default()),
        }
    }

    pub fn mode(&self) -> BudgetMode {
        self.mode
    }

    fn params(&self) -> &ChainParams {
        self.registry.params()
    }

    fn chain(&self) -> &dyn ChainView {
        self.registry.chain().as_ref()
    }

    fn now(&self) -> i64 {
        self.registry.clock().now()
    }

    fn cycle(&self) -> Cycle<'_> {
        Cycle::new(self.params(), self.chain()).with_totals(&self.totals)
    }

    fn enabled(&self) -> usize {
        self.registry.count_enabled(None)
    }

    fn validation(&self, check_collateral: bool) -> Validation<'_> {
        Validation {
            cycle: self.cycle(),
            tip: self.chain().tip_height(),
            enabled: self.enabled(),
            check_collateral,
        }
    }

    fn relay(&self, kind: InvKind, hash: Hash256) {
        self.registry
            .outbox()
            .send(Outbound::Relay(Inventory::new(kind, hash)));
    }

    /// Treasury available to the cycle starting at `height`
    pub fn total_budget(&self, height: i64) -> Amount {
        self.cycle().total_budget(height)
    }

    fn add_proposal_locked(&self, st: &mut BudgetState, mut proposal: BudgetProposal) -> Result<bool> {
        proposal.is_valid(&self.validation(true))?;
        let hash = proposal.hash();
        if st.proposals.contains_key(&hash) {
            return Ok(false);
        }
        debug!(target: "mnbudget", "AddProposal - {} {}", proposal.name, hash);
        proposal.valid = true;
        st.proposals.insert(hash, proposal);
        Ok(true)
    }

    /// Validate and store a proposal. False when it was already known.
    pub fn add_proposal(&self, proposal: BudgetProposal) -> Result<bool> {
        let mut st = self.state.lock();
        self.add_proposal_locked(&mut st, proposal)
    }

    fn add_finalized_locked(&self, st: &mut BudgetState, mut budget: FinalizedBudget) -> Result<bool> {
        budget.is_valid(&self.validation(true))?;
        let hash = budget.hash();
        if st.finalized.contains_key(&hash) {
            return Ok(false);
        }
        debug!(target: "mnbudget", "AddFinalizedBudget - {} {}", budget.name, hash);
        budget.valid = true;
        st.finalized.insert(hash, budget);
        Ok(true)
    }

    pub fn add_finalized_budget(&self, budget: FinalizedBudget) -> Result<bool> {
        let mut st = self.state.lock();
        self.add_finalized_locked(&mut st, budget)
    }

    /// Re-validate everything, drop what no longer holds and auto-vote on
    /// the surviving finalized budgets
    pub fn check_and_remove(&self, voter: Option<&LocalVoter>) {
        let v = self.validation(true);
        let mut guard = self.state.lock();
        let st = &mut *guard;

        let mut kept = Vec::new();
        st.finalized.retain(|hash, budget| match budget.is_valid(&v) {
            Ok(()) => {
                budget.valid = true;
                kept.push(*hash);
                true
            }
            Err(e) => {
                debug!(target: "mnbudget", "CheckAndRemove - removing budget {}: {}", budget.name, e);
                false
            }
        });
        for hash in kept {
            self.check_and_vote_locked(st, &hash, voter);
        }

        st.proposals.retain(|_, proposal| match proposal.is_valid(&v) {
            Ok(()) => {
                proposal.valid = true;
                true
            }
            Err(e) => {
                debug!(target: "mnbudget", "CheckAndRemove - removing proposal: {}", e);
                false
            }
        });

        debug!(
            target: "mnbudget",
            "CheckAndRemove - PASSED {} proposals, {} budgets",
            st.proposals.len(),
            st.finalized.len()
        );
    }

    /// Vote for a finalized budget if it pays exactly what we would pay
    fn check_and_vote_locked(&self, st: &mut BudgetState, hash: &Hash256, voter: Option<&LocalVoter>) {
        let voter = match voter {
            Some(voter) => voter,
            None => return,
        };
        match st.finalized.get(hash) {
            Some(budget) if !budget.auto_checked => {}
            _ => return,
        }
        if !self.gate.lock().auto_vote() {
            return;
        }
        if let Some(budget) = st.finalized.get_mut(hash) {
            budget.auto_checked = true;
        }
        if self.mode != BudgetMode::Auto {
            return;
        }

        let ours = self.get_budget_locked(st);
        let matches = st
            .finalized
            .get(hash)
            .map(|budget| budget.matches(&ours))
            .unwrap_or(false);
        if !matches {
            debug!(target: "mnbudget", "CheckAndVote - budget {} does not match our selection", hash);
            return;
        }

        debug!(target: "mnbudget", "CheckAndVote - finalized budget {} matches, voting", hash);
        if let Err(e) = self.submit_vote_locked(st, voter, hash) {
            warn!(target: "mnbudget", "CheckAndVote - vote failed: {}", e);
        }
    }

    /// Votes only count while their masternode is known
    fn clean_votes_locked(&self, st: &mut BudgetState) {
        let is_known = |vin: &OutPoint| self.registry.find(vin).is_some();
        for proposal in st.proposals.values_mut() {
            proposal.clean_and_remove(is_known);
        }
        for budget in st.finalized.values_mut() {
            budget.clean_and_remove(is_known);
        }
    }

    fn get_budget_locked(&self, st: &mut BudgetState) -> Vec<BudgetProposal> {
        self.clean_votes_locked(st);

        let tip = match self.chain().tip_height() {
            Some(tip) => tip,
            None => return Vec::new(),
        };
        let cycle = self.cycle();
        let budget_start = cycle.next_start(tip);
        let budget_end = budget_start + cycle.blocks() - 1;
        let cap = cycle.total_budget(budget_start);
        let mn_count = self.enabled();
        let now = self.now();
        let establishment = self.params().proposal_establishment_secs;

        // net support, then the fee hash to break ties
        let mut order: Vec<(i64, Hash256, Hash256)> = st
            .proposals
            .iter()
            .map(|(hash, p)| (p.yeas() - p.nays(), p.fee_txid, *hash))
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        let mut allocated: Amount = 0;
        let mut selected = Vec::new();
        for (_, _, hash) in order {
            let proposal = match st.proposals.get_mut(&hash) {
                Some(p) => p,
                None => continue,
            };
            let passing = proposal.is_passing(
                Some(tip),
                budget_start,
                budget_end,
                mn_count,
                now,
                establishment,
            );
            if passing && allocated + proposal.amount <= cap {
                proposal.allotted = proposal.amount;
                allocated += proposal.amount;
                selected.push(proposal.clone());
            } else {
                proposal.allotted = 0;
            }
        }
        selected
    }

    /// Passing proposals that fit the next cycle's treasury, in payment order
    pub fn get_budget(&self) -> Vec<BudgetProposal> {
        let mut st = self.state.lock();
        self.get_budget_locked(&mut st)
    }

    /// Every proposal, most net support first
    pub fn all_proposals(&self) -> Vec<BudgetProposal> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        self.clean_votes_locked(st);
        let mut proposals: Vec<BudgetProposal> = st.proposals.values().cloned().collect();
        proposals.sort_by(|a, b| (b.yeas() - b.nays()).cmp(&(a.yeas() - a.nays())));
        proposals
    }

    /// Finalized budgets by vote count, then fee hash
    pub fn finalized_budgets(&self) -> Vec<FinalizedBudget> {
        let st = self.state.lock();
        let mut budgets: Vec<FinalizedBudget> = st.finalized.values().cloned().collect();
        budgets.sort_by(|a, b| {
            b.vote_count()
                .cmp(&a.vote_count())
                .then_with(|| b.fee_txid.cmp(&a.fee_txid))
        });
        budgets
    }

    pub fn find_proposal(&self, hash: &Hash256) -> Option<BudgetProposal> {
        self.state.lock().proposals.get(hash).cloned()
    }

    /// Best supported proposal with this name
    pub fn find_proposal_by_name(&self, name: &str) -> Option<BudgetProposal> {
        let st = self.state.lock();
        st.proposals
            .values()
            .filter(|p| p.name == name)
            .max_by_key(|p| p.yeas() - p.nays())
            .cloned()
    }

    pub fn find_finalized(&self, hash: &Hash256) -> Option<FinalizedBudget> {
        self.state.lock().finalized.get(hash).cloned()
    }

    /// Highest vote count among finalized budgets covering `height`, or -1
    fn highest_vote_count(st: &BudgetState, height: i64) -> i64 {
        st.finalized
            .values()
            .filter(|b| b.covers(height))
            .map(|b| b.vote_count() as i64)
            .max()
            .unwrap_or(-1)
    }

    pub fn is_budget_payment_block(&self, height: i64) -> bool {
        let five_percent = (self.enabled() / 20) as i64;
        let st = self.state.lock();
        Self::highest_vote_count(&st, height) > five_percent
    }

    /// Check a superblock's payment against the best supported budgets
    pub fn is_transaction_valid(&self, tx: &Transaction, height: i64) -> TrxValidationStatus {
        let enabled = self.enabled() as i64;
        let mut st = self.state.lock();

        let highest = Self::highest_vote_count(&st, height);
        // without 5% of the network behind it a masternode gets paid instead
        if highest < enabled / 20 {
            return TrxValidationStatus::Invalid;
        }

        let threshold = highest - enabled / 10;
        let mut above_threshold = 0;
        let mut status = TrxValidationStatus::Invalid;
        for budget in st.finalized.values_mut() {
            if budget.vote_count() as i64 <= threshold {
                continue;
            }
            above_threshold += 1;
            if budget.covers(height) {
                status = budget.is_transaction_valid(tx, height);
                if status == TrxValidationStatus::Valid {
                    return status;
                }
            }
        }
        if above_threshold == 0 {
            return TrxValidationStatus::VoteThreshold;
        }
        status
    }

    /// Pay the best supported budget's proposal for the block after the
    /// tip. Returns what was paid, if anything.
    pub fn fill_block_payee(
        &self,
        tx: &mut Transaction,
        fees: Amount,
        proof_of_stake: bool,
    ) -> Option<(Script, Amount)> {
        let tip = self.chain().tip_height()?;
        let height = tip + 1;

        let payment = {
            let st = self.state.lock();
            let mut best: Option<&FinalizedBudget> = None;
            for budget in st.finalized.values().filter(|b| b.covers(height)) {
                if best.map(|b| budget.vote_count() > b.vote_count()).unwrap_or(true) {
                    best = Some(budget);
                }
            }
            best.and_then(|b| b.payee_and_amount(height))
        };

        let block_value = self.chain().block_subsidy(height, proof_of_stake);
        if proof_of_stake {
            if let Some((payee, amount)) = &payment {
                tx.outputs.push(TxOut::new(*amount, payee.clone()));
            }
        } else {
            // the miner keeps the full subsidy on superblocks
            if tx.outputs.is_empty() {
                tx.outputs.push(TxOut::default());
            }
            tx.outputs[0].value = block_value;
            if let Some((payee, amount)) = &payment {
                tx.outputs.resize(2, TxOut::default());
                tx.outputs[1] = TxOut::new(*amount, payee.clone());
            }
        }

        if let Some((payee, amount)) = &payment {
            info!(
                target: "mnbudget",
                "Budget payment to {} for {} (fees {})",
                payee.to_address(),
                amount,
                fees
            );
        }
        payment
    }

    pub fn required_payments_string(&self, height: i64) -> String {
        let st = self.state.lock();
        let hashes: Vec<String> = st
            .finalized
            .values()
            .filter(|b| b.covers(height))
            .filter_map(|b| b.payment_by_block(height))
            .map(|p| p.proposal_hash.to_string())
            .collect();
        if hashes.is_empty() {
            return "unknown-budget".to_string();
        }
        hashes.join(",")
    }

    /// Build, fund and announce our own finalized budget for the next cycle
    /// once inside the finalization window. Returns true when one went out.
    pub fn submit_final_budget(&self) -> bool {
        let tip = match self.chain().tip_height() {
            Some(tip) => tip,
            None => return false,
        };
        let block_start = self.cycle().next_start(tip);

        let mut guard = self.state.lock();
        let st = &mut *guard;
        if st.submitted_height >= block_start {
            debug!(
                target: "mnbudget",
                "SubmitFinalBudget - already submitted for cycle starting at {}",
                block_start
            );
            return false;
        }

        let window = self.params().finalization_window;
        if block_start - tip > window {
            debug!(
                target: "mnbudget",
                "SubmitFinalBudget - Too early for finalization. Current block is {}, next Superblock is {}.",
                tip,
                block_start
            );
            return false;
        }

        let payments: Vec<BudgetPayment> = self
            .get_budget_locked(st)
            .iter()
            .map(|p| BudgetPayment::new(p.hash(), p.payee.clone(), p.allotted))
            .collect();
        if payments.is_empty() {
            debug!(target: "mnbudget", "SubmitFinalBudget - Found No Proposals For Period");
            return false;
        }

        let mut broadcast =
            FinalizedBudgetBroadcast::new(FINAL_BUDGET_NAME, block_start, payments, Hash256::ZERO);
        let hash = broadcast.hash();
        if st.seen_finalized.contains_key(&hash) {
            debug!(target: "mnbudget", "SubmitFinalBudget - Budget already exists - {}", hash);
            st.submitted_height = block_start;
            return false;
        }

        let fee_txid = match st.collateral_txids.get(&hash) {
            Some(txid) => *txid,
            None => match self.wallet.create_budget_collateral(&hash, BUDGET_FEE_TX) {
                Ok(txid) => {
                    st.collateral_txids.insert(hash, txid);
                    txid
                }
                Err(e) => {
                    warn!(target: "mnbudget", "SubmitFinalBudget - Can't make collateral transaction: {}", e);
                    return false;
                }
            },
        };

        let confirmations = match self.chain().transaction(&fee_txid) {
            Some((_, Some(height))) if height <= tip => tip - height + 1,
            Some(_) => 0,
            None => {
                debug!(target: "mnbudget", "SubmitFinalBudget - Can't find collateral tx {}", fee_txid);
                return false;
            }
        };
        // one extra block so every peer sees the collateral as confirmed
        let required = self.params().budget_fee_confirmations + 1;
        if confirmations < required {
            debug!(
                target: "mnbudget",
                "SubmitFinalBudget - Collateral requires at least {} confirmations - {} - {} confirmations",
                required,
                fee_txid,
                confirmations
            );
            return false;
        }

        broadcast.fee_txid = fee_txid;
        let budget = FinalizedBudget::from(&broadcast);
        match self.add_finalized_locked(st, budget) {
            Ok(_) => {}
            Err(e) => {
                warn!(target: "mnbudget", "SubmitFinalBudget - Invalid finalized budget - {}", e);
                return false;
            }
        }
        st.seen_finalized.insert(hash, broadcast);
        self.relay(InvKind::FinalizedBudget, hash);
        st.submitted_height = block_start;
        info!(target: "mnbudget", "SubmitFinalBudget - Done! {}", hash);
        true
    }

    /// Per-block maintenance
    pub fn new_block(&self, voter: Option<&LocalVoter>) {
        let tip = match self.chain().tip_height() {
            Some(tip) => tip,
            None => return,
        };
        if !self.sync.is_budget_synced() {
            return;
        }

        if self.mode == BudgetMode::Suggest {
            self.submit_final_budget();
        }

        if tip % NEW_BLOCK_INTERVAL != 0 {
            return;
        }

        if self.sync.is_synced() {
            if self.gate.lock().resync(tip) {
                debug!(target: "mnbudget", "NewBlock - full resync at {}", tip);
                self.clear_seen();
                self.reset_sync();
            }
            for peer in self.registry.outbox().connected_peers() {
                self.sync(peer, None, true);
            }
            self.mark_synced();
        }

        self.check_and_remove(voter);

        let now = self.now();
        let cycle = self.cycle();
        let mut guard = self.state.lock();
        let st = &mut *guard;

        st.asked_for
            .retain(|_, asked| now - *asked <= ASKED_FOR_EXPIRY_SECONDS);
        st.vote_sync_requests
            .retain(|_, asked| now - *asked < VOTE_SYNC_INTERVAL_SECONDS);

        self.clean_votes_locked(st);

        let immature = std::mem::take(&mut st.immature_proposals);
        for (hash, broadcast) in immature {
            if !check_collateral(&cycle, &broadcast.fee_txid, &hash, false).is_valid() {
                st.immature_proposals.insert(hash, broadcast);
                continue;
            }
            match self.add_proposal_locked(st, BudgetProposal::from(&broadcast)) {
                Ok(added) => {
                    debug!(target: "mnbudget", "NewBlock - immature proposal {} matured", hash);
                    st.seen_proposals.insert(hash, broadcast);
                    if added {
                        self.relay(InvKind::BudgetProposal, hash);
                    }
                }
                Err(e) => {
                    debug!(target: "mnbudget", "NewBlock - dropping immature proposal {}: {}", hash, e);
                }
            }
        }

        let immature = std::mem::take(&mut st.immature_finalized);
        for (hash, broadcast) in immature {
            if !check_collateral(&cycle, &broadcast.fee_txid, &hash, true).is_valid() {
                st.immature_finalized.insert(hash, broadcast);
                continue;
            }
            match self.add_finalized_locked(st, FinalizedBudget::from(&broadcast)) {
                Ok(added) => {
                    debug!(target: "mnbudget", "NewBlock - immature budget {} matured", hash);
                    st.seen_finalized.insert(hash, broadcast);
                    if added {
                        self.relay(InvKind::FinalizedBudget, hash);
                    }
                }
                Err(e) => {
                    debug!(target: "mnbudget", "NewBlock - dropping immature budget {}: {}", hash, e);
                }
            }
        }
        drop(guard);
        self.check_orphan_votes();
    }

    /// Answer `mnvs`. A full request on mainnet is honoured once per peer
    /// every `VOTE_SYNC_INTERVAL_SECONDS`.
    pub fn process_vote_sync(&self, peer: PeerId, hash: Option<Hash256>) {
        if !self.sync.is_blockchain_synced() {
            return;
        }
        if hash.is_none() && self.params().is_mainnet() {
            let now = self.now();
            let mut st = self.state.lock();
            if let Some(asked) = st.vote_sync_requests.get(&peer) {
                if now - *asked < VOTE_SYNC_INTERVAL_SECONDS {
                    report_misbehaving(
                        self.registry.outbox().as_ref(),
                        peer,
                        20,
                        "mnvs - peer already asked me for the list",
                    );
                    return;
                }
            }
            st.vote_sync_requests.insert(peer, now);
        }
        self.sync(peer, hash, false);
        debug!(target: "mnbudget", "mnvs - Sent Masternode votes to {}", peer);
    }

    /// Admit an `mprop`
    pub fn process_proposal(&self, peer: PeerId, broadcast: &ProposalBroadcast) -> Result<()> {
        if !self.sync.is_blockchain_synced() {
            return Ok(());
        }
        let hash = broadcast.hash();
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if st.seen_proposals.contains_key(&hash) {
            self.sync.added_budget_item();
            return Ok(());
        }

        match check_collateral(&self.cycle(), &broadcast.fee_txid, &hash, false) {
            CollateralStatus::Valid { .. } => {}
            CollateralStatus::Invalid {
                reason,
                confirmations,
            } => {
                debug!(target: "mnbudget", "mprop - Proposal FeeTX is not valid - {} - {}", broadcast.fee_txid, reason);
                if confirmations >= 1 {
                    st.immature_proposals.insert(hash, broadcast.clone());
                }
                return Err(BudgetError::Collateral {
                    reason,
                    confirmations,
                });
            }
        }

        st.seen_proposals.insert(hash, broadcast.clone());
        if self.add_proposal_locked(st, BudgetProposal::from(broadcast))? {
            self.relay(InvKind::BudgetProposal, hash);
        }
        self.sync.added_budget_item();
        debug!(target: "mnbudget", "mprop - new budget - {} from {}", hash, peer);
        self.check_orphan_votes_locked(st);
        Ok(())
    }

    /// Admit an `mvote`
    pub fn process_vote(&self, peer: PeerId, vote: &BudgetVote) -> Result<()> {
        if !self.sync.is_blockchain_synced() {
            return Ok(());
        }
        let vote = vote.received();
        let hash = vote.hash();

        let mut guard = self.state.lock();
        let st = &mut *guard;
        if st.seen_votes.contains_key(&hash) {
            self.sync.added_budget_item();
            return Ok(());
        }

        let mn = match self.registry.find(&vote.vin) {
            Some(mn) => mn,
            None => {
                debug!(target: "mnbudget", "mvote - unknown masternode - vin: {}", vote.vin.short());
                self.registry.ask_for(peer, &vote.vin);
                return Err(BudgetError::UnknownMasternode(vote.vin));
            }
        };

        st.seen_votes.insert(hash, vote.clone());
        if let Err(e) = vote.verify(&mn.pubkey_masternode, self.registry.signer().as_ref()) {
            // could be a masternode we have stale keys for
            self.registry.ask_for(peer, &vote.vin);
            return Err(BudgetError::invalid(e.to_string()));
        }

        self.update_proposal_locked(st, &vote, Some(peer))?;
        self.relay(InvKind::BudgetVote, hash);
        self.sync.added_budget_item();
        debug!(target: "mnbudget", "mvote - new budget vote - {}", hash);
        Ok(())
    }

    /// Admit an `fbs`
    pub fn process_finalized(&self, peer: PeerId, broadcast: &FinalizedBudgetBroadcast) -> Result<()> {
        if !self.sync.is_blockchain_synced() {
            return Ok(());
        }
        let hash = broadcast.hash();
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if st.seen_finalized.contains_key(&hash) {
            self.sync.added_budget_item();
            return Ok(());
        }

        match check_collateral(&self.cycle(), &broadcast.fee_txid, &hash, true) {
            CollateralStatus::Valid { .. } => {}
            CollateralStatus::Invalid {
                reason,
                confirmations,
            } => {
                debug!(target: "mnbudget", "fbs - Finalized Budget FeeTX is not valid - {} - {}", broadcast.fee_txid, reason);
                if confirmations >= 1 {
                    st.immature_finalized.insert(hash, broadcast.clone());
                }
                return Err(BudgetError::Collateral {
                    reason,
                    confirmations,
                });
            }
        }

        st.seen_finalized.insert(hash, broadcast.clone());
        if self.add_finalized_locked(st, FinalizedBudget::from(broadcast))? {
            self.relay(InvKind::FinalizedBudget, hash);
        }
        self.sync.added_budget_item();
        debug!(target: "mnbudget", "fbs - new finalized budget - {} from {}", hash, peer);
        self.check_orphan_votes_locked(st);
        Ok(())
    }

    /// Admit an `fbvote`
    pub fn process_finalized_vote(&self, peer: PeerId, vote: &FinalizedBudgetVote) -> Result<()> {
        if !self.sync.is_blockchain_synced() {
            return Ok(());
        }
        let vote = vote.received();
        let hash = vote.hash();

        let mut guard = self.state.lock();
        let st = &mut *guard;
        if st.seen_finalized_votes.contains_key(&hash) {
            self.sync.added_budget_item();
            return Ok(());
        }

        let mn = match self.registry.find(&vote.vin) {
            Some(mn) => mn,
            None => {
                debug!(target: "mnbudget", "fbvote - unknown masternode - vin: {}", vote.vin.short());
                self.registry.ask_for(peer, &vote.vin);
                return Err(BudgetError::UnknownMasternode(vote.vin));
            }
        };

        st.seen_finalized_votes.insert(hash, vote.clone());
        if let Err(e) = vote.verify(&mn.pubkey_masternode, self.registry.signer().as_ref()) {
            self.registry.ask_for(peer, &vote.vin);
            return Err(BudgetError::invalid(e.to_string()));
        }

        self.update_finalized_locked(st, &vote, Some(peer))?;
        self.relay(InvKind::FinalizedBudgetVote, hash);
        self.sync.added_budget_item();
        debug!(target: "mnbudget", "fbvote - new finalized budget vote - {}", hash);
        Ok(())
    }

    /// Ask `peer` for a single object, once per hash
    fn request_object(&self, st: &mut BudgetState, peer: PeerId, hash: Hash256) {
        if st.asked_for.contains_key(&hash) {
            return;
        }
        self.registry.outbox().send(Outbound::RequestBudgetSync {
            peer,
            hash: Some(hash),
        });
        st.asked_for.insert(hash, self.now());
    }

    /// Apply a vote to its proposal. Votes for unknown proposals heard from
    /// a peer become orphans once we are synced.
    fn update_proposal_locked(&self, st: &mut BudgetState, vote: &BudgetVote, peer: Option<PeerId>) -> Result<()> {
        let now = self.now();
        match st.proposals.get_mut(&vote.proposal_hash) {
            Some(proposal) => proposal.add_or_update_vote(vote, now),
            None => {
                if let Some(peer) = peer {
                    // while syncing the proposal is probably on its way
                    if self.sync.is_synced() {
                        debug!(target: "mnbudget", "UpdateProposal - Unknown proposal {}, asking for source proposal", vote.proposal_hash);
                        st.orphan_votes.insert(vote.hash(), vote.clone());
                        self.request_object(st, peer, vote.proposal_hash);
                    }
                }
                Err(BudgetError::UnknownProposal(vote.proposal_hash))
            }
        }
    }

    fn update_finalized_locked(
        &self,
        st: &mut BudgetState,
        vote: &FinalizedBudgetVote,
        peer: Option<PeerId>,
    ) -> Result<()> {
        let now = self.now();
        match st.finalized.get_mut(&vote.budget_hash) {
            Some(budget) => budget.add_or_update_vote(vote, now),
            None => {
                if let Some(peer) = peer {
                    if self.sync.is_synced() {
                        debug!(target: "mnbudget", "UpdateFinalizedBudget - Unknown Finalized Proposal {}, asking for source budget", vote.budget_hash);
                        st.orphan_finalized_votes.insert(vote.hash(), vote.clone());
                        self.request_object(st, peer, vote.budget_hash);
                    }
                }
                Err(BudgetError::UnknownBudget(vote.budget_hash))
            }
        }
    }

    fn check_orphan_votes_locked(&self, st: &mut BudgetState) {
        let ready: Vec<(Hash256, BudgetVote)> = st
            .orphan_votes
            .iter()
            .filter(|(_, vote)| st.proposals.contains_key(&vote.proposal_hash))
            .map(|(hash, vote)| (*hash, vote.clone()))
            .collect();
        for (hash, vote) in ready {
            match self.update_proposal_locked(st, &vote, None) {
                Ok(()) => debug!(target: "mnbudget", "CheckOrphanVotes - Proposal/Budget is known, activating and removing orphan vote"),
                Err(e) => debug!(target: "mnbudget", "CheckOrphanVotes - dropping orphan vote: {}", e),
            }
            st.orphan_votes.remove(&hash);
        }

        let ready: Vec<(Hash256, FinalizedBudgetVote)> = st
            .orphan_finalized_votes
            .iter()
            .filter(|(_, vote)| st.finalized.contains_key(&vote.budget_hash))
            .map(|(hash, vote)| (*hash, vote.clone()))
            .collect();
        for (hash, vote) in ready {
            match self.update_finalized_locked(st, &vote, None) {
                Ok(()) => debug!(target: "mnbudget", "CheckOrphanVotes - Proposal/Budget is known, activating and removing orphan vote"),
                Err(e) => debug!(target: "mnbudget", "CheckOrphanVotes - dropping orphan vote: {}", e),
            }
            st.orphan_finalized_votes.remove(&hash);
        }
    }

    /// Replay parked votes against objects that have since arrived
    pub fn check_orphan_votes(&self) {
        let mut st = self.state.lock();
        self.check_orphan_votes_locked(&mut st);
    }

    /// Push inventory of our valid objects and their votes to `peer`,
    /// optionally only one object, optionally only votes not yet synced
    pub fn sync(&self, peer: PeerId, hash: Option<Hash256>, partial: bool) {
        let outbox = self.registry.outbox();
        let st = self.state.lock();
        let wanted = |h: Hash256| hash.map(|wanted| wanted == h).unwrap_or(true);
        let push = |kind, hash| {
            outbox.send(Outbound::PushInventory {
                peer,
                inventory: Inventory::new(kind, hash),
            })
        };

        let mut count = 0u32;
        for h in st.seen_proposals.keys().filter(|h| wanted(**h)) {
            let proposal = match st.proposals.get(h) {
                Some(p) if p.valid => p,
                _ => continue,
            };
            push(InvKind::BudgetProposal, *h);
            count += 1;
            for vote in proposal.votes.values() {
                if vote.valid && (!partial || !vote.synced) {
                    push(InvKind::BudgetVote, vote.hash());
                    count += 1;
                }
            }
        }
        outbox.send(Outbound::SyncStatusCount {
            peer,
            item: SyncItem::BudgetProposals,
            count,
        });
        debug!(target: "mnbudget", "Sync - sent {} budget proposal items to {}", count, peer);

        let mut count = 0u32;
        for h in st.seen_finalized.keys().filter(|h| wanted(**h)) {
            let budget = match st.finalized.get(h) {
                Some(b) if b.valid => b,
                _ => continue,
            };
            push(InvKind::FinalizedBudget, *h);
            count += 1;
            for vote in budget.votes.values() {
                if vote.valid && (!partial || !vote.synced) {
                    push(InvKind::FinalizedBudgetVote, vote.hash());
                    count += 1;
                }
            }
        }
        outbox.send(Outbound::SyncStatusCount {
            peer,
            item: SyncItem::BudgetFinalized,
            count,
        });
        debug!(target: "mnbudget", "Sync - sent {} finalized budget items to {}", count, peer);
    }

    /// Mark every vote as not yet synced so the next partial sync resends it
    pub fn reset_sync(&self) {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        for hash in st.seen_proposals.keys() {
            if let Some(proposal) = st.proposals.get_mut(hash) {
                if proposal.valid {
                    for vote in proposal.votes.values_mut() {
                        vote.synced = false;
                    }
                }
            }
        }
        for hash in st.seen_finalized.keys() {
            if let Some(budget) = st.finalized.get_mut(hash) {
                if budget.valid {
                    for vote in budget.votes.values_mut() {
                        vote.synced = false;
                    }
                }
            }
        }
    }

    /// Mark every valid vote as synced after a partial sync went out
    pub fn mark_synced(&self) {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        for hash in st.seen_proposals.keys() {
            if let Some(proposal) = st.proposals.get_mut(hash) {
                if proposal.valid {
                    for vote in proposal.votes.values_mut().filter(|v| v.valid) {
                        vote.synced = true;
                    }
                }
            }
        }
        for hash in st.seen_finalized.keys() {
            if let Some(budget) = st.finalized.get_mut(hash) {
                if budget.valid {
                    for vote in budget.votes.values_mut().filter(|v| v.valid) {
                        vote.synced = true;
                    }
                }
            }
        }
    }

    pub fn clear_seen(&self) {
        let mut st = self.state.lock();
        st.seen_proposals.clear();
        st.seen_votes.clear();
        st.seen_finalized.clear();
        st.seen_finalized_votes.clear();
    }

    /// Vote on a proposal with the local masternode's operator key
    pub fn submit_proposal_vote(
        &self,
        voter: &LocalVoter,
        proposal_hash: &Hash256,
        outcome: VoteOutcome,
    ) -> Result<BudgetVote> {
        let signer = self.registry.signer().as_ref();
        let mut vote = BudgetVote::new(voter.vin, *proposal_hash, outcome, self.now());
        vote.sign(&voter.key, signer)?;
        vote.verify(&voter.pubkey, signer)?;

        let hash = vote.hash();
        let mut guard = self.state.lock();
        let st = &mut *guard;
        self.update_proposal_locked(st, &vote, None)?;
        st.seen_votes.insert(hash, vote.clone());
        self.relay(InvKind::BudgetVote, hash);
        info!(target: "mnbudget", "Voted {} on proposal {}", outcome, proposal_hash);
        Ok(vote)
    }

    fn submit_vote_locked(
        &self,
        st: &mut BudgetState,
        voter: &LocalVoter,
        budget_hash: &Hash256,
    ) -> Result<FinalizedBudgetVote> {
        let signer = self.registry.signer().as_ref();
        let mut vote = FinalizedBudgetVote::new(voter.vin, *budget_hash, self.now());
        vote.sign(&voter.key, signer)?;
        vote.verify(&voter.pubkey, signer)?;

        let hash = vote.hash();
        self.update_finalized_locked(st, &vote, None)?;
        st.seen_finalized_votes.insert(hash, vote.clone());
        self.relay(InvKind::FinalizedBudgetVote, hash);
        info!(target: "mnbudget", "Voted on finalized budget {}", budget_hash);
        Ok(vote)
    }

    /// Vote for a finalized budget with the local masternode's operator key
    pub fn submit_vote(&self, voter: &LocalVoter, budget_hash: &Hash256) -> Result<FinalizedBudgetVote> {
        let mut st = self.state.lock();
        self.submit_vote_locked(&mut st, voter, budget_hash)
    }

    pub fn seen_proposal(&self, hash: &Hash256) -> Option<ProposalBroadcast> {
        self.state.lock().seen_proposals.get(hash).cloned()
    }

    pub fn seen_vote(&self, hash: &Hash256) -> Option<BudgetVote> {
        self.state.lock().seen_votes.get(hash).cloned()
    }

    pub fn seen_finalized(&self, hash: &Hash256) -> Option<FinalizedBudgetBroadcast> {
        self.state.lock().seen_finalized.get(hash).cloned()
    }

    pub fn seen_finalized_vote(&self, hash: &Hash256) -> Option<FinalizedBudgetVote> {
        self.state.lock().seen_finalized_votes.get(hash).cloned()
    }

    pub fn proposal_count(&self) -> usize {
        self.state.lock().proposals.len()
    }

    pub fn finalized_count(&self) -> usize {
        self.state.lock().finalized.len()
    }

    pub fn orphan_vote_count(&self) -> usize {
        let st = self.state.lock();
        st.orphan_votes.len() + st.orphan_finalized_votes.len()
    }

    pub fn immature_count(&self) -> usize {
        let st = self.state.lock();
        st.immature_proposals.len() + st.immature_finalized.len()
    }

    /// `status` of a finalized budget checked against our proposals
    pub fn finalized_status(&self, hash: &Hash256) -> Option<String> {
        let st = self.state.lock();
        let budget = st.finalized.get(hash)?;
        Some(budget.status(|h| st.proposals.get(h).map(|p| (p.payee.clone(), p.amount))))
    }

    pub fn finalized_proposals_string(&self, hash: &Hash256) -> Option<String> {
        let st = self.state.lock();
        let budget = st.finalized.get(hash)?;
        Some(budget.proposals_string(|h| st.proposals.get(h).map(|p| p.name.clone())))
    }

    /// Check a cache file without loading it
    pub fn verify_cache(file: &SnapshotFile) -> Result<()> {
        file.verify::<BudgetState>()?;
        Ok(())
    }

    pub fn dump(&self, file: &SnapshotFile) -> Result<()> {
        let started = std::time::Instant::now();
        {
            let st = self.state.lock();
            file.write(&*st)?;
        }
        file.verify::<BudgetState>()?;
        info!(
            target: "mnbudget",
            "Written info to {}  {}ms",
            file.path().display(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Replace budget objects from a cache file. Returns false when there
    /// was none.
    pub fn load(&self, file: &SnapshotFile) -> Result<bool> {
        match file.read::<BudgetState>() {
            Ok(loaded) => {
                {
                    let mut st = self.state.lock();
                    st.proposals = loaded.proposals;
                    st.finalized = loaded.finalized;
                    st.seen_proposals = loaded.seen_proposals;
                    st.seen_votes = loaded.seen_votes;
                    st.orphan_votes = loaded.orphan_votes;
                    st.seen_finalized = loaded.seen_finalized;
                    st.seen_finalized_votes = loaded.seen_finalized_votes;
                    st.orphan_finalized_votes = loaded.orphan_finalized_votes;
                }
                info!(target: "mnbudget", "Loaded info from {}  {}", file.path().display(), self);
                self.check_and_remove(None);
                debug!(target: "mnbudget", "Budget manager - cleaning....");
                debug!(target: "mnbudget", "Budget manager - result: {}", self);
                Ok(true)
            }
            Err(e) if e.is_missing() => {
                info!(
                    target: "mnbudget",
                    "Missing budget cache - {}, will try to recreate",
                    file.path().display()
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl SuperblockSchedule for BudgetManager {
    fn is_budget_payment_block(&self, height: i64) -> bool {
        BudgetManager::is_budget_payment_block(self, height)
    }
}

impl fmt::Display for BudgetManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        write!(
            f,
            "Proposals: {}, Budgets: {}, Seen Budgets: {}, Seen Budget Votes: {}, Seen Final Budgets: {}, Seen Final Budget Votes: {}",
            st.proposals.len(),
            st.finalized.len(),
            st.seen_proposals.len(),
            st.seen_votes.len(),
            st.seen_finalized.len(),
            st.seen_finalized_votes.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_mode_parsing() {
        assert_eq!("auto".parse::<BudgetMode>().unwrap(), BudgetMode::Auto);
        assert_eq!("Suggest".parse::<BudgetMode>().unwrap(), BudgetMode::Suggest);
        assert_eq!("off".parse::<BudgetMode>().unwrap(), BudgetMode::Off);
        assert!("sometimes".parse::<BudgetMode>().is_err());
        assert_eq!(BudgetMode::default(), BudgetMode::Suggest);
        assert_eq!(BudgetMode::Auto.to_string(), "auto");
    }
}
