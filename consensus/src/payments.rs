//! Masternode payment consensus
//!
//! Collects `mnw` votes from the top-ranked masternodes, tallies them per
//! block, decides which payee a block must pay and produces the local
//! masternode's own votes.

use crate::error::{PaymentError, Result};
use crate::payees::BlockPayees;
use crate::quorum::*;
use crate::winner::PaymentWinner;
use govnode_core::gossip::report_misbehaving;
use govnode_core::params::MIN_PAYMENTS_PROTOCOL;
use govnode_core::{
    Amount, ChainView, Hash256, HashWriter, InvKind, Inventory, OutPoint, Outbound, PeerId,
    Script, SnapshotFile, SuperblockSchedule, SyncItem, SyncProgress, Transaction, TxOut,
};
use govnode_masternode::{LocalVoter, Masternode, MasternodeManager};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

pub const CACHE_FILE_NAME: &str = "mnpayments.dat";
pub const CACHE_MAGIC: &str = "MasternodePayments";

const MONTH_SECONDS: i64 = 60 * 60 * 24 * 30;

/// Votes a payee needs in a past block to count as paid there
const LAST_PAID_VOTES: u32 = 2;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PaymentsState {
    votes: HashMap<Hash256, PaymentWinner>,
    blocks: BTreeMap<i64, BlockPayees>,
    /// (voter, height) pairs already counted
    #[serde(skip)]
    voted: HashSet<(OutPoint, i64)>,
    /// Last height the local masternode voted for
    #[serde(skip)]
    last_block_height: i64,
}

impl PaymentsState {
    fn is_scheduled(&self, tip: i64, payee: &Script, not_height: i64) -> bool {
        (tip..=tip + SCHEDULE_LOOKAHEAD)
            .filter(|h| *h != not_height)
            .filter_map(|h| self.blocks.get(&h))
            .any(|block| block.payee().as_ref() == Some(payee))
    }
}

/// Deterministic per-masternode hash used to break payment ties
fn tie_breaker(mn: &Masternode) -> Hash256 {
    HashWriter::new()
        .write_hash(&mn.vin.txid)
        .write_u32(mn.vin.index)
        .write_i64(mn.sig_time)
        .finish()
}

pub struct MasternodePayments {
    registry: Arc<MasternodeManager>,
    sync: Arc<dyn SyncProgress>,
    state: Mutex<PaymentsState>,
}

impl MasternodePayments {
    pub fn new(registry: Arc<MasternodeManager>, sync: Arc<dyn SyncProgress>) -> Self {
        Self {
            registry,
            sync,
            state: Mutex::new(PaymentsState::default()),
        }
    }

    fn chain(&self) -> &dyn ChainView {
        self.registry.chain().as_ref()
    }

    fn now(&self) -> i64 {
        self.registry.clock().now()
    }

    fn relay(&self, hash: Hash256) {
        self.registry
            .outbox()
            .send(Outbound::Relay(Inventory::new(InvKind::MasternodeWinner, hash)));
    }

    /// Voter must be known, recent enough and in the top `SIGNATURES_TOTAL`
    fn check_voter(&self, peer: PeerId, winner: &PaymentWinner) -> Result<Masternode> {
        let mn = match self.registry.find(&winner.vin) {
            Some(mn) => mn,
            None => {
                self.registry.ask_for(peer, &winner.vin);
                return Err(PaymentError::UnknownMasternode(winner.vin));
            }
        };

        if mn.protocol_version < MIN_PAYMENTS_PROTOCOL {
            return Err(PaymentError::rejected(
                format!(
                    "Masternode protocol too old {} - req {}",
                    mn.protocol_version, MIN_PAYMENTS_PROTOCOL
                ),
                0,
            ));
        }

        let rank = self.registry.rank(
            &winner.vin,
            winner.block_height - RANKING_DEPTH,
            MIN_PAYMENTS_PROTOCOL,
            true,
        );
        match rank {
            Some(n) if n <= SIGNATURES_TOTAL => Ok(mn),
            Some(n) => {
                // masternodes often think they are in the top 10, only
                // complain when they are way off
                if n > SIGNATURES_TOTAL * 2 {
                    debug!(
                        target: "mnpayments",
                        "Masternode not in the top {} ({})",
                        SIGNATURES_TOTAL * 2,
                        n
                    );
                }
                Err(PaymentError::rejected(
                    format!("Masternode not in the top {} ({})", SIGNATURES_TOTAL, n),
                    0,
                ))
            }
            None => Err(PaymentError::rejected(
                format!("Masternode {} has no rank", winner.vin.short()),
                0,
            )),
        }
    }

    /// Handle an `mnw` from `peer`
    pub fn process_winner(&self, peer: PeerId, winner: &PaymentWinner) -> Result<()> {
        let tip = match self.chain().tip_height() {
            Some(tip) => tip,
            None => return Ok(()),
        };
        let hash = winner.hash();

        let mut st = self.state.lock();
        if st.votes.contains_key(&hash) {
            debug!(target: "mnpayments", "mnw - Already seen - {} bestHeight {}", hash, tip);
            self.sync.added_masternode_winner();
            return Ok(());
        }

        let first_block = tip - history_window(self.registry.count_enabled(None));
        if winner.block_height < first_block || winner.block_height > tip + MAX_VOTE_LOOKAHEAD {
            return Err(PaymentError::rejected(
                format!(
                    "winner out of range - FirstBlock {} Height {} bestHeight {}",
                    first_block, winner.block_height, tip
                ),
                0,
            ));
        }

        let mn = self.check_voter(peer, winner)?;

        if st.voted.contains(&(winner.vin, winner.block_height)) {
            return Err(PaymentError::AlreadyVoted {
                voter: winner.vin,
                height: winner.block_height,
            });
        }

        if let Err(e) = winner.verify(&mn.pubkey_masternode, self.registry.signer().as_ref()) {
            if self.sync.is_synced() {
                report_misbehaving(self.registry.outbox().as_ref(), peer, e.dos(), &e.to_string());
            }
            // the masternode may have changed keys since we last heard of it
            self.registry.ask_for(peer, &winner.vin);
            return Err(e);
        }
        st.voted.insert((winner.vin, winner.block_height));

        debug!(
            target: "mnpayments",
            "mnw - winning vote - Addr {} Height {} bestHeight {} - {}",
            winner.payee.to_address(),
            winner.block_height,
            tip,
            winner.vin.short()
        );

        if self.add_winner_locked(&mut st, winner) {
            self.relay(hash);
            self.sync.added_masternode_winner();
        }
        Ok(())
    }

    fn add_winner_locked(&self, st: &mut PaymentsState, winner: &PaymentWinner) -> bool {
        if self
            .chain()
            .block_hash(winner.block_height - RANKING_DEPTH)
            .is_none()
        {
            return false;
        }

        let hash = winner.hash();
        if st.votes.contains_key(&hash) {
            return false;
        }
        st.votes.insert(hash, winner.clone());
        st.blocks
            .entry(winner.block_height)
            .or_insert_with(|| BlockPayees::new(winner.block_height))
            .add_payee(&winner.payee, 1);
        true
    }

    /// Store a vote and count it toward its block. False if the ranking
    /// block is unknown or the vote is a duplicate.
    pub fn add_winning_masternode(&self, winner: &PaymentWinner) -> bool {
        let mut st = self.state.lock();
        self.add_winner_locked(&mut st, winner)
    }

    /// Vote for the payee of `height` if the local masternode is allowed to
    pub fn process_block(
        &self,
        height: i64,
        voter: Option<&LocalVoter>,
        schedule: &dyn SuperblockSchedule,
    ) -> Result<bool> {
        let voter = match voter {
            Some(voter) => voter,
            None => return Ok(false),
        };

        match self
            .registry
            .rank(&voter.vin, height - RANKING_DEPTH, MIN_PAYMENTS_PROTOCOL, true)
        {
            None => {
                debug!(target: "mnpayments", "ProcessBlock - Unknown Masternode");
                return Ok(false);
            }
            Some(n) if n > SIGNATURES_TOTAL => {
                debug!(
                    target: "mnpayments",
                    "ProcessBlock - Masternode not in the top {} ({})",
                    SIGNATURES_TOTAL,
                    n
                );
                return Ok(false);
            }
            Some(_) => {}
        }

        let mut st = self.state.lock();
        if height <= st.last_block_height {
            return Ok(false);
        }

        if schedule.is_budget_payment_block(height) {
            // budget blocks are paid by the finalized budget
            return Ok(false);
        }

        info!(
            target: "mnpayments",
            "ProcessBlock Start nHeight {} - vin {}",
            height,
            voter.vin.short()
        );

        let mn = match self.next_in_queue_locked(&st, height, true).0 {
            Some(mn) => mn,
            None => {
                warn!(target: "mnpayments", "ProcessBlock Failed to find masternode to pay");
                return Ok(false);
            }
        };

        let mut winner = PaymentWinner::new(voter.vin, height, mn.payee());
        winner.sign(&voter.key, self.registry.signer().as_ref())?;
        info!(
            target: "mnpayments",
            "ProcessBlock Winner payee {} nHeight {}",
            winner.payee.to_address(),
            height
        );

        if !self.add_winner_locked(&mut st, &winner) {
            return Ok(false);
        }
        st.voted.insert((voter.vin, height));
        st.last_block_height = height;
        self.relay(winner.hash());
        Ok(true)
    }

    /// Longest-unpaid eligible masternode, scored among the oldest tenth.
    /// Also returns how many masternodes were eligible.
    pub fn next_in_queue(&self, height: i64, filter_sig_time: bool) -> (Option<Masternode>, usize) {
        let st = self.state.lock();
        self.next_in_queue_locked(&st, height, filter_sig_time)
    }

    fn next_in_queue_locked(
        &self,
        st: &PaymentsState,
        height: i64,
        filter_sig_time: bool,
    ) -> (Option<Masternode>, usize) {
        let now = self.now();
        let tip = self.chain().tip_height().unwrap_or(0);
        let enabled = self.registry.count_enabled(None);

        let mut last_paid: Vec<(i64, Masternode)> = Vec::new();
        for mn in self.registry.checked_masternodes() {
            if !mn.is_enabled() || mn.protocol_version < MIN_PAYMENTS_PROTOCOL {
                continue;
            }
            // already in the next few blocks
            if st.is_scheduled(tip, &mn.payee(), height) {
                continue;
            }
            // announced long enough ago for the whole network to know it
            if filter_sig_time
                && mn.sig_time + enabled as i64 * QUEUE_SECONDS_PER_MASTERNODE > now
            {
                continue;
            }
            // as many confirmations as there are masternodes
            if self.chain().input_age(&mn.vin) < enabled as i64 {
                continue;
            }
            let seconds = self.seconds_since_payment_in(st, &mn, tip, enabled, now);
            last_paid.push((seconds, mn));
        }

        let count = last_paid.len();
        if filter_sig_time && count < enabled / 3 {
            return self.next_in_queue_locked(st, height, false);
        }

        last_paid.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.vin.cmp(&b.1.vin)));

        let tenth = enabled / 10;
        let mut best_score = Hash256::ZERO;
        let mut best = None;
        for (i, (_, mn)) in last_paid.into_iter().enumerate() {
            let score = mn.calculate_score(height - RANKING_DEPTH, self.chain());
            if score > best_score {
                best_score = score;
                best = Some(mn);
            }
            if i + 1 >= tenth {
                break;
            }
        }
        (best, count)
    }

    fn last_paid_in(&self, st: &PaymentsState, mn: &Masternode, tip: i64, enabled: usize) -> i64 {
        let offset = (tie_breaker(mn).compact() % 150) as i64;
        let payee = mn.payee();
        let window = history_window(enabled);

        let mut height = tip;
        let mut searched = 0;
        while height > 0 {
            if searched >= window {
                return 0;
            }
            searched += 1;

            // at least 2 votes, so the network converges on the same schedule
            let paid = st
                .blocks
                .get(&height)
                .map(|block| block.has_payee_with_votes(&payee, LAST_PAID_VOTES))
                .unwrap_or(false);
            if paid {
                return self.chain().block_time(height).unwrap_or(0) + offset;
            }
            height -= 1;
        }
        0
    }

    fn seconds_since_payment_in(
        &self,
        st: &PaymentsState,
        mn: &Masternode,
        tip: i64,
        enabled: usize,
        now: i64,
    ) -> i64 {
        let seconds = now - self.last_paid_in(st, mn, tip, enabled);
        if seconds < MONTH_SECONDS {
            return seconds;
        }
        // unknown or unpaid: deterministic, and always older than a month
        MONTH_SECONDS + tie_breaker(mn).compact() as i64
    }

    /// Block time (plus a tie-breaking offset) of the last voted payment to
    /// `mn`, or 0 if none in the recent window
    pub fn last_paid(&self, mn: &Masternode) -> i64 {
        let tip = self.chain().tip_height().unwrap_or(0);
        let enabled = self.registry.count_enabled(None);
        let st = self.state.lock();
        self.last_paid_in(&st, mn, tip, enabled)
    }

    pub fn seconds_since_payment(&self, mn: &Masternode) -> i64 {
        let tip = self.chain().tip_height().unwrap_or(0);
        let enabled = self.registry.count_enabled(None);
        let now = self.now();
        let st = self.state.lock();
        self.seconds_since_payment_in(&st, mn, tip, enabled, now)
    }

    /// Whether `payee` tops the vote in any of the next few blocks other
    /// than `not_height`
    pub fn is_scheduled(&self, payee: &Script, not_height: i64) -> bool {
        let tip = match self.chain().tip_height() {
            Some(tip) => tip,
            None => return false,
        };
        self.state.lock().is_scheduled(tip, payee, not_height)
    }

    /// Drop votes and tallies too far behind the tip
    pub fn clean_payment_list(&self) {
        let tip = match self.chain().tip_height() {
            Some(tip) => tip,
            None => return,
        };
        // keep a few cycles for historical sake
        let limit = retention_limit(self.registry.size());

        let mut st = self.state.lock();
        st.votes.retain(|_, winner| {
            let keep = tip - winner.block_height <= limit;
            if !keep {
                debug!(
                    target: "mnpayments",
                    "CleanPaymentList - Removing old Masternode payment - block {}",
                    winner.block_height
                );
            }
            keep
        });
        st.blocks.retain(|height, _| tip - height <= limit);
        st.voted.retain(|(_, height)| tip - height <= limit);
    }

    /// Answer an `mnget` with inventory of recent votes. Returns the number
    /// of votes advertised.
    pub fn sync(&self, peer: PeerId, count_needed: i64) -> u32 {
        let tip = match self.chain().tip_height() {
            Some(tip) => tip,
            None => return 0,
        };
        let count_needed = count_needed.min(history_window(self.registry.count_enabled(None)));

        let outbox = self.registry.outbox();
        let st = self.state.lock();
        let mut inv_count = 0u32;
        for (hash, winner) in &st.votes {
            if winner.block_height >= tip - count_needed
                && winner.block_height <= tip + MAX_VOTE_LOOKAHEAD
            {
                outbox.send(Outbound::PushInventory {
                    peer,
                    inventory: Inventory::new(InvKind::MasternodeWinner, *hash),
                });
                inv_count += 1;
            }
        }
        outbox.send(Outbound::SyncStatusCount {
            peer,
            item: SyncItem::Winners,
            count: inv_count,
        });
        inv_count
    }

    pub fn block_payee(&self, height: i64) -> Option<Script> {
        self.state.lock().blocks.get(&height).and_then(|b| b.payee())
    }

    /// Masternode share of the subsidy at `height`
    pub fn required_payment(&self, height: i64) -> Amount {
        let proof_of_stake = height > self.registry.params().last_pow_block;
        let block_value = self.chain().block_subsidy(height, proof_of_stake);
        self.chain().masternode_payment(height, block_value)
    }

    pub fn is_transaction_valid(&self, tx: &Transaction, height: i64) -> bool {
        let required = self.required_payment(height);
        match self.state.lock().blocks.get(&height) {
            Some(block) => block.is_transaction_valid(tx, required),
            None => true,
        }
    }

    /// Add the masternode payment to a new coinbase or coinstake. Returns
    /// the payee, or `None` when nobody could be found to pay.
    pub fn fill_block_payee(
        &self,
        tx: &mut Transaction,
        fees: Amount,
        proof_of_stake: bool,
    ) -> Option<Script> {
        let tip = self.chain().tip_height()?;
        let height = tip + 1;

        let payee = self.block_payee(height).or_else(|| {
            self.registry
                .current_winner(tip, MIN_PAYMENTS_PROTOCOL)
                .map(|mn| mn.payee())
        });

        let block_value = self.chain().block_subsidy(height, proof_of_stake);
        let payment = self.chain().masternode_payment(height, block_value);

        let payee = match payee {
            Some(payee) => payee,
            None => {
                warn!(target: "mnpayments", "CreateNewBlock: Failed to detect masternode to pay");
                if !proof_of_stake {
                    if tx.outputs.is_empty() {
                        tx.outputs.push(TxOut::default());
                    }
                    tx.outputs[0].value = block_value;
                }
                return None;
            }
        };

        if proof_of_stake {
            // the stake reward may be split over several outputs after the
            // empty marker; the payment is appended and taken out of them
            let i = tx.outputs.len();
            tx.outputs.push(TxOut::new(payment, payee.clone()));
            if i == 2 {
                tx.outputs[1].value -= payment;
            } else if i > 2 {
                let outputs = (i - 1) as Amount;
                let split = payment / outputs;
                let remainder = payment - split * outputs;
                for out in &mut tx.outputs[1..i] {
                    out.value -= split;
                }
                tx.outputs[i - 1].value -= remainder;
            }
        } else {
            tx.outputs.resize(2, TxOut::default());
            tx.outputs[1] = TxOut::new(payment, payee.clone());
            tx.outputs[0].value = block_value - payment;
        }

        info!(
            target: "mnpayments",
            "Masternode payment of {} to {} (fees {})",
            payment,
            payee.to_address(),
            fees
        );
        Some(payee)
    }

    pub fn required_payments_string(&self, height: i64) -> String {
        match self.state.lock().blocks.get(&height) {
            Some(block) => block.required_payments_string(),
            None => "Unknown".to_string(),
        }
    }

    pub fn seen_winner(&self, hash: &Hash256) -> Option<PaymentWinner> {
        self.state.lock().votes.get(hash).cloned()
    }

    pub fn oldest_block(&self) -> Option<i64> {
        self.state.lock().blocks.keys().next().copied()
    }

    pub fn newest_block(&self) -> Option<i64> {
        self.state.lock().blocks.keys().next_back().copied()
    }

    pub fn vote_count(&self) -> usize {
        self.state.lock().votes.len()
    }

    pub fn block_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    pub fn clear(&self) {
        let mut st = self.state.lock();
        st.votes.clear();
        st.blocks.clear();
    }

    /// Check a cache file without loading it
    pub fn verify_cache(file: &SnapshotFile) -> Result<()> {
        file.verify::<PaymentsState>()?;
        Ok(())
    }

    pub fn dump(&self, file: &SnapshotFile) -> Result<()> {
        let started = std::time::Instant::now();
        {
            let st = self.state.lock();
            file.write(&*st)?;
        }
        file.verify::<PaymentsState>()?;
        info!(
            target: "mnpayments",
            "Written info to {}  {}ms",
            file.path().display(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Replace votes and tallies from a cache file. Returns false when
    /// there was none.
    pub fn load(&self, file: &SnapshotFile) -> Result<bool> {
        match file.read::<PaymentsState>() {
            Ok(loaded) => {
                {
                    let mut st = self.state.lock();
                    st.voted = loaded
                        .votes
                        .values()
                        .map(|w| (w.vin, w.block_height))
                        .collect();
                    st.votes = loaded.votes;
                    st.blocks = loaded.blocks;
                }
                info!(target: "mnpayments", "Loaded info from {}  {}", file.path().display(), self);
                self.clean_payment_list();
                debug!(target: "mnpayments", "Masternode payments manager - result: {}", self);
                Ok(true)
            }
            Err(e) if e.is_missing() => {
                info!(
                    target: "mnpayments",
                    "Missing masternode payments file - {}, will try to recreate",
                    file.path().display()
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Display for MasternodePayments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        write!(f, "Votes: {}, Blocks: {}", st.votes.len(), st.blocks.len())
    }
}
