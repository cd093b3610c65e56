//! Masternode sync progress
//!
//! After the block chain catches up, the node walks three stages in order:
//! the masternode list, the payment winners and the budget objects. Each
//! stage asks connected peers once, then moves on when items stop arriving.

use crate::fulfilled::FulfilledRequests;
use govnode_core::{
    ChainParams, ChainView, Clock, Outbound, Outbox, PeerId, Spork, SporkPolicy, SyncItem,
    SyncProgress,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Seconds between sync steps
pub const SYNC_TIMEOUT_SECONDS: i64 = 5;
/// Requests per stage before it may advance
pub const SYNC_THRESHOLD: u32 = 2;
/// Wait before retrying a failed sync
pub const SYNC_RETRY_SECONDS: i64 = 60;
/// A tip older than this means the chain is still catching up
pub const MAX_TIP_AGE_SECONDS: i64 = 60 * 60;

const LIST_REQUEST: &str = "mnsync";
const WINNERS_REQUEST: &str = "mnwsync";
const BUDGET_REQUEST: &str = "busync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncStage {
    Initial,
    List,
    Winners,
    Budget,
    Failed,
    Finished,
}

impl SyncStage {
    fn next(self) -> SyncStage {
        match self {
            SyncStage::Initial | SyncStage::Failed => SyncStage::List,
            SyncStage::List => SyncStage::Winners,
            SyncStage::Winners => SyncStage::Budget,
            SyncStage::Budget | SyncStage::Finished => SyncStage::Finished,
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStage::Initial => "Synchronization pending...",
            SyncStage::List => "Synchronizing masternodes...",
            SyncStage::Winners => "Synchronizing masternode winners...",
            SyncStage::Budget => "Synchronizing budgets...",
            SyncStage::Failed => "Synchronization failed",
            SyncStage::Finished => "Synchronization finished",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug)]
struct SyncState {
    stage: SyncStage,
    attempt: u32,
    stage_started: i64,
    last_list: i64,
    last_winner: i64,
    last_budget_item: i64,
    last_failure: i64,
    failures: u32,
    ticks: u64,
    blockchain_synced: bool,
    last_chain_check: i64,
    /// (sum of counts, number of reports) per item
    reported: HashMap<SyncItem, (u64, u32)>,
}

impl SyncState {
    fn new(now: i64) -> Self {
        Self {
            stage: SyncStage::Initial,
            attempt: 0,
            stage_started: now,
            last_list: 0,
            last_winner: 0,
            last_budget_item: 0,
            last_failure: 0,
            failures: 0,
            ticks: 0,
            blockchain_synced: false,
            last_chain_check: now,
            reported: HashMap::new(),
        }
    }

    fn reset(&mut self, now: i64) {
        self.stage = SyncStage::Initial;
        self.attempt = 0;
        self.stage_started = now;
        self.last_list = 0;
        self.last_winner = 0;
        self.last_budget_item = 0;
        self.reported.clear();
    }
}

pub struct MasternodeSync {
    params: ChainParams,
    chain: Arc<dyn ChainView>,
    clock: Arc<dyn Clock>,
    sporks: Arc<dyn SporkPolicy>,
    outbox: Arc<dyn Outbox>,
    fulfilled: Arc<FulfilledRequests>,
    state: Mutex<SyncState>,
}

impl MasternodeSync {
    pub fn new(
        params: ChainParams,
        chain: Arc<dyn ChainView>,
        clock: Arc<dyn Clock>,
        sporks: Arc<dyn SporkPolicy>,
        outbox: Arc<dyn Outbox>,
        fulfilled: Arc<FulfilledRequests>,
    ) -> Self {
        let now = clock.now();
        Self {
            params,
            chain,
            clock,
            sporks,
            outbox,
            fulfilled,
            state: Mutex::new(SyncState::new(now)),
        }
    }

    pub fn stage(&self) -> SyncStage {
        self.state.lock().stage
    }

    pub fn failures(&self) -> u32 {
        self.state.lock().failures
    }

    pub fn status(&self) -> String {
        self.stage().to_string()
    }

    /// Inventory counts peers reported for `item` as (sum, reports)
    pub fn reported(&self, item: SyncItem) -> (u64, u32) {
        self.state
            .lock()
            .reported
            .get(&item)
            .copied()
            .unwrap_or((0, 0))
    }

    pub fn reset(&self) {
        let now = self.clock.now();
        self.state.lock().reset(now);
    }

    fn advance(&self, st: &mut SyncState, now: i64) {
        if matches!(st.stage, SyncStage::Initial | SyncStage::Failed) {
            for request in [LIST_REQUEST, WINNERS_REQUEST, BUDGET_REQUEST] {
                self.fulfilled.forget(request);
            }
        }
        st.stage = st.stage.next();
        if st.stage == SyncStage::Finished {
            info!("masternode sync has finished");
        } else {
            debug!(stage = ?st.stage, "masternode sync advancing");
        }
        st.attempt = 0;
        st.stage_started = now;
    }

    fn fail(&self, st: &mut SyncState, now: i64) {
        warn!("masternode sync has failed, will retry later");
        st.stage = SyncStage::Failed;
        st.attempt = 0;
        st.last_failure = now;
        st.failures += 1;
    }

    fn chain_synced_locked(&self, st: &mut SyncState, now: i64) -> bool {
        // woke up after a long sleep, start over
        if now - st.last_chain_check > MAX_TIP_AGE_SECONDS {
            st.reset(now);
            st.blockchain_synced = false;
        }
        st.last_chain_check = now;
        if st.blockchain_synced {
            return true;
        }

        let tip_time = self
            .chain
            .tip_height()
            .and_then(|tip| self.chain.block_time(tip));
        match tip_time {
            Some(time) if time + MAX_TIP_AGE_SECONDS >= now => {
                st.blockchain_synced = true;
                true
            }
            _ => false,
        }
    }

    /// Step the sync state machine. Called once a second; `enabled` is the
    /// number of enabled masternodes we currently know.
    pub fn process_tick(&self, enabled: usize) {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let st = &mut *guard;

        st.ticks += 1;
        if (st.ticks - 1) % SYNC_TIMEOUT_SECONDS as u64 != 0 {
            return;
        }

        if st.stage == SyncStage::Finished {
            // lost every masternode, probably asleep for a while
            if enabled == 0 {
                info!("no enabled masternodes left, restarting sync");
                st.reset(now);
            } else {
                return;
            }
        }

        if st.stage == SyncStage::Failed {
            if st.last_failure + SYNC_RETRY_SECONDS < now {
                st.reset(now);
            } else {
                return;
            }
        }

        if st.stage == SyncStage::Initial {
            self.advance(st, now);
        }

        if !self.params.is_regtest() && !self.chain_synced_locked(st, now) {
            st.stage_started = now;
            return;
        }

        let peers = self.outbox.connected_peers();
        let needed = SYNC_THRESHOLD.min(peers.len() as u32).max(1);
        for peer in peers {
            if self.step(st, peer, now, needed, enabled) {
                return;
            }
        }
    }

    /// Ask `peer` for the current stage's objects. `true` once this tick is
    /// done with peers.
    fn step(&self, st: &mut SyncState, peer: PeerId, now: i64, needed: u32, enabled: usize) -> bool {
        let (last, request, fail_on_timeout) = match st.stage {
            SyncStage::List => (st.last_list, LIST_REQUEST, true),
            SyncStage::Winners => (st.last_winner, WINNERS_REQUEST, true),
            SyncStage::Budget => (st.last_budget_item, BUDGET_REQUEST, false),
            _ => return true,
        };

        // items stopped arriving
        if last > 0 && last < now - SYNC_TIMEOUT_SECONDS * 2 && st.attempt >= needed {
            self.advance(st, now);
            return true;
        }
        if last == 0 && self.timed_out(st, now) {
            // an empty budget is normal, an empty list is not
            if fail_on_timeout && self.sporks.is_active(Spork::MasternodePaymentEnforcement) {
                self.fail(st, now);
            } else {
                self.advance(st, now);
            }
            return true;
        }

        if !self.fulfilled.check_and_add(peer, request, now) {
            return false;
        }
        if st.attempt >= SYNC_THRESHOLD * 3 {
            return true;
        }
        let message = match st.stage {
            SyncStage::List => Outbound::RequestMasternodes {
                peer,
                outpoint: None,
            },
            SyncStage::Winners => Outbound::RequestWinners {
                peer,
                count: enabled as u32,
            },
            _ => Outbound::RequestBudgetSync { peer, hash: None },
        };
        self.outbox.send(message);
        st.attempt += 1;
        true
    }

    fn timed_out(&self, st: &SyncState, now: i64) -> bool {
        st.attempt >= SYNC_THRESHOLD * 3 || now - st.stage_started > SYNC_TIMEOUT_SECONDS * 5
    }

    /// Handle an `ssc` from `peer`
    pub fn process_sync_status_count(&self, peer: PeerId, item: SyncItem, count: u32) {
        let mut st = self.state.lock();
        if st.stage >= SyncStage::Failed {
            return;
        }
        let expected = match item {
            SyncItem::List => SyncStage::List,
            SyncItem::Winners => SyncStage::Winners,
            SyncItem::BudgetProposals | SyncItem::BudgetFinalized => SyncStage::Budget,
        };
        if st.stage != expected {
            return;
        }
        let entry = st.reported.entry(item).or_insert((0, 0));
        entry.0 += count as u64;
        entry.1 += 1;
        debug!(%peer, ?item, count, "got inventory count");
    }

    pub fn peer_disconnected(&self, peer: PeerId) {
        self.fulfilled.remove_peer(peer);
    }
}

impl SyncProgress for MasternodeSync {
    fn is_blockchain_synced(&self) -> bool {
        let now = self.clock.now();
        let mut st = self.state.lock();
        self.chain_synced_locked(&mut st, now)
    }

    fn is_masternode_list_synced(&self) -> bool {
        self.stage() > SyncStage::List
    }

    fn is_budget_synced(&self) -> bool {
        self.stage() > SyncStage::Budget
    }

    fn is_synced(&self) -> bool {
        self.stage() == SyncStage::Finished
    }

    fn added_masternode_list(&self) {
        self.state.lock().last_list = self.clock.now();
    }

    fn added_masternode_winner(&self) {
        self.state.lock().last_winner = self.clock.now();
    }

    fn added_budget_item(&self) {
        self.state.lock().last_budget_item = self.clock.now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert_eq!(SyncStage::Initial.next(), SyncStage::List);
        assert_eq!(SyncStage::List.next(), SyncStage::Winners);
        assert_eq!(SyncStage::Winners.next(), SyncStage::Budget);
        assert_eq!(SyncStage::Budget.next(), SyncStage::Finished);
        assert_eq!(SyncStage::Failed.next(), SyncStage::List);
        assert!(SyncStage::Failed > SyncStage::List);
        assert!(SyncStage::Finished > SyncStage::Budget);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(SyncStage::Finished.to_string(), "Synchronization finished");
        assert_eq!(SyncStage::List.to_string(), "Synchronizing masternodes...");
    }
}
