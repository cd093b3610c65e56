//! Periodic masternode maintenance
//!
//! One tick a second advances sync. Once the chain is synced, the driver
//! manages the local masternode every `PING_SECONDS`, prunes the registry
//! and payment lists every minute, writes the caches on a timer and reacts
//! to new tips.

use crate::services::GovernanceNode;
use govnode_core::SyncProgress;
use govnode_masternode::types::PING_SECONDS;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Ticks between registry and payment list maintenance
pub const MAINTENANCE_TICKS: u64 = 60;

/// Payment votes are cast this many blocks ahead of the tip
pub const VOTE_AHEAD_BLOCKS: i64 = 10;

#[derive(Debug, Default)]
struct DriverState {
    synced_ticks: u64,
    last_tip: Option<i64>,
}

pub struct Driver {
    node: Arc<GovernanceNode>,
    dump_every: u64,
    state: Mutex<DriverState>,
}

impl Driver {
    pub fn new(node: Arc<GovernanceNode>, dump_interval_secs: u64) -> Self {
        Self {
            node,
            dump_every: dump_interval_secs.max(1),
            state: Mutex::new(DriverState::default()),
        }
    }

    pub fn node(&self) -> &Arc<GovernanceNode> {
        &self.node
    }

    /// Ticks counted since the chain was first synced
    pub fn synced_ticks(&self) -> u64 {
        self.state.lock().synced_ticks
    }

    pub fn last_tip(&self) -> Option<i64> {
        self.state.lock().last_tip
    }

    /// One second of work
    pub fn tick(&self) {
        let node = &self.node;
        node.sync.process_tick(node.registry.count_enabled(None));
        if !node.sync.is_blockchain_synced() {
            return;
        }

        let ticks = {
            let mut st = self.state.lock();
            st.synced_ticks += 1;
            st.synced_ticks
        };

        if ticks % PING_SECONDS as u64 == 1 {
            if let Some(active) = &node.active {
                active.manage_status();
            }
        }

        if ticks % MAINTENANCE_TICKS == 0 {
            node.registry.check_and_remove(false);
            node.payments.clean_payment_list();
        }

        if ticks % self.dump_every == 0 {
            if let Err(e) = node.dump_caches() {
                error!("failed to write caches: {:#}", e);
            }
        }

        if let Some(tip) = node.chain().tip_height() {
            let changed = {
                let mut st = self.state.lock();
                let changed = st.last_tip != Some(tip);
                st.last_tip = Some(tip);
                changed
            };
            if changed {
                self.new_tip(tip);
            }
        }
    }

    /// Vote on the payee `VOTE_AHEAD_BLOCKS` out and run budget upkeep
    pub fn new_tip(&self, tip: i64) {
        let node = &self.node;
        let voter = node.voter();
        debug!(tip, "new tip");

        if let Err(e) =
            node.payments
                .process_block(tip + VOTE_AHEAD_BLOCKS, voter.as_ref(), &node.rewards)
        {
            warn!(tip, "payment vote failed: {}", e);
        }
        node.budget.new_block(voter.as_ref());
    }

    /// Tick once a second until `shutdown` flips, then write the caches
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        info!("masternode driver started");

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.node.dump_caches() {
            error!("failed to write caches on shutdown: {:#}", e);
        }
        info!("masternode driver stopped");
    }
}
