//! In-memory collaborators for tests

use crate::chain::{
    ChainView, Clock, CollateralCandidate, Spork, SporkPolicy, SuperblockSchedule, SyncProgress,
    Wallet,
};
use crate::error::{CoreError, Result};
use crate::hash::{sha256d, Hash256};
use crate::types::{Amount, Coin, OutPoint, Script, Transaction, TxOut, COIN};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Deterministic block hash used by [`MemoryChain`]
pub fn block_hash_at(height: i64) -> Hash256 {
    sha256d(&height.to_le_bytes())
}

struct ChainState {
    tip: Option<i64>,
    genesis_time: i64,
    spacing: i64,
    utxos: HashMap<OutPoint, Coin>,
    txs: HashMap<Hash256, (Transaction, Option<i64>)>,
}

/// Linear chain with block `h` hashed as `sha256d(h)` and timed at
/// `genesis_time + h * spacing`
pub struct MemoryChain {
    state: RwLock<ChainState>,
    subsidy: AtomicI64,
    masternode_share_percent: AtomicI64,
}

impl MemoryChain {
    pub fn new(tip: i64, genesis_time: i64, spacing: i64) -> Self {
        Self {
            state: RwLock::new(ChainState {
                tip: Some(tip),
                genesis_time,
                spacing,
                utxos: HashMap::new(),
                txs: HashMap::new(),
            }),
            subsidy: AtomicI64::new(5 * COIN),
            masternode_share_percent: AtomicI64::new(60),
        }
    }

    pub fn empty() -> Self {
        let chain = Self::new(0, 0, 60);
        chain.state.write().tip = None;
        chain
    }

    pub fn set_tip(&self, tip: i64) {
        self.state.write().tip = Some(tip);
    }

    pub fn set_subsidy(&self, subsidy: Amount) {
        self.subsidy.store(subsidy, Ordering::SeqCst);
    }

    pub fn set_masternode_share_percent(&self, percent: i64) {
        self.masternode_share_percent.store(percent, Ordering::SeqCst);
    }

    pub fn add_utxo(&self, outpoint: OutPoint, output: TxOut, height: i64) {
        self.state
            .write()
            .utxos
            .insert(outpoint, Coin { output, height });
    }

    pub fn spend(&self, outpoint: &OutPoint) {
        self.state.write().utxos.remove(outpoint);
    }

    /// Insert a transaction mined at `height` (or unmined when `None`)
    pub fn add_transaction(&self, tx: Transaction, height: Option<i64>) -> Hash256 {
        let txid = tx.txid();
        self.state.write().txs.insert(txid, (tx, height));
        txid
    }

    pub fn time_at(&self, height: i64) -> i64 {
        let state = self.state.read();
        state.genesis_time + height * state.spacing
    }
}

impl ChainView for MemoryChain {
    fn tip_height(&self) -> Option<i64> {
        self.state.read().tip
    }

    fn block_hash(&self, height: i64) -> Option<Hash256> {
        let tip = self.state.read().tip?;
        if height < 0 || height > tip {
            return None;
        }
        Some(block_hash_at(height))
    }

    fn block_height(&self, hash: &Hash256) -> Option<i64> {
        let tip = self.state.read().tip?;
        (0..=tip).rev().find(|h| block_hash_at(*h) == *hash)
    }

    fn block_time(&self, height: i64) -> Option<i64> {
        let tip = self.state.read().tip?;
        if height < 0 || height > tip {
            return None;
        }
        Some(self.time_at(height))
    }

    fn unspent_output(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.state.read().utxos.get(outpoint).cloned()
    }

    fn transaction(&self, txid: &Hash256) -> Option<(Transaction, Option<i64>)> {
        self.state.read().txs.get(txid).cloned()
    }

    fn block_subsidy(&self, _height: i64, _proof_of_stake: bool) -> Amount {
        self.subsidy.load(Ordering::SeqCst)
    }

    fn masternode_payment(&self, _height: i64, block_value: Amount) -> Amount {
        block_value * self.masternode_share_percent.load(Ordering::SeqCst) / 100
    }
}

/// Clock that only moves when told to
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct StaticSporks(Mutex<HashSet<Spork>>);

impl StaticSporks {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        let sporks = Self::default();
        for spork in [
            Spork::MasternodePaymentEnforcement,
            Spork::BudgetEnforcement,
            Spork::EnableSuperblocks,
            Spork::PayUpdatedNodes,
        ] {
            sporks.set(spork, true);
        }
        sporks
    }

    pub fn set(&self, spork: Spork, active: bool) {
        let mut set = self.0.lock();
        if active {
            set.insert(spork);
        } else {
            set.remove(&spork);
        }
    }
}

impl SporkPolicy for StaticSporks {
    fn is_active(&self, spork: Spork) -> bool {
        self.0.lock().contains(&spork)
    }
}

/// Sync flags that tests flip by hand
pub struct StaticSync {
    blockchain: AtomicBool,
    list: AtomicBool,
    budget: AtomicBool,
    synced: AtomicBool,
}

impl StaticSync {
    pub fn synced() -> Self {
        Self::with(true)
    }

    pub fn unsynced() -> Self {
        Self::with(false)
    }

    fn with(value: bool) -> Self {
        Self {
            blockchain: AtomicBool::new(value),
            list: AtomicBool::new(value),
            budget: AtomicBool::new(value),
            synced: AtomicBool::new(value),
        }
    }

    pub fn set_blockchain_synced(&self, value: bool) {
        self.blockchain.store(value, Ordering::SeqCst);
    }

    pub fn set_synced(&self, value: bool) {
        self.list.store(value, Ordering::SeqCst);
        self.budget.store(value, Ordering::SeqCst);
        self.synced.store(value, Ordering::SeqCst);
    }
}

impl SyncProgress for StaticSync {
    fn is_blockchain_synced(&self) -> bool {
        self.blockchain.load(Ordering::SeqCst)
    }

    fn is_masternode_list_synced(&self) -> bool {
        self.list.load(Ordering::SeqCst)
    }

    fn is_budget_synced(&self) -> bool {
        self.budget.load(Ordering::SeqCst)
    }

    fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

/// Fixed set of budget payment heights
#[derive(Default)]
pub struct StaticSchedule(Mutex<HashSet<i64>>);

impl StaticSchedule {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn set(&self, height: i64, budget_block: bool) {
        let mut heights = self.0.lock();
        if budget_block {
            heights.insert(height);
        } else {
            heights.remove(&height);
        }
    }
}

impl SuperblockSchedule for StaticSchedule {
    fn is_budget_payment_block(&self, height: i64) -> bool {
        self.0.lock().contains(&height)
    }
}

/// Wallet whose budget collateral lands directly in a [`MemoryChain`]
pub struct MemoryWallet {
    chain: Arc<MemoryChain>,
    candidates: Mutex<Vec<CollateralCandidate>>,
    created: Mutex<Vec<(Hash256, Amount)>>,
    fail: AtomicBool,
}

impl MemoryWallet {
    pub fn new(chain: Arc<MemoryChain>) -> Self {
        Self {
            chain,
            candidates: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn add_candidate(&self, candidate: CollateralCandidate) {
        self.candidates.lock().push(candidate);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every `(hash, fee)` collateral created so far
    pub fn created(&self) -> Vec<(Hash256, Amount)> {
        self.created.lock().clone()
    }
}

impl Wallet for MemoryWallet {
    fn collateral_outputs(&self, amount: Amount) -> Vec<CollateralCandidate> {
        self.candidates
            .lock()
            .iter()
            .filter(|c| {
                self.chain
                    .unspent_output(&c.outpoint)
                    .map(|coin| coin.output.value == amount)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    fn create_budget_collateral(&self, hash: &Hash256, fee: Amount) -> Result<Hash256> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::Wallet("insufficient funds".to_string()));
        }
        let tx = Transaction {
            lock_time: 0,
            outputs: vec![TxOut::new(fee, Script::op_return(hash))],
        };
        let height = self.chain.tip_height();
        let txid = self.chain.add_transaction(tx, height);
        self.created.lock().push((*hash, fee));
        Ok(txid)
    }
}
