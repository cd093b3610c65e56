//! Masternode registry
//!
//! Holds every known masternode keyed by collateral outpoint, admits
//! announcements and pings from peers, answers list requests and computes
//! the deterministic ranking used by payment voting.

use crate::broadcast::{check_default_port, MasternodeBroadcast};
use crate::error::{MasternodeError, Result};
use crate::ping::MasternodePing;
use crate::types::*;
use govnode_core::gossip::report_misbehaving;
use govnode_core::params::MIN_PAYMENTS_PROTOCOL;
use govnode_core::types::is_private_address;
use govnode_core::{
    ChainParams, ChainView, Clock, Hash256, InvKind, Inventory, MessageSigner, OutPoint, Outbound,
    Outbox, PeerId, PubKey, Script, SnapshotFile, SyncItem, SyncProgress, TxOut,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

pub const CACHE_FILE_NAME: &str = "mncache.dat";
pub const CACHE_MAGIC: &str = "MasternodeCache";

/// Everything the registry persists between runs
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RegistryState {
    masternodes: BTreeMap<OutPoint, Masternode>,
    /// Peers that asked us for the full list, and when they may ask again
    asked_us_for_list: HashMap<PeerId, i64>,
    /// Peers we asked for the full list, and when we may ask again
    we_asked_for_list: HashMap<PeerId, i64>,
    /// Single entries we asked for, and when we may ask again
    we_asked_for_entry: HashMap<OutPoint, i64>,
    seen_broadcasts: HashMap<Hash256, MasternodeBroadcast>,
    seen_pings: HashMap<Hash256, MasternodePing>,
}

/// The local operator, so our own announcements are not re-processed
#[derive(Debug, Default, Clone)]
struct LocalIdentity {
    pubkey: Option<PubKey>,
    vin: Option<OutPoint>,
}

pub struct MasternodeManager {
    params: ChainParams,
    chain: Arc<dyn ChainView>,
    signer: Arc<dyn MessageSigner>,
    clock: Arc<dyn Clock>,
    sync: Arc<dyn SyncProgress>,
    outbox: Arc<dyn Outbox>,
    local: Mutex<LocalIdentity>,
    state: Mutex<RegistryState>,
}

impl MasternodeManager {
    pub fn new(
        params: ChainParams,
        chain: Arc<dyn ChainView>,
        signer: Arc<dyn MessageSigner>,
        clock: Arc<dyn Clock>,
        sync: Arc<dyn SyncProgress>,
        outbox: Arc<dyn Outbox>,
    ) -> Self {
        Self {
            params,
            chain,
            signer,
            clock,
            sync,
            outbox,
            local: Mutex::new(LocalIdentity::default()),
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn chain(&self) -> &Arc<dyn ChainView> {
        &self.chain
    }

    pub fn signer(&self) -> &Arc<dyn MessageSigner> {
        &self.signer
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn outbox(&self) -> &Arc<dyn Outbox> {
        &self.outbox
    }

    /// Record the local operator key and, once known, its collateral
    pub fn set_local(&self, pubkey: PubKey, vin: Option<OutPoint>) {
        let mut local = self.local.lock();
        local.pubkey = Some(pubkey);
        local.vin = vin;
    }

    fn check_one(&self, mn: &mut Masternode, force: bool) {
        mn.check(
            self.clock.now(),
            force,
            self.chain.as_ref(),
            self.params.masternode_collateral,
        );
    }

    pub fn find(&self, vin: &OutPoint) -> Option<Masternode> {
        self.state.lock().masternodes.get(vin).cloned()
    }

    pub fn find_by_payee(&self, payee: &Script) -> Option<Masternode> {
        self.state
            .lock()
            .masternodes
            .values()
            .find(|mn| mn.payee() == *payee)
            .cloned()
    }

    pub fn find_by_pubkey(&self, pubkey: &PubKey) -> Option<Masternode> {
        self.state
            .lock()
            .masternodes
            .values()
            .find(|mn| mn.pubkey_masternode == *pubkey)
            .cloned()
    }

    pub fn add(&self, mn: Masternode) -> bool {
        let mut st = self.state.lock();
        if st.masternodes.contains_key(&mn.vin) {
            return false;
        }
        debug!(target: "masternode", "Adding new Masternode {} - {} now", mn.addr, st.masternodes.len() + 1);
        st.masternodes.insert(mn.vin, mn);
        true
    }

    pub fn remove(&self, vin: &OutPoint) {
        let mut st = self.state.lock();
        if st.masternodes.remove(vin).is_some() {
            debug!(target: "masternode", "Removing Masternode {} - {} now", vin.short(), st.masternodes.len());
        }
    }

    pub fn size(&self) -> usize {
        self.state.lock().masternodes.len()
    }

    /// Number of enabled masternodes at or above `min_protocol`
    /// (the payments minimum when `None`)
    pub fn count_enabled(&self, min_protocol: Option<u32>) -> usize {
        let min_protocol = min_protocol.unwrap_or(MIN_PAYMENTS_PROTOCOL);
        let mut st = self.state.lock();
        let mut count = 0;
        for mn in st.masternodes.values_mut() {
            self.check_one(mn, false);
            if mn.protocol_version >= min_protocol && mn.is_enabled() {
                count += 1;
            }
        }
        count
    }

    /// Snapshot of every masternode after a lifecycle check
    pub fn checked_masternodes(&self) -> Vec<Masternode> {
        let mut st = self.state.lock();
        st.masternodes
            .values_mut()
            .map(|mn| {
                self.check_one(mn, false);
                mn.clone()
            })
            .collect()
    }

    fn scored(
        &self,
        st: &mut RegistryState,
        height: i64,
        min_protocol: u32,
        only_active: bool,
    ) -> Option<Vec<(Hash256, Masternode)>> {
        // no rankings without the block
        self.chain.block_hash(height)?;

        let mut scores = Vec::new();
        for mn in st.masternodes.values_mut() {
            if mn.protocol_version < min_protocol {
                continue;
            }
            if only_active {
                self.check_one(mn, false);
                if !mn.is_enabled() {
                    continue;
                }
            }
            scores.push((mn.calculate_score(height, self.chain.as_ref()), mn.clone()));
        }
        scores.sort_by(|a, b| b.0.cmp(&a.0));
        Some(scores)
    }

    /// 1-based position of `vin` by descending score at `height`
    pub fn rank(
        &self,
        vin: &OutPoint,
        height: i64,
        min_protocol: u32,
        only_active: bool,
    ) -> Option<usize> {
        let mut st = self.state.lock();
        let scores = self.scored(&mut st, height, min_protocol, only_active)?;
        scores
            .iter()
            .position(|(_, mn)| mn.vin == *vin)
            .map(|idx| idx + 1)
    }

    pub fn ranks(&self, height: i64, min_protocol: u32) -> Vec<(usize, Masternode)> {
        if self.chain.block_hash(height).is_none() {
            return Vec::new();
        }
        let mut st = self.state.lock();
        let mut scores: Vec<(Hash256, Masternode)> = Vec::new();
        for mn in st.masternodes.values_mut() {
            self.check_one(mn, false);
            if mn.protocol_version < min_protocol {
                continue;
            }
            // disabled entries are listed last
            let score = if mn.is_enabled() {
                mn.calculate_score(height, self.chain.as_ref())
            } else {
                Hash256::ZERO
            };
            scores.push((score, mn.clone()));
        }
        scores.sort_by(|a, b| b.0.cmp(&a.0));
        scores
            .into_iter()
            .enumerate()
            .map(|(idx, (_, mn))| (idx + 1, mn))
            .collect()
    }

    pub fn by_rank(
        &self,
        rank: usize,
        height: i64,
        min_protocol: u32,
        only_active: bool,
    ) -> Option<Masternode> {
        let mut st = self.state.lock();
        let scores = self.scored(&mut st, height, min_protocol, only_active)?;
        if rank == 0 {
            return None;
        }
        scores.into_iter().nth(rank - 1).map(|(_, mn)| mn)
    }

    /// Highest-scoring enabled masternode at `height`
    pub fn current_winner(&self, height: i64, min_protocol: u32) -> Option<Masternode> {
        let mut st = self.state.lock();
        let mut best: Option<(Hash256, Masternode)> = None;
        for mn in st.masternodes.values_mut() {
            self.check_one(mn, false);
            if mn.protocol_version < min_protocol || !mn.is_enabled() {
                continue;
            }
            let score = mn.calculate_score(height, self.chain.as_ref());
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, mn.clone()));
            }
        }
        best.map(|(_, mn)| mn)
    }

    pub fn check_all(&self) {
        let mut st = self.state.lock();
        for mn in st.masternodes.values_mut() {
            self.check_one(mn, false);
        }
    }

    /// Drop dead and outdated masternodes and prune request bookkeeping
    pub fn check_and_remove(&self, force_expired: bool) {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let st = &mut *guard;

        for mn in st.masternodes.values_mut() {
            self.check_one(mn, false);
        }

        let doomed: Vec<OutPoint> = st
            .masternodes
            .values()
            .filter(|mn| {
                mn.state == MasternodeState::Remove
                    || mn.state == MasternodeState::VinSpent
                    || (force_expired && mn.state == MasternodeState::Expired)
                    || mn.protocol_version < MIN_PAYMENTS_PROTOCOL
            })
            .map(|mn| mn.vin)
            .collect();

        for vin in doomed {
            if let Some(mn) = st.masternodes.remove(&vin) {
                debug!(
                    target: "masternode",
                    "Removing inactive Masternode {} ({}) - {} now",
                    mn.addr,
                    mn.status(),
                    st.masternodes.len()
                );
            }
            st.seen_broadcasts.retain(|_, mnb| mnb.vin != vin);
            st.seen_pings.retain(|_, ping| ping.vin != vin);
            st.we_asked_for_entry.remove(&vin);
        }

        st.asked_us_for_list.retain(|_, until| *until >= now);
        st.we_asked_for_list.retain(|_, until| *until >= now);
        st.we_asked_for_entry.retain(|_, until| *until >= now);

        let horizon = now - REMOVAL_SECONDS * 2;
        st.seen_broadcasts.retain(|_, mnb| {
            mnb.last_ping
                .as_ref()
                .map(|p| p.sig_time >= horizon)
                .unwrap_or(false)
        });
        st.seen_pings.retain(|_, ping| ping.sig_time >= horizon);
    }

    pub fn clear(&self) {
        *self.state.lock() = RegistryState::default();
    }

    fn ask_for_locked(&self, st: &mut RegistryState, peer: PeerId, vin: &OutPoint) {
        let now = self.clock.now();
        if let Some(until) = st.we_asked_for_entry.get(vin) {
            if now < *until {
                // we've asked recently
                return;
            }
        }

        info!(target: "masternode", "Asking node for missing entry, vin: {}", vin.short());
        self.outbox.send(Outbound::RequestMasternodes {
            peer,
            outpoint: Some(*vin),
        });
        st.we_asked_for_entry.insert(*vin, now + MIN_MNP_SECONDS);
    }

    /// Request a single entry we don't know, at most once per `MIN_MNP_SECONDS`
    pub fn ask_for(&self, peer: PeerId, vin: &OutPoint) {
        let mut st = self.state.lock();
        self.ask_for_locked(&mut st, peer, vin);
    }

    /// Request the full list from `peer`
    pub fn dseg_update(&self, peer: PeerId) {
        let now = self.clock.now();
        let mut st = self.state.lock();
        if self.params.is_mainnet() {
            if let Some(until) = st.we_asked_for_list.get(&peer) {
                if now < *until {
                    debug!(target: "masternode", "dseg - we already asked {} for the list; skipping...", peer);
                    return;
                }
            }
        }
        self.outbox.send(Outbound::RequestMasternodes {
            peer,
            outpoint: None,
        });
        st.we_asked_for_list.insert(peer, now + DSEG_SECONDS);
    }

    /// Answer a `dseg` with inventory of enabled public masternodes
    pub fn process_list_request(&self, peer: PeerId, vin: Option<OutPoint>) {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let st = &mut *guard;

        if vin.is_none() && self.params.is_mainnet() {
            if let Some(until) = st.asked_us_for_list.get(&peer) {
                if now < *until {
                    report_misbehaving(self.outbox.as_ref(), peer, 34, "dseg - peer already asked for the list");
                    return;
                }
            }
            st.asked_us_for_list.insert(peer, now + DSEG_SECONDS);
        }

        let mut count = 0u32;
        for mn in st.masternodes.values_mut() {
            if is_private_address(&mn.addr) {
                continue;
            }
            mn.check(now, false, self.chain.as_ref(), self.params.masternode_collateral);
            if !mn.is_enabled() {
                continue;
            }
            if vin.is_some() && vin != Some(mn.vin) {
                continue;
            }

            debug!(target: "masternode", "dseg - Sending Masternode entry - {}", mn.addr);
            let mnb = MasternodeBroadcast::from(&*mn);
            let hash = mnb.hash();
            self.outbox.send(Outbound::PushInventory {
                peer,
                inventory: Inventory::new(InvKind::MasternodeAnnounce, hash),
            });
            count += 1;
            st.seen_broadcasts.entry(hash).or_insert(mnb);

            if vin == Some(mn.vin) {
                debug!(target: "masternode", "dseg - Sent 1 Masternode entry to {}", peer);
                return;
            }
        }

        if vin.is_none() {
            self.outbox.send(Outbound::SyncStatusCount {
                peer,
                item: SyncItem::List,
                count,
            });
            debug!(target: "masternode", "dseg - Sent {} Masternode entries to {}", count, peer);
        }
    }

    pub fn seen_broadcast(&self, hash: &Hash256) -> Option<MasternodeBroadcast> {
        self.state.lock().seen_broadcasts.get(hash).cloned()
    }

    pub fn seen_ping(&self, hash: &Hash256) -> Option<MasternodePing> {
        self.state.lock().seen_pings.get(hash).cloned()
    }

    fn relay(&self, kind: InvKind, hash: Hash256) {
        self.outbox.send(Outbound::Relay(Inventory::new(kind, hash)));
    }

    /// Collateral output of `vin` pays exactly the collateral amount to `pubkey`
    pub fn is_vin_associated_with_pubkey(&self, vin: &OutPoint, pubkey: &PubKey) -> bool {
        let payee = Script::pay_to_pubkey_hash(pubkey);
        let output: Option<TxOut> = self
            .chain
            .transaction(&vin.txid)
            .and_then(|(tx, _)| tx.outputs.get(vin.index as usize).cloned())
            .or_else(|| self.chain.unspent_output(vin).map(|coin| coin.output));
        match output {
            Some(out) => out.value == self.params.masternode_collateral && out.script == payee,
            None => false,
        }
    }

    /// The ping carried by an announcement must be for the same collateral,
    /// recent, and signed by the announced operator key
    fn check_embedded_ping(&self, mnb: &MasternodeBroadcast, now: i64) -> Result<()> {
        let ping = mnb.last_ping.as_ref().ok_or_else(|| {
            MasternodeError::rejected(format!("Missing ping in announcement {}", mnb.vin.short()), 0)
        })?;
        if ping.vin != mnb.vin {
            return Err(MasternodeError::rejected(
                format!(
                    "Announcement for {} carries a ping for {}",
                    mnb.vin.short(),
                    ping.vin.short()
                ),
                0,
            ));
        }
        ping.check_time(now)?;
        ping.verify(&mnb.pubkey_masternode, self.signer.as_ref())
    }

    /// Full ping admission; on success the ping is stored and relayed
    fn check_ping(&self, st: &mut RegistryState, ping: &MasternodePing, require_enabled: bool) -> Result<()> {
        let now = self.clock.now();
        ping.check_time(now)?;

        let mn = match st.masternodes.get_mut(&ping.vin) {
            Some(mn) if mn.protocol_version >= MIN_PAYMENTS_PROTOCOL => mn,
            _ => {
                debug!(target: "masternode", "CheckAndUpdate - Couldn't find compatible Masternode entry, vin: {}", ping.vin.short());
                return Err(MasternodeError::UnknownMasternode(ping.vin));
            }
        };

        // pre-enabled nodes need their pings to ever become enabled
        if require_enabled && !mn.is_enabled() && !mn.is_pre_enabled() {
            return Err(MasternodeError::rejected(
                format!("Masternode {} is not enabled", ping.vin.short()),
                0,
            ));
        }

        // update only if there is no known ping or the last one is old enough
        if mn.is_pinged_within(MIN_MNP_SECONDS - 60, ping.sig_time) {
            return Err(MasternodeError::rejected(
                format!("Masternode ping arrived too early, vin: {}", ping.vin.short()),
                0,
            ));
        }

        ping.verify(&mn.pubkey_masternode, self.signer.as_ref())?;

        match self.chain.block_height(&ping.block_hash) {
            Some(height) => {
                let tip = self.chain.tip_height().unwrap_or(0);
                if height < tip - PING_MAX_ANCHOR_AGE {
                    return Err(MasternodeError::rejected(
                        format!(
                            "Masternode {} block hash {} is too old",
                            ping.vin.short(),
                            ping.block_hash
                        ),
                        0,
                    ));
                }
            }
            None => {
                return Err(MasternodeError::rejected(
                    format!(
                        "Masternode {} ping is invalid, unknown block hash {}",
                        ping.vin.short(),
                        ping.block_hash
                    ),
                    0,
                ));
            }
        }

        mn.last_ping = Some(ping.clone());
        let mnb_hash = MasternodeBroadcast::from(&*mn).hash();
        mn.check(now, true, self.chain.as_ref(), self.params.masternode_collateral);
        let enabled = mn.is_enabled();

        if let Some(seen) = st.seen_broadcasts.get_mut(&mnb_hash) {
            seen.last_ping = Some(ping.clone());
        }

        if !enabled {
            return Err(MasternodeError::rejected(
                format!("Masternode {} is not enabled after ping", ping.vin.short()),
                0,
            ));
        }

        debug!(target: "masternode", "CheckAndUpdate - Masternode ping accepted, vin: {}", ping.vin.short());
        self.relay(InvKind::MasternodePing, ping.hash());
        Ok(())
    }

    /// Announcement checks, and in-place update of a known enabled entry
    fn check_broadcast(&self, st: &mut RegistryState, mnb: &MasternodeBroadcast) -> Result<()> {
        let now = self.clock.now();

        if mnb.sig_time > now + 60 * 60 {
            return Err(MasternodeError::rejected(
                format!(
                    "Signature rejected, too far into the future {}",
                    mnb.vin.short()
                ),
                1,
            ));
        }

        self.check_embedded_ping(mnb, now)?;

        if mnb.protocol_version < MIN_PAYMENTS_PROTOCOL {
            return Err(MasternodeError::rejected(
                format!(
                    "ignoring outdated Masternode {} protocol version {}",
                    mnb.vin.short(),
                    mnb.protocol_version
                ),
                0,
            ));
        }

        if Script::pay_to_pubkey_hash(&mnb.pubkey_collateral).len() != 25 {
            return Err(MasternodeError::rejected("pubkey the wrong size", 100));
        }
        if Script::pay_to_pubkey_hash(&mnb.pubkey_masternode).len() != 25 {
            return Err(MasternodeError::rejected("pubkey2 the wrong size", 100));
        }

        mnb.verify_signature(self.signer.as_ref())?;
        check_default_port(&mnb.addr, &self.params)?;

        let existing = match st.masternodes.get_mut(&mnb.vin) {
            Some(mn) => mn,
            // nothing to update
            None => return Ok(()),
        };

        if existing.sig_time >= mnb.sig_time {
            return Err(MasternodeError::rejected(
                format!(
                    "Bad sigTime {} for Masternode {} (existing broadcast is at {})",
                    mnb.sig_time,
                    mnb.vin.short(),
                    existing.sig_time
                ),
                0,
            ));
        }

        if !existing.is_enabled() {
            return Ok(());
        }

        if existing.pubkey_collateral == mnb.pubkey_collateral
            && !existing.is_broadcasted_within(MIN_MNB_SECONDS, now)
        {
            if existing.update_from_broadcast(mnb) {
                existing.check(now, false, self.chain.as_ref(), self.params.masternode_collateral);
                if existing.is_enabled() {
                    self.relay(InvKind::MasternodeAnnounce, mnb.hash());
                }
                if let Some(ping) = &mnb.last_ping {
                    st.seen_pings.insert(ping.hash(), ping.clone());
                }
            }
            self.sync.added_masternode_list();
        }

        Ok(())
    }

    /// Admit a masternode we don't have as enabled yet
    fn check_inputs_and_add(&self, st: &mut RegistryState, mnb: &MasternodeBroadcast) -> Result<()> {
        let now = self.clock.now();

        {
            let local = self.local.lock();
            if local.vin == Some(mnb.vin) && local.pubkey.as_ref() == Some(&mnb.pubkey_masternode) {
                // our own announcement, nothing to do
                return Ok(());
            }
        }

        self.check_embedded_ping(mnb, now)?;

        if let Some(existing) = st.masternodes.get(&mnb.vin) {
            if existing.is_enabled() {
                return Ok(());
            }
            st.masternodes.remove(&mnb.vin);
        }

        match collateral_status(self.chain.as_ref(), &mnb.vin, self.params.masternode_collateral) {
            CollateralStatus::Ok => {}
            CollateralStatus::UtxoNotFound => {
                return Err(MasternodeError::rejected(
                    format!("Failed to find Masternode UTXO, vin: {}", mnb.vin.short()),
                    0,
                ));
            }
            CollateralStatus::InvalidAmount => {
                return Err(MasternodeError::rejected(
                    format!("Masternode UTXO should have exactly the collateral amount, vin: {}", mnb.vin.short()),
                    33,
                ));
            }
        }

        let age = self.chain.input_age(&mnb.vin);
        if age < MIN_CONFIRMATIONS {
            // let a later copy of this announcement be processed again
            st.seen_broadcasts.remove(&mnb.hash());
            return Err(MasternodeError::rejected(
                format!(
                    "Input must have at least {} confirmations, vin: {}",
                    MIN_CONFIRMATIONS,
                    mnb.vin.short()
                ),
                0,
            ));
        }

        // sig time must not predate the block where the collateral matured
        if let Some(coin) = self.chain.unspent_output(&mnb.vin) {
            let conf_height = coin.height + MIN_CONFIRMATIONS - 1;
            if let Some(conf_time) = self.chain.block_time(conf_height) {
                if conf_time > mnb.sig_time {
                    return Err(MasternodeError::rejected(
                        format!(
                            "Bad sigTime {} for Masternode {} (collateral matured at block {} time {})",
                            mnb.sig_time,
                            mnb.vin.short(),
                            conf_height,
                            conf_time
                        ),
                        0,
                    ));
                }
            }
        }

        info!(target: "masternode", "Got NEW masternode entry - {} - {}", mnb.vin.short(), mnb.addr);
        let mn = Masternode::from(mnb);
        st.masternodes.insert(mn.vin, mn);

        let is_local = is_private_address(&mnb.addr) && !self.params.is_regtest();
        if !is_local {
            self.relay(InvKind::MasternodeAnnounce, mnb.hash());
        }
        Ok(())
    }

    /// Handle an `mnb` from `peer`
    pub fn process_broadcast(&self, peer: PeerId, mnb: &MasternodeBroadcast) -> Result<()> {
        let hash = mnb.hash();
        let mut guard = self.state.lock();
        let st = &mut *guard;

        if st.seen_broadcasts.contains_key(&hash) {
            self.sync.added_masternode_list();
            return Ok(());
        }
        st.seen_broadcasts.insert(hash, mnb.clone());

        if let Err(e) = self.check_broadcast(st, mnb) {
            report_misbehaving(self.outbox.as_ref(), peer, e.dos(), &e.to_string());
            return Err(e);
        }

        // the signed collateral must belong to the announcing key
        if !self.is_vin_associated_with_pubkey(&mnb.vin, &mnb.pubkey_collateral) {
            let e = MasternodeError::rejected(
                format!("Got mismatched pubkey and vin {}", mnb.vin.short()),
                33,
            );
            report_misbehaving(self.outbox.as_ref(), peer, e.dos(), &e.to_string());
            return Err(e);
        }

        match self.check_inputs_and_add(st, mnb) {
            Ok(()) => {
                self.sync.added_masternode_list();
                Ok(())
            }
            Err(e) => {
                warn!(target: "masternode", "mnb - Rejected Masternode entry {}: {}", mnb.addr, e);
                report_misbehaving(self.outbox.as_ref(), peer, e.dos(), &e.to_string());
                Err(e)
            }
        }
    }

    /// Handle an `mnp` from `peer`
    pub fn process_ping(&self, peer: PeerId, ping: &MasternodePing) -> Result<()> {
        let hash = ping.hash();
        let mut guard = self.state.lock();
        let st = &mut *guard;

        if st.seen_pings.contains_key(&hash) {
            return Ok(());
        }
        st.seen_pings.insert(hash, ping.clone());

        match self.check_ping(st, ping, true) {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.dos() > 0 {
                    report_misbehaving(self.outbox.as_ref(), peer, e.dos(), &e.to_string());
                } else if !st.masternodes.contains_key(&ping.vin) {
                    // something significant is broken or this node is unknown
                    self.ask_for_locked(st, peer, &ping.vin);
                }
                Err(e)
            }
        }
    }

    /// Add or refresh our own announcement
    pub fn update_masternode_list(&self, mnb: &MasternodeBroadcast) {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if let Some(ping) = &mnb.last_ping {
            st.seen_pings.insert(ping.hash(), ping.clone());
        }
        st.seen_broadcasts.insert(mnb.hash(), mnb.clone());

        info!(target: "masternode", "UpdateMasternodeList - addr: {}, vin: {}", mnb.addr, mnb.vin.short());
        match st.masternodes.get_mut(&mnb.vin) {
            Some(mn) => {
                mn.update_from_broadcast(mnb);
            }
            None => {
                st.masternodes.insert(mnb.vin, Masternode::from(mnb));
            }
        }
    }

    /// Store and relay a ping produced by the local operator
    pub fn record_local_ping(&self, ping: &MasternodePing) -> Result<()> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let mn = st
            .masternodes
            .get_mut(&ping.vin)
            .ok_or(MasternodeError::UnknownMasternode(ping.vin))?;

        if mn.is_pinged_within(PING_SECONDS, ping.sig_time) {
            return Err(MasternodeError::rejected("Too early to send Masternode Ping", 0));
        }

        mn.last_ping = Some(ping.clone());
        let mnb_hash = MasternodeBroadcast::from(&*mn).hash();
        st.seen_pings.insert(ping.hash(), ping.clone());
        if let Some(seen) = st.seen_broadcasts.get_mut(&mnb_hash) {
            seen.last_ping = Some(ping.clone());
        }

        self.relay(InvKind::MasternodePing, ping.hash());
        Ok(())
    }

    /// Check a cache file without loading it
    pub fn verify_cache(file: &SnapshotFile) -> Result<()> {
        file.verify::<RegistryState>()?;
        Ok(())
    }

    pub fn dump(&self, file: &SnapshotFile) -> Result<()> {
        let started = std::time::Instant::now();
        {
            let st = self.state.lock();
            file.write(&*st)?;
        }
        file.verify::<RegistryState>()?;
        info!(
            target: "masternode",
            "Written info to {}  {}ms",
            file.path().display(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Replace state from a cache file. Returns false when there was none.
    pub fn load(&self, file: &SnapshotFile) -> Result<bool> {
        match file.read::<RegistryState>() {
            Ok(loaded) => {
                *self.state.lock() = loaded;
                self.check_and_remove(false);
                info!(target: "masternode", "Loaded info from {}  {}", file.path().display(), self);
                Ok(true)
            }
            Err(e) if e.is_missing() => {
                info!(target: "masternode", "Missing masternode cache file - {}, will try to recreate", file.path().display());
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Display for MasternodeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        write!(
            f,
            "Masternodes: {}, peers who asked us for Masternode list: {}, peers we asked for Masternode list: {}, entries in Masternode list we asked for: {}",
            st.masternodes.len(),
            st.asked_us_for_list.len(),
            st.we_asked_for_list.len(),
            st.we_asked_for_entry.len()
        )
    }
}
