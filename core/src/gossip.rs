//! Outbound gossip effects
//!
//! Components never talk to the transport directly. They describe what should
//! go out as [`Outbound`] values and hand them to an [`Outbox`]; the network
//! layer drains the queue and does the actual sending.

use crate::hash::Hash256;
use crate::types::OutPoint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Transport-assigned peer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer={}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvKind {
    MasternodeAnnounce,
    MasternodePing,
    MasternodeWinner,
    BudgetProposal,
    BudgetVote,
    FinalizedBudget,
    FinalizedBudgetVote,
}

/// Content-addressed inventory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Inventory {
    pub kind: InvKind,
    pub hash: Hash256,
}

impl Inventory {
    pub fn new(kind: InvKind, hash: Hash256) -> Self {
        Self { kind, hash }
    }
}

impl fmt::Display for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.kind, self.hash)
    }
}

/// Object classes reported in sync-status counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncItem {
    List,
    Winners,
    BudgetProposals,
    BudgetFinalized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outbound {
    /// Advertise to every connected peer
    Relay(Inventory),
    PushInventory {
        peer: PeerId,
        inventory: Inventory,
    },
    SyncStatusCount {
        peer: PeerId,
        item: SyncItem,
        count: u32,
    },
    /// `dseg`, the full list when `outpoint` is `None`
    RequestMasternodes {
        peer: PeerId,
        outpoint: Option<OutPoint>,
    },
    /// `mnget`
    RequestWinners {
        peer: PeerId,
        count: u32,
    },
    /// `mnvs`, everything when `hash` is `None`
    RequestBudgetSync {
        peer: PeerId,
        hash: Option<Hash256>,
    },
    Misbehaving {
        peer: PeerId,
        score: u32,
        reason: String,
    },
}

pub trait Outbox: Send + Sync {
    fn send(&self, message: Outbound);

    fn connected_peers(&self) -> Vec<PeerId> {
        Vec::new()
    }
}

/// Report misbehaviour through a trait object
pub fn report_misbehaving(outbox: &dyn Outbox, peer: PeerId, score: u32, reason: &str) {
    if score > 0 {
        outbox.send(Outbound::Misbehaving {
            peer,
            score,
            reason: reason.to_string(),
        });
    }
}

/// FIFO outbox drained by the transport
#[derive(Default)]
pub struct QueueOutbox {
    queue: Mutex<VecDeque<Outbound>>,
    peers: Mutex<Vec<PeerId>>,
}

impl QueueOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_peers(&self, peers: Vec<PeerId>) {
        *self.peers.lock() = peers;
    }

    pub fn drain(&self) -> Vec<Outbound> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Outbox for QueueOutbox {
    fn send(&self, message: Outbound) {
        self.queue.lock().push_back(message);
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.lock().clone()
    }
}
