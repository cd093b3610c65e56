//! Routes inbound wire messages to the component that owns them
//!
//! Components relay and report misbehaviour through their outbox; the
//! dispatcher only returns messages meant for the sending peer, such as
//! `getdata` answers.

use crate::error::Result;
use crate::fulfilled::FulfilledRequests;
use crate::message::WireMessage;
use crate::sync::MasternodeSync;
use govnode_consensus::MasternodePayments;
use govnode_core::gossip::report_misbehaving;
use govnode_core::{InvKind, Inventory, PeerId};
use govnode_masternode::MasternodeManager;
use govnode_treasury::BudgetManager;
use std::sync::Arc;
use tracing::{debug, trace};

const WINNERS_REQUEST: &str = "mnget";

pub struct Dispatcher {
    registry: Arc<MasternodeManager>,
    payments: Arc<MasternodePayments>,
    budget: Arc<BudgetManager>,
    sync: Arc<MasternodeSync>,
    fulfilled: Arc<FulfilledRequests>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<MasternodeManager>,
        payments: Arc<MasternodePayments>,
        budget: Arc<BudgetManager>,
        sync: Arc<MasternodeSync>,
        fulfilled: Arc<FulfilledRequests>,
    ) -> Self {
        Self {
            registry,
            payments,
            budget,
            sync,
            fulfilled,
        }
    }

    /// Handle one message from `peer`, returning the replies owed to it
    pub fn handle(&self, peer: PeerId, message: WireMessage) -> Result<Vec<WireMessage>> {
        trace!(%peer, command = message.command(), "inbound");
        match message {
            WireMessage::Ping(ping) => self.registry.process_ping(peer, &ping)?,
            WireMessage::Broadcast(mnb) => self.registry.process_broadcast(peer, &mnb)?,
            WireMessage::ListRequest(vin) => self.registry.process_list_request(peer, vin),
            WireMessage::Winner(winner) => self.payments.process_winner(peer, &winner)?,
            WireMessage::GetWinners(count) => self.process_get_winners(peer, count),
            WireMessage::Proposal(proposal) => self.budget.process_proposal(peer, &proposal)?,
            WireMessage::Vote(vote) => self.budget.process_vote(peer, &vote)?,
            WireMessage::FinalizedBudget(budget) => {
                self.budget.process_finalized(peer, &budget)?
            }
            WireMessage::FinalizedVote(vote) => self.budget.process_finalized_vote(peer, &vote)?,
            WireMessage::BudgetSync(hash) => self.budget.process_vote_sync(peer, hash),
            WireMessage::SyncStatusCount { item, count } => {
                self.sync.process_sync_status_count(peer, item, count)
            }
            WireMessage::Inv(inventory) => {
                let wanted: Vec<Inventory> = inventory
                    .into_iter()
                    .filter(|inv| !self.has(inv))
                    .collect();
                if !wanted.is_empty() {
                    return Ok(vec![WireMessage::GetData(wanted)]);
                }
            }
            WireMessage::GetData(inventory) => {
                return Ok(inventory
                    .iter()
                    .filter_map(|inv| self.lookup(inv))
                    .collect())
            }
        }
        Ok(Vec::new())
    }

    fn process_get_winners(&self, peer: PeerId, count: u32) {
        let now = self.registry.clock().now();
        let fresh = self.fulfilled.check_and_add(peer, WINNERS_REQUEST, now);
        if !fresh && self.registry.params().is_mainnet() {
            debug!(%peer, "mnget - peer already asked me for the list");
            report_misbehaving(
                self.registry.outbox().as_ref(),
                peer,
                20,
                "mnget - peer already asked me for the list",
            );
            return;
        }
        let sent = self.payments.sync(peer, count as i64);
        debug!(%peer, sent, "mnget - sent masternode winners");
    }

    fn has(&self, inv: &Inventory) -> bool {
        match inv.kind {
            InvKind::MasternodeAnnounce => self.registry.seen_broadcast(&inv.hash).is_some(),
            InvKind::MasternodePing => self.registry.seen_ping(&inv.hash).is_some(),
            InvKind::MasternodeWinner => self.payments.seen_winner(&inv.hash).is_some(),
            InvKind::BudgetProposal => self.budget.seen_proposal(&inv.hash).is_some(),
            InvKind::BudgetVote => self.budget.seen_vote(&inv.hash).is_some(),
            InvKind::FinalizedBudget => self.budget.seen_finalized(&inv.hash).is_some(),
            InvKind::FinalizedBudgetVote => self.budget.seen_finalized_vote(&inv.hash).is_some(),
        }
    }

    /// Object behind `inv` from the owning component's seen map
    pub fn lookup(&self, inv: &Inventory) -> Option<WireMessage> {
        match inv.kind {
            InvKind::MasternodeAnnounce => self
                .registry
                .seen_broadcast(&inv.hash)
                .map(WireMessage::Broadcast),
            InvKind::MasternodePing => self.registry.seen_ping(&inv.hash).map(WireMessage::Ping),
            InvKind::MasternodeWinner => {
                self.payments.seen_winner(&inv.hash).map(WireMessage::Winner)
            }
            InvKind::BudgetProposal => {
                self.budget.seen_proposal(&inv.hash).map(WireMessage::Proposal)
            }
            InvKind::BudgetVote => self.budget.seen_vote(&inv.hash).map(WireMessage::Vote),
            InvKind::FinalizedBudget => self
                .budget
                .seen_finalized(&inv.hash)
                .map(WireMessage::FinalizedBudget),
            InvKind::FinalizedBudgetVote => self
                .budget
                .seen_finalized_vote(&inv.hash)
                .map(WireMessage::FinalizedVote),
        }
    }

    pub fn peer_disconnected(&self, peer: PeerId) {
        self.sync.peer_disconnected(peer);
    }
}
