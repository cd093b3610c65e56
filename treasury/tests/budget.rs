//! Budget scenarios: proposal selection, finalized budget voting and
//! payment checks, orphan votes, sync and persistence

use govnode_core::testing::{block_hash_at, ManualClock, MemoryChain, MemoryWallet, StaticSync};
use govnode_core::{
    ChainParams, Hash256, InvKind, KeyId, MessageSigner, OutPoint, Outbound, PeerId, QueueOutbox,
    Script, SecretKey, SnapshotFile, SyncItem, Transaction, TxOut, COIN, PROTOCOL_VERSION,
};
use govnode_crypto::LegacySigner;
use govnode_masternode::{LocalVoter, MasternodeBroadcast, MasternodeManager, MasternodePing};
use govnode_treasury::*;
use std::sync::Arc;

const T0: i64 = 1_700_000_000;
const TIP: i64 = 20_000;
const CYCLE: i64 = 1000;
const NEXT_CYCLE: i64 = 21_000;
const PEER: PeerId = PeerId(5);

struct Harness {
    params: ChainParams,
    chain: Arc<MemoryChain>,
    clock: Arc<ManualClock>,
    sync: Arc<StaticSync>,
    outbox: Arc<QueueOutbox>,
    wallet: Arc<MemoryWallet>,
    registry: Arc<MasternodeManager>,
    budget: BudgetManager,
}

fn test_params() -> ChainParams {
    let mut params = ChainParams::test();
    params.budget_cycle_blocks = CYCLE;
    params
}

fn harness_with(params: ChainParams, mode: BudgetMode, gate: VoteGate) -> Harness {
    let chain = Arc::new(MemoryChain::new(TIP, T0 - TIP * 60, 60));
    chain.set_subsidy(30 * COIN);
    let sync = Arc::new(StaticSync::synced());
    let outbox = Arc::new(QueueOutbox::new());
    let wallet = Arc::new(MemoryWallet::new(chain.clone()));
    let clock = Arc::new(ManualClock::new(T0));
    let registry = Arc::new(MasternodeManager::new(
        params.clone(),
        chain.clone(),
        Arc::new(LegacySigner),
        clock.clone(),
        sync.clone(),
        outbox.clone(),
    ));
    let budget = BudgetManager::new(registry.clone(), sync.clone(), wallet.clone(), mode, gate);
    Harness {
        params,
        chain,
        clock,
        sync,
        outbox,
        wallet,
        registry,
        budget,
    }
}

fn harness(mode: BudgetMode, gate: VoteGate) -> Harness {
    harness_with(test_params(), mode, gate)
}

/// Register an enabled masternode and return its operator identity
fn masternode(h: &Harness, n: u8) -> LocalVoter {
    let signer = LegacySigner;
    let collateral = SecretKey([n; 32]);
    let operator = SecretKey([n.wrapping_add(100); 32]);
    let vin = OutPoint::new(govnode_core::sha256d(&[n]), 0);
    let collateral_pubkey = signer.public_key(&collateral).unwrap();
    h.chain.add_utxo(
        vin,
        TxOut::new(100_000 * COIN, Script::pay_to_pubkey_hash(&collateral_pubkey)),
        100,
    );

    let pubkey = signer.public_key(&operator).unwrap();
    let mut mnb = MasternodeBroadcast::new(
        vin,
        format!("8.8.{}.1:{}", n, h.params.default_port).parse().unwrap(),
        collateral_pubkey,
        pubkey.clone(),
        PROTOCOL_VERSION,
    );
    mnb.sign(&collateral, T0 - 700, &signer).unwrap();
    let mut ping = MasternodePing::new(vin, block_hash_at(TIP - 12), T0 - 50);
    ping.sign(&operator, &signer).unwrap();
    mnb.last_ping = Some(ping);
    h.registry.update_masternode_list(&mnb);

    LocalVoter {
        vin,
        key: operator,
        pubkey,
    }
}

fn masternodes(h: &Harness, count: u8) -> Vec<LocalVoter> {
    (1..=count).map(|n| masternode(h, n)).collect()
}

fn somebody(n: u8) -> Script {
    Script::pay_to_key_id(&KeyId([n; 20]))
}

/// Burn `fee` to `OP_RETURN <hash>` in a transaction mined at `height`
fn fund(h: &Harness, hash: &Hash256, fee: i64, height: i64) -> Hash256 {
    let tx = Transaction {
        lock_time: 0,
        outputs: vec![TxOut::new(fee, Script::op_return(hash))],
    };
    h.chain.add_transaction(tx, Some(height))
}

/// One-payment proposal for the next cycle, funded ten blocks ago
fn proposal(h: &Harness, name: &str, payee: u8, amount: i64) -> ProposalBroadcast {
    let mut broadcast = ProposalBroadcast::with_payment_count(
        name,
        "https://forum.example/p",
        1,
        somebody(payee),
        amount,
        NEXT_CYCLE,
        Hash256::ZERO,
        CYCLE,
    )
    .unwrap();
    broadcast.fee_txid = fund(h, &broadcast.hash(), PROPOSAL_FEE_TX, TIP - 10);
    broadcast
}

fn finalized(h: &Harness, payments: Vec<BudgetPayment>) -> FinalizedBudgetBroadcast {
    let mut broadcast = FinalizedBudgetBroadcast::new("main", NEXT_CYCLE, payments, Hash256::ZERO);
    broadcast.fee_txid = fund(h, &broadcast.hash(), BUDGET_FEE_TX, TIP - 10);
    broadcast
}

fn payment_for(p: &ProposalBroadcast) -> BudgetPayment {
    BudgetPayment::new(p.hash(), p.payee.clone(), p.amount)
}

fn vote(voter: &LocalVoter, proposal: &Hash256, outcome: VoteOutcome) -> BudgetVote {
    let mut vote = BudgetVote::new(voter.vin, *proposal, outcome, T0);
    vote.sign(&voter.key, &LegacySigner).unwrap();
    vote
}

fn budget_vote(voter: &LocalVoter, budget: &Hash256) -> FinalizedBudgetVote {
    let mut vote = FinalizedBudgetVote::new(voter.vin, *budget, T0);
    vote.sign(&voter.key, &LegacySigner).unwrap();
    vote
}

fn vote_yes(h: &Harness, voters: &[LocalVoter], proposal: &Hash256) {
    for voter in voters {
        h.budget
            .process_vote(PEER, &vote(voter, proposal, VoteOutcome::Yes))
            .unwrap();
    }
}

#[test]
fn test_selection_fills_budget_by_support() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let voters = masternodes(&h, 50);
    assert_eq!(h.budget.total_budget(NEXT_CYCLE), 3000 * COIN);

    let first = proposal(&h, "first", 1, 1000 * COIN);
    let second = proposal(&h, "second", 2, 2000 * COIN);
    let third = proposal(&h, "third", 3, 500 * COIN);
    for p in [&first, &second, &third] {
        h.budget.process_proposal(PEER, p).unwrap();
    }
    vote_yes(&h, &voters[..50], &first.hash());
    vote_yes(&h, &voters[..30], &second.hash());
    vote_yes(&h, &voters[..10], &third.hash());

    let selected = h.budget.get_budget();
    let names: Vec<&str> = selected.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["first", "second"]);
    assert_eq!(selected[0].allotted, 1000 * COIN);
    assert_eq!(selected[1].allotted, 2000 * COIN);

    // passing, but over the cap once the others are paid
    let third = h.budget.find_proposal(&third.hash()).unwrap();
    assert_eq!(third.yeas(), 10);
    assert_eq!(third.allotted, 0);
}

#[test]
fn test_unestablished_or_unpopular_proposals_do_not_pass() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let voters = masternodes(&h, 20);

    let popular = proposal(&h, "popular", 1, 100 * COIN);
    let mut fresh = ProposalBroadcast::with_payment_count(
        "fresh",
        "",
        1,
        somebody(2),
        100 * COIN,
        NEXT_CYCLE,
        Hash256::ZERO,
        CYCLE,
    )
    .unwrap();
    // collateral in the tip block, younger than the establishment period
    fresh.fee_txid = fund(&h, &fresh.hash(), PROPOSAL_FEE_TX, TIP - 3);
    let unpopular = proposal(&h, "unpopular", 3, 100 * COIN);
    for p in [&popular, &fresh, &unpopular] {
        h.budget.process_proposal(PEER, p).unwrap();
    }
    vote_yes(&h, &voters, &popular.hash());
    vote_yes(&h, &voters, &fresh.hash());
    vote_yes(&h, &voters[..2], &unpopular.hash());

    let names: Vec<String> = h.budget.get_budget().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["popular".to_string()]);
}

#[test]
fn test_auto_vote_on_matching_budget() {
    let h = harness(BudgetMode::Auto, VoteGate::forced(true));
    let voters = masternodes(&h, 10);
    let first = proposal(&h, "first", 1, 1000 * COIN);
    let second = proposal(&h, "second", 2, 2000 * COIN);
    for p in [&first, &second] {
        h.budget.process_proposal(PEER, p).unwrap();
        vote_yes(&h, &voters, &p.hash());
    }

    // payment order does not matter
    let fb = finalized(&h, vec![payment_for(&second), payment_for(&first)]);
    h.budget.process_finalized(PEER, &fb).unwrap();
    h.outbox.drain();

    h.budget.check_and_remove(Some(&voters[0]));
    let stored = h.budget.find_finalized(&fb.hash()).unwrap();
    assert_eq!(stored.vote_count(), 1);
    assert!(stored.votes.contains_key(&voters[0].vin));
    assert!(h.outbox.drain().iter().any(|m| matches!(m,
        Outbound::Relay(inv) if inv.kind == InvKind::FinalizedBudgetVote)));

    // checked once only
    h.budget.check_and_remove(Some(&voters[1]));
    assert_eq!(h.budget.find_finalized(&fb.hash()).unwrap().vote_count(), 1);
}

#[test]
fn test_no_auto_vote_on_mismatch() {
    let h = harness(BudgetMode::Auto, VoteGate::forced(true));
    let voters = masternodes(&h, 10);
    let first = proposal(&h, "first", 1, 1000 * COIN);
    let second = proposal(&h, "second", 2, 2000 * COIN);
    for p in [&first, &second] {
        h.budget.process_proposal(PEER, p).unwrap();
        vote_yes(&h, &voters, &p.hash());
    }

    let partial = finalized(&h, vec![payment_for(&first)]);
    let mut inflated = payment_for(&second);
    inflated.amount -= 1;
    let skewed = finalized(&h, vec![payment_for(&first), inflated]);
    for fb in [&partial, &skewed] {
        h.budget.process_finalized(PEER, fb).unwrap();
    }

    h.budget.check_and_remove(Some(&voters[0]));
    assert_eq!(h.budget.find_finalized(&partial.hash()).unwrap().vote_count(), 0);
    assert_eq!(h.budget.find_finalized(&skewed.hash()).unwrap().vote_count(), 0);
    assert!(h.budget.find_finalized(&partial.hash()).unwrap().auto_checked);
}

#[test]
fn test_gate_and_mode_hold_back_votes() {
    let closed = harness(BudgetMode::Auto, VoteGate::forced(false));
    let suggest = harness(BudgetMode::Suggest, VoteGate::forced(true));
    for h in [&closed, &suggest] {
        let voters = masternodes(h, 10);
        let first = proposal(h, "first", 1, 1000 * COIN);
        h.budget.process_proposal(PEER, &first).unwrap();
        vote_yes(h, &voters, &first.hash());
        let fb = finalized(h, vec![payment_for(&first)]);
        h.budget.process_finalized(PEER, &fb).unwrap();

        h.budget.check_and_remove(Some(&voters[0]));
        let stored = h.budget.find_finalized(&fb.hash()).unwrap();
        assert_eq!(stored.vote_count(), 0);
    }
    // the gate said no, so the budget is looked at again next time
    let fb = closed.budget.finalized_budgets();
    assert!(!fb[0].auto_checked);
}

#[test]
fn test_proposal_admission() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let p = proposal(&h, "first", 1, 1000 * COIN);

    h.budget.process_proposal(PEER, &p).unwrap();
    assert_eq!(h.budget.proposal_count(), 1);
    assert!(h.budget.seen_proposal(&p.hash()).is_some());
    assert!(h.outbox.drain().iter().any(|m| matches!(m,
        Outbound::Relay(inv) if inv.kind == InvKind::BudgetProposal && inv.hash == p.hash())));

    // already seen
    h.budget.process_proposal(PEER, &p).unwrap();
    assert!(h.outbox.is_empty());

    // no collateral at all
    let mut unfunded = p.clone();
    unfunded.name = "unfunded".to_string();
    assert!(matches!(
        h.budget.process_proposal(PEER, &unfunded),
        Err(BudgetError::Collateral { confirmations: 0, .. })
    ));
    assert_eq!(h.budget.immature_count(), 0);

    // over the cycle's treasury
    let greedy = proposal(&h, "greedy", 2, 3001 * COIN);
    assert!(h.budget.process_proposal(PEER, &greedy).is_err());
    assert!(h.budget.find_proposal(&greedy.hash()).is_none());
    assert!(h.budget.find_proposal_by_name("first").is_some());
}

#[test]
fn test_immature_proposal_is_added_once_confirmed() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let mut p = ProposalBroadcast::with_payment_count(
        "young",
        "",
        1,
        somebody(1),
        100 * COIN,
        NEXT_CYCLE,
        Hash256::ZERO,
        CYCLE,
    )
    .unwrap();
    p.fee_txid = fund(&h, &p.hash(), PROPOSAL_FEE_TX, TIP);

    let err = h.budget.process_proposal(PEER, &p).unwrap_err();
    assert!(matches!(err, BudgetError::Collateral { confirmations: 1, .. }));
    assert_eq!(h.budget.immature_count(), 1);

    // the same proposal again, from another peer
    assert!(h.budget.process_proposal(PeerId(6), &p).is_err());
    assert_eq!(h.budget.immature_count(), 1);
    assert_eq!(h.budget.proposal_count(), 0);

    // first maintenance height past the required confirmations
    h.chain.set_tip(20_006);
    h.outbox.drain();
    h.budget.new_block(None);

    assert_eq!(h.budget.immature_count(), 0);
    assert_eq!(h.budget.proposal_count(), 1);
    assert!(h.budget.seen_proposal(&p.hash()).is_some());
    assert!(h.outbox.drain().iter().any(|m| matches!(m,
        Outbound::Relay(inv) if inv.kind == InvKind::BudgetProposal && inv.hash == p.hash())));
}

#[test]
fn test_vote_admission() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let voters = masternodes(&h, 2);
    let p = proposal(&h, "first", 1, 1000 * COIN);
    h.budget.process_proposal(PEER, &p).unwrap();
    h.outbox.drain();

    let yes = vote(&voters[0], &p.hash(), VoteOutcome::Yes);
    h.budget.process_vote(PEER, &yes).unwrap();
    assert!(h.budget.seen_vote(&yes.hash()).is_some());
    assert!(h.outbox.drain().iter().any(|m| matches!(m,
        Outbound::Relay(inv) if inv.kind == InvKind::BudgetVote && inv.hash == yes.hash())));

    // changing the vote within the hour is refused
    let mut no = BudgetVote::new(voters[0].vin, p.hash(), VoteOutcome::No, T0 + 60);
    no.sign(&voters[0].key, &LegacySigner).unwrap();
    assert!(h.budget.process_vote(PEER, &no).is_err());
    let stored = h.budget.find_proposal(&p.hash()).unwrap();
    assert_eq!(stored.yeas(), 1);
    assert_eq!(stored.nays(), 0);

    // signed with the wrong key
    let mut forged = BudgetVote::new(voters[1].vin, p.hash(), VoteOutcome::No, T0);
    forged.sign(&voters[0].key, &LegacySigner).unwrap();
    assert!(h.budget.process_vote(PEER, &forged).is_err());
    assert_eq!(h.budget.find_proposal(&p.hash()).unwrap().nays(), 0);
    assert!(h.outbox.drain().iter().any(|m| matches!(m,
        Outbound::RequestMasternodes { outpoint: Some(vin), .. } if *vin == voters[1].vin)));
}

#[test]
fn test_vote_from_unknown_masternode_asks_for_it() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let p = proposal(&h, "first", 1, 1000 * COIN);
    h.budget.process_proposal(PEER, &p).unwrap();
    h.outbox.drain();

    let stranger = LocalVoter {
        vin: OutPoint::new(govnode_core::sha256d(b"stranger"), 1),
        key: SecretKey([77u8; 32]),
        pubkey: LegacySigner.public_key(&SecretKey([77u8; 32])).unwrap(),
    };
    let v = vote(&stranger, &p.hash(), VoteOutcome::Yes);
    assert!(matches!(
        h.budget.process_vote(PEER, &v),
        Err(BudgetError::UnknownMasternode(vin)) if vin == stranger.vin
    ));
    assert!(h.budget.seen_vote(&v.hash()).is_none());
    assert!(h.outbox.drain().iter().any(|m| matches!(m,
        Outbound::RequestMasternodes { peer, outpoint: Some(_) } if *peer == PEER)));
}

#[test]
fn test_orphan_votes_wait_for_their_proposal() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let voters = masternodes(&h, 2);
    let p = proposal(&h, "late", 1, 1000 * COIN);

    let early = vote(&voters[0], &p.hash(), VoteOutcome::Yes);
    assert!(matches!(
        h.budget.process_vote(PEER, &early),
        Err(BudgetError::UnknownProposal(hash)) if hash == p.hash()
    ));
    let requests: Vec<Outbound> = h
        .outbox
        .drain()
        .into_iter()
        .filter(|m| matches!(m, Outbound::RequestBudgetSync { .. }))
        .collect();
    assert_eq!(
        requests,
        vec![Outbound::RequestBudgetSync {
            peer: PEER,
            hash: Some(p.hash()),
        }]
    );
    assert_eq!(h.budget.orphan_vote_count(), 1);

    // asked once per hash, and both votes are kept
    let second = vote(&voters[1], &p.hash(), VoteOutcome::Yes);
    assert!(h.budget.process_vote(PEER, &second).is_err());
    assert!(!h
        .outbox
        .drain()
        .iter()
        .any(|m| matches!(m, Outbound::RequestBudgetSync { .. })));
    assert_eq!(h.budget.orphan_vote_count(), 2);

    h.budget.process_proposal(PEER, &p).unwrap();
    assert_eq!(h.budget.orphan_vote_count(), 0);
    assert_eq!(h.budget.find_proposal(&p.hash()).unwrap().yeas(), 2);
}

#[test]
fn test_orphan_finalized_votes_are_all_replayed() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let voters = masternodes(&h, 3);
    let p = proposal(&h, "first", 1, 1000 * COIN);
    h.budget.process_proposal(PEER, &p).unwrap();
    let fb = finalized(&h, vec![payment_for(&p)]);

    for voter in &voters {
        assert!(matches!(
            h.budget.process_finalized_vote(PEER, &budget_vote(voter, &fb.hash())),
            Err(BudgetError::UnknownBudget(_))
        ));
    }
    assert_eq!(h.budget.orphan_vote_count(), 3);

    h.budget.process_finalized(PEER, &fb).unwrap();
    assert_eq!(h.budget.orphan_vote_count(), 0);
    assert_eq!(h.budget.find_finalized(&fb.hash()).unwrap().vote_count(), 3);
}

#[test]
fn test_no_orphans_while_syncing() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let voters = masternodes(&h, 1);
    h.sync.set_synced(false);
    let p = proposal(&h, "late", 1, 1000 * COIN);

    assert!(h
        .budget
        .process_vote(PEER, &vote(&voters[0], &p.hash(), VoteOutcome::Yes))
        .is_err());
    assert_eq!(h.budget.orphan_vote_count(), 0);
    assert!(!h
        .outbox
        .drain()
        .iter()
        .any(|m| matches!(m, Outbound::RequestBudgetSync { .. })));
}

#[test]
fn test_nothing_processed_before_chain_sync() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    h.sync.set_blockchain_synced(false);
    let p = proposal(&h, "first", 1, 1000 * COIN);
    h.budget.process_proposal(PEER, &p).unwrap();
    assert_eq!(h.budget.proposal_count(), 0);
    assert!(h.budget.seen_proposal(&p.hash()).is_none());
}

#[test]
fn test_sync_pushes_objects_and_votes() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let voters = masternodes(&h, 2);
    let p = proposal(&h, "first", 1, 1000 * COIN);
    h.budget.process_proposal(PEER, &p).unwrap();
    vote_yes(&h, &voters, &p.hash());
    h.outbox.drain();

    let pushed = |messages: &[Outbound]| {
        messages
            .iter()
            .filter(|m| matches!(m, Outbound::PushInventory { peer, .. } if *peer == PEER))
            .count()
    };

    h.budget.sync(PEER, None, false);
    let sent = h.outbox.drain();
    assert_eq!(pushed(&sent), 3);
    assert!(sent.contains(&Outbound::SyncStatusCount {
        peer: PEER,
        item: SyncItem::BudgetProposals,
        count: 3,
    }));
    assert!(sent.contains(&Outbound::SyncStatusCount {
        peer: PEER,
        item: SyncItem::BudgetFinalized,
        count: 0,
    }));

    // a partial sync skips votes already marked as synced
    h.budget.mark_synced();
    h.budget.sync(PEER, None, true);
    assert_eq!(pushed(&h.outbox.drain()), 1);

    h.budget.reset_sync();
    h.budget.sync(PEER, None, true);
    assert_eq!(pushed(&h.outbox.drain()), 3);

    // a single object that is not ours
    h.budget.sync(PEER, Some(Hash256::ZERO), false);
    assert_eq!(pushed(&h.outbox.drain()), 0);
}

#[test]
fn test_full_vote_sync_once_per_peer_on_mainnet() {
    let mut params = ChainParams::main();
    params.budget_cycle_blocks = CYCLE;
    let h = harness_with(params, BudgetMode::Off, VoteGate::forced(false));

    h.budget.process_vote_sync(PEER, None);
    assert!(!h
        .outbox
        .drain()
        .iter()
        .any(|m| matches!(m, Outbound::Misbehaving { .. })));

    h.budget.process_vote_sync(PEER, None);
    assert!(h.outbox.drain().iter().any(|m| matches!(m,
        Outbound::Misbehaving { peer, score: 20, .. } if *peer == PEER)));

    // single objects are always answered
    h.budget.process_vote_sync(PEER, Some(Hash256::ZERO));
    assert!(!h
        .outbox
        .drain()
        .iter()
        .any(|m| matches!(m, Outbound::Misbehaving { .. })));

    // and the full list again once enough time has passed
    h.clock.set(T0 + VOTE_SYNC_INTERVAL_SECONDS);
    h.budget.process_vote_sync(PEER, None);
    assert!(!h
        .outbox
        .drain()
        .iter()
        .any(|m| matches!(m, Outbound::Misbehaving { .. })));
    h.budget.process_vote_sync(PEER, None);
    assert!(h.outbox.drain().iter().any(|m| matches!(m,
        Outbound::Misbehaving { peer, score: 20, .. } if *peer == PEER)));
}

#[test]
fn test_received_votes_drop_sender_flags() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let voters = masternodes(&h, 1);
    let p = proposal(&h, "first", 1, 1000 * COIN);
    h.budget.process_proposal(PEER, &p).unwrap();

    let mut v = vote(&voters[0], &p.hash(), VoteOutcome::Yes);
    v.synced = true;
    v.valid = false;
    h.budget.process_vote(PEER, &v).unwrap();

    let stored = h.budget.seen_vote(&v.hash()).unwrap();
    assert!(stored.valid);
    assert!(!stored.synced);
    assert_eq!(h.budget.find_proposal(&p.hash()).unwrap().yeas(), 1);

    // still advertised by the next partial sync
    h.outbox.drain();
    h.budget.sync(PEER, None, true);
    let pushed = h
        .outbox
        .drain()
        .iter()
        .filter(|m| matches!(m, Outbound::PushInventory { peer, .. } if *peer == PEER))
        .count();
    assert_eq!(pushed, 2);
}

#[test]
fn test_finalized_budget_payments() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let voters = masternodes(&h, 20);
    let first = proposal(&h, "first", 1, 1000 * COIN);
    let second = proposal(&h, "second", 2, 500 * COIN);
    let fb = finalized(&h, vec![payment_for(&first), payment_for(&second)]);
    h.budget.process_finalized(PEER, &fb).unwrap();

    // 20 enabled masternodes, so more than one vote is needed
    assert!(!h.budget.is_budget_payment_block(NEXT_CYCLE));
    let tx = Transaction {
        lock_time: 0,
        outputs: vec![TxOut::new(first.amount, first.payee.clone())],
    };
    assert_eq!(
        h.budget.is_transaction_valid(&tx, NEXT_CYCLE),
        TrxValidationStatus::Invalid
    );

    for voter in &voters[..3] {
        h.budget
            .process_finalized_vote(PEER, &budget_vote(voter, &fb.hash()))
            .unwrap();
    }
    assert!(h.budget.is_budget_payment_block(NEXT_CYCLE));
    assert!(h.budget.is_budget_payment_block(NEXT_CYCLE + 1));
    assert!(!h.budget.is_budget_payment_block(NEXT_CYCLE + 2));

    assert_eq!(
        h.budget.is_transaction_valid(&tx, NEXT_CYCLE),
        TrxValidationStatus::Valid
    );
    let wrong = Transaction {
        lock_time: 0,
        outputs: vec![TxOut::new(first.amount, somebody(9))],
    };
    assert_eq!(
        h.budget.is_transaction_valid(&wrong, NEXT_CYCLE + 1),
        TrxValidationStatus::Invalid
    );

    assert_eq!(
        h.budget.required_payments_string(NEXT_CYCLE),
        first.hash().to_string()
    );
    assert_eq!(
        h.budget.required_payments_string(NEXT_CYCLE + 5),
        "unknown-budget"
    );
}

#[test]
fn test_fill_block_payee_pays_the_best_budget() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let voters = masternodes(&h, 4);
    let first = proposal(&h, "first", 1, 1000 * COIN);
    let fb = finalized(&h, vec![payment_for(&first)]);
    h.budget.process_finalized(PEER, &fb).unwrap();
    h.budget
        .process_finalized_vote(PEER, &budget_vote(&voters[0], &fb.hash()))
        .unwrap();

    // nothing due after the tip
    let mut coinbase = Transaction::default();
    assert!(h.budget.fill_block_payee(&mut coinbase, 0, false).is_none());
    assert_eq!(coinbase.outputs.len(), 1);
    assert_eq!(coinbase.outputs[0].value, 30 * COIN);

    h.chain.set_tip(NEXT_CYCLE - 1);
    let mut coinbase = Transaction::default();
    let paid = h.budget.fill_block_payee(&mut coinbase, 0, false);
    assert_eq!(paid, Some((first.payee.clone(), first.amount)));
    assert_eq!(coinbase.outputs.len(), 2);
    assert_eq!(coinbase.outputs[0].value, 30 * COIN);
    assert_eq!(coinbase.outputs[1], TxOut::new(first.amount, first.payee.clone()));

    let mut coinstake = Transaction {
        lock_time: 0,
        outputs: vec![TxOut::default(), TxOut::new(40 * COIN, somebody(7))],
    };
    h.budget.fill_block_payee(&mut coinstake, 0, true);
    assert_eq!(coinstake.outputs.len(), 3);
    assert_eq!(coinstake.outputs[1].value, 40 * COIN);
    assert_eq!(coinstake.outputs[2], TxOut::new(first.amount, first.payee.clone()));
}

#[test]
fn test_submit_final_budget_in_window() {
    let h = harness(BudgetMode::Suggest, VoteGate::forced(false));
    let voters = masternodes(&h, 10);
    let first = proposal(&h, "first", 1, 1000 * COIN);
    h.budget.process_proposal(PEER, &first).unwrap();
    vote_yes(&h, &voters, &first.hash());

    // a thousand blocks before the next cycle
    assert!(!h.budget.submit_final_budget());
    assert!(h.wallet.created().is_empty());

    h.chain.set_tip(NEXT_CYCLE - 50);
    assert!(!h.budget.submit_final_budget());
    assert_eq!(h.wallet.created().len(), 1);
    assert_eq!(h.wallet.created()[0].1, BUDGET_FEE_TX);

    // the collateral needs one more confirmation than peers require
    h.chain.set_tip(NEXT_CYCLE - 48);
    assert!(!h.budget.submit_final_budget());
    h.chain.set_tip(NEXT_CYCLE - 47);
    h.outbox.drain();
    assert!(h.budget.submit_final_budget());
    assert_eq!(h.wallet.created().len(), 1);

    let budgets = h.budget.finalized_budgets();
    assert_eq!(budgets.len(), 1);
    assert_eq!(budgets[0].name, "main");
    assert_eq!(budgets[0].block_start, NEXT_CYCLE);
    assert!(budgets[0].matches(&h.budget.get_budget()));
    assert!(h.budget.seen_finalized(&budgets[0].hash()).is_some());
    assert!(h.outbox.drain().iter().any(|m| matches!(m,
        Outbound::Relay(inv) if inv.kind == InvKind::FinalizedBudget)));
    assert_eq!(
        h.budget.finalized_status(&budgets[0].hash()).unwrap(),
        "OK"
    );

    // once per cycle
    assert!(!h.budget.submit_final_budget());
}

#[test]
fn test_submit_final_budget_without_funds() {
    let h = harness(BudgetMode::Suggest, VoteGate::forced(false));
    let voters = masternodes(&h, 10);
    let first = proposal(&h, "first", 1, 1000 * COIN);
    h.budget.process_proposal(PEER, &first).unwrap();
    vote_yes(&h, &voters, &first.hash());

    h.wallet.set_failing(true);
    h.chain.set_tip(NEXT_CYCLE - 50);
    assert!(!h.budget.submit_final_budget());
    assert_eq!(h.budget.finalized_count(), 0);
}

#[test]
fn test_maintenance_drops_expired_objects() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let p = proposal(&h, "first", 1, 1000 * COIN);
    h.budget.process_proposal(PEER, &p).unwrap();
    let fb = finalized(&h, vec![payment_for(&p)]);
    h.budget.process_finalized(PEER, &fb).unwrap();

    h.budget.check_and_remove(None);
    assert_eq!(h.budget.proposal_count(), 1);
    assert_eq!(h.budget.finalized_count(), 1);

    // well past both the proposal's end and the budget's last payment
    h.chain.set_tip(NEXT_CYCLE + 3 * CYCLE);
    h.budget.check_and_remove(None);
    assert_eq!(h.budget.proposal_count(), 0);
    assert_eq!(h.budget.finalized_count(), 0);
}

#[test]
fn test_local_vote_on_proposal() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let voters = masternodes(&h, 1);
    let p = proposal(&h, "first", 1, 1000 * COIN);
    h.budget.process_proposal(PEER, &p).unwrap();
    h.outbox.drain();

    let v = h
        .budget
        .submit_proposal_vote(&voters[0], &p.hash(), VoteOutcome::No)
        .unwrap();
    assert_eq!(h.budget.find_proposal(&p.hash()).unwrap().nays(), 1);
    assert!(h.budget.seen_vote(&v.hash()).is_some());
    assert!(h.outbox.drain().iter().any(|m| matches!(m,
        Outbound::Relay(inv) if inv.kind == InvKind::BudgetVote && inv.hash == v.hash())));

    assert!(matches!(
        h.budget
            .submit_proposal_vote(&voters[0], &Hash256::ZERO, VoteOutcome::Yes),
        Err(BudgetError::UnknownProposal(_))
    ));
}

#[test]
fn test_cache_round_trip() {
    let h = harness(BudgetMode::Off, VoteGate::forced(false));
    let voters = masternodes(&h, 2);
    let p = proposal(&h, "first", 1, 1000 * COIN);
    h.budget.process_proposal(PEER, &p).unwrap();
    vote_yes(&h, &voters, &p.hash());
    let fb = finalized(&h, vec![payment_for(&p)]);
    h.budget.process_finalized(PEER, &fb).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let file = SnapshotFile::new(
        dir.path().join("budget.dat"),
        "MasternodeBudget",
        h.params.magic,
    );
    h.budget.dump(&file).unwrap();

    let restored = BudgetManager::new(
        h.registry.clone(),
        h.sync.clone(),
        h.wallet.clone(),
        BudgetMode::Off,
        VoteGate::forced(false),
    );
    assert!(restored.load(&file).unwrap());
    assert_eq!(restored.find_proposal(&p.hash()).unwrap().yeas(), 2);
    assert!(restored.find_finalized(&fb.hash()).is_some());
    assert_eq!(
        restored.to_string(),
        "Proposals: 1, Budgets: 1, Seen Budgets: 1, Seen Budget Votes: 2, Seen Final Budgets: 1, Seen Final Budget Votes: 0"
    );

    let missing = SnapshotFile::new(
        dir.path().join("nothing.dat"),
        "MasternodeBudget",
        h.params.magic,
    );
    assert!(!restored.load(&missing).unwrap());
}
