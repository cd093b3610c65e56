//! Payment voting scenarios: admission, tallies, block checks and the
//! local masternode's own votes

use govnode_consensus::*;
use govnode_core::testing::{block_hash_at, ManualClock, MemoryChain, StaticSchedule, StaticSync};
use govnode_core::{
    ChainParams, InvKind, KeyId, MessageSigner, OutPoint, Outbound, PeerId, QueueOutbox, Script,
    SecretKey, SnapshotFile, Transaction, TxOut, COIN, PROTOCOL_VERSION,
};
use govnode_crypto::LegacySigner;
use govnode_masternode::{LocalVoter, MasternodeBroadcast, MasternodeManager, MasternodePing};
use std::sync::Arc;

const T0: i64 = 1_700_000_000;
const TIP: i64 = 1000;
const PEER: PeerId = PeerId(3);

struct Harness {
    chain: Arc<MemoryChain>,
    sync: Arc<StaticSync>,
    outbox: Arc<QueueOutbox>,
    registry: Arc<MasternodeManager>,
    payments: MasternodePayments,
}

struct Operator {
    vin: OutPoint,
    operator: SecretKey,
    payee: Script,
}

fn harness() -> Harness {
    let chain = Arc::new(MemoryChain::new(TIP, T0 - TIP * 60, 60));
    let sync = Arc::new(StaticSync::synced());
    let outbox = Arc::new(QueueOutbox::new());
    let registry = Arc::new(MasternodeManager::new(
        ChainParams::main(),
        chain.clone(),
        Arc::new(LegacySigner),
        Arc::new(ManualClock::new(T0)),
        sync.clone(),
        outbox.clone(),
    ));
    let payments = MasternodePayments::new(registry.clone(), sync.clone());
    Harness {
        chain,
        sync,
        outbox,
        registry,
        payments,
    }
}

/// Register an enabled masternode directly
fn masternode(h: &Harness, n: u8) -> Operator {
    let signer = LegacySigner;
    let collateral = SecretKey([n; 32]);
    let operator = SecretKey([n.wrapping_add(100); 32]);
    let vin = OutPoint::new(govnode_core::sha256d(&[n]), 0);
    let collateral_pubkey = signer.public_key(&collateral).unwrap();
    let payee = Script::pay_to_pubkey_hash(&collateral_pubkey);
    h.chain
        .add_utxo(vin, TxOut::new(100_000 * COIN, payee.clone()), 100);

    let mut mnb = MasternodeBroadcast::new(
        vin,
        format!("8.8.{}.1:23511", n).parse().unwrap(),
        collateral_pubkey,
        signer.public_key(&operator).unwrap(),
        PROTOCOL_VERSION,
    );
    mnb.sign(&collateral, T0 - 700, &signer).unwrap();
    let mut ping = MasternodePing::new(vin, block_hash_at(TIP - 12), T0 - 50);
    ping.sign(&operator, &signer).unwrap();
    mnb.last_ping = Some(ping);
    h.registry.update_masternode_list(&mnb);

    Operator {
        vin,
        operator,
        payee,
    }
}

fn vote(op: &Operator, height: i64, payee: &Script) -> PaymentWinner {
    let mut winner = PaymentWinner::new(op.vin, height, payee.clone());
    winner.sign(&op.operator, &LegacySigner).unwrap();
    winner
}

fn somebody(n: u8) -> Script {
    Script::pay_to_key_id(&KeyId([n; 20]))
}

#[test]
fn test_valid_vote_is_counted_and_relayed() {
    let h = harness();
    let op = masternode(&h, 1);
    let winner = vote(&op, TIP + 5, &somebody(9));

    h.payments.process_winner(PEER, &winner).unwrap();
    assert_eq!(h.payments.block_payee(TIP + 5), Some(somebody(9)));
    assert!(h.payments.seen_winner(&winner.hash()).is_some());
    assert!(h.outbox.drain().iter().any(|m| matches!(m,
        Outbound::Relay(inv) if inv.kind == InvKind::MasternodeWinner && inv.hash == winner.hash())));

    // already seen
    h.payments.process_winner(PEER, &winner).unwrap();
    assert!(h.outbox.is_empty());
    assert_eq!(h.payments.vote_count(), 1);
}

#[test]
fn test_second_vote_for_same_height_is_rejected() {
    let h = harness();
    let op = masternode(&h, 1);

    h.payments
        .process_winner(PEER, &vote(&op, TIP + 5, &somebody(9)))
        .unwrap();
    let err = h
        .payments
        .process_winner(PEER, &vote(&op, TIP + 5, &somebody(8)))
        .unwrap_err();
    assert!(matches!(err, PaymentError::AlreadyVoted { .. }));
    assert_eq!(h.payments.required_payments_string(TIP + 5), format!("{}:1", somebody(9).to_address()));

    // another height is fine
    h.payments
        .process_winner(PEER, &vote(&op, TIP + 6, &somebody(8)))
        .unwrap();
}

#[test]
fn test_vote_out_of_range_is_rejected() {
    let h = harness();
    let op = masternode(&h, 1);

    assert!(h
        .payments
        .process_winner(PEER, &vote(&op, TIP + 21, &somebody(9)))
        .is_err());
    assert!(h
        .payments
        .process_winner(PEER, &vote(&op, TIP - 50, &somebody(9)))
        .is_err());
    assert_eq!(h.payments.vote_count(), 0);
}

#[test]
fn test_unknown_voter_is_requested() {
    let h = harness();
    masternode(&h, 1);
    let stranger = Operator {
        vin: OutPoint::new(govnode_core::sha256d(b"stranger"), 0),
        operator: SecretKey([42u8; 32]),
        payee: somebody(1),
    };

    let err = h
        .payments
        .process_winner(PEER, &vote(&stranger, TIP + 1, &somebody(9)))
        .unwrap_err();
    assert!(matches!(err, PaymentError::UnknownMasternode(_)));
    assert!(h.outbox.drain().iter().any(|m| matches!(m,
        Outbound::RequestMasternodes { outpoint: Some(vin), .. } if *vin == stranger.vin)));
}

#[test]
fn test_bad_signature_costs_20_when_synced() {
    let h = harness();
    let op = masternode(&h, 1);
    let mut winner = vote(&op, TIP + 2, &somebody(9));
    winner.signature[0] ^= 0xff;

    let err = h.payments.process_winner(PEER, &winner).unwrap_err();
    assert_eq!(err.dos(), 20);
    let sent = h.outbox.drain();
    assert!(sent
        .iter()
        .any(|m| matches!(m, Outbound::Misbehaving { score: 20, .. })));
    assert!(sent
        .iter()
        .any(|m| matches!(m, Outbound::RequestMasternodes { outpoint: Some(_), .. })));

    // the voter may still cast a valid vote for that height
    h.payments
        .process_winner(PEER, &vote(&op, TIP + 2, &somebody(9)))
        .unwrap();
}

#[test]
fn test_bad_signature_is_not_punished_while_syncing() {
    let h = harness();
    let op = masternode(&h, 1);
    h.sync.set_synced(false);
    let mut winner = vote(&op, TIP + 2, &somebody(9));
    winner.signature[0] ^= 0xff;

    assert!(h.payments.process_winner(PEER, &winner).is_err());
    assert!(!h
        .outbox
        .drain()
        .iter()
        .any(|m| matches!(m, Outbound::Misbehaving { .. })));
}

#[test]
fn test_quorum_payee_must_be_paid() {
    let h = harness();
    let ops: Vec<_> = (1..=7).map(|n| masternode(&h, n)).collect();
    let height = TIP + 3;
    for op in &ops {
        h.payments
            .process_winner(PEER, &vote(op, height, &somebody(9)))
            .unwrap();
    }

    let required = h.payments.required_payment(height);
    assert_eq!(required, 3 * COIN);

    let paying = |script: Script, value| Transaction {
        lock_time: 0,
        outputs: vec![TxOut::new(2 * COIN, somebody(50)), TxOut::new(value, script)],
    };
    assert!(h.payments.is_transaction_valid(&paying(somebody(9), required), height));
    assert!(!h.payments.is_transaction_valid(&paying(somebody(9), required - 1), height));
    assert!(!h.payments.is_transaction_valid(&paying(somebody(10), required), height));

    // no tally for the height, anything goes
    assert!(h.payments.is_transaction_valid(&paying(somebody(10), 0), height + 1));
}

#[test]
fn test_fill_block_payee_proof_of_work() {
    let h = harness();
    let op = masternode(&h, 1);
    h.payments
        .process_winner(PEER, &vote(&op, TIP + 1, &somebody(9)))
        .unwrap();

    let mut tx = Transaction {
        lock_time: 0,
        outputs: vec![TxOut::new(0, somebody(50))],
    };
    let payee = h.payments.fill_block_payee(&mut tx, COIN, false);
    assert_eq!(payee, Some(somebody(9)));
    assert_eq!(tx.outputs.len(), 2);
    assert_eq!(tx.outputs[1], TxOut::new(3 * COIN, somebody(9)));
    assert_eq!(tx.outputs[0].value, 2 * COIN);
}

#[test]
fn test_fill_block_payee_splits_stake_outputs() {
    let h = harness();
    let op = masternode(&h, 1);
    h.chain.set_masternode_share_percent(61);
    h.payments
        .process_winner(PEER, &vote(&op, TIP + 1, &somebody(9)))
        .unwrap();
    let payment = 5 * COIN * 61 / 100;

    let stake = 100 * COIN;
    let mut tx = Transaction {
        lock_time: 0,
        outputs: vec![
            TxOut::default(),
            TxOut::new(stake, somebody(50)),
            TxOut::new(stake, somebody(50)),
            TxOut::new(stake, somebody(50)),
        ],
    };
    h.payments.fill_block_payee(&mut tx, 0, true);

    let split = payment / 3;
    let remainder = payment - split * 3;
    assert_eq!(tx.outputs.len(), 5);
    assert_eq!(tx.outputs[4], TxOut::new(payment, somebody(9)));
    assert_eq!(tx.outputs[1].value, stake - split);
    assert_eq!(tx.outputs[2].value, stake - split);
    assert_eq!(tx.outputs[3].value, stake - split - remainder);
    assert_eq!(tx.value_out(), 3 * stake);
}

#[test]
fn test_fill_block_payee_falls_back_to_current_winner() {
    let h = harness();
    masternode(&h, 1);
    masternode(&h, 2);
    let winner = h
        .registry
        .current_winner(TIP, govnode_core::MIN_PAYMENTS_PROTOCOL)
        .unwrap();

    let mut tx = Transaction {
        lock_time: 0,
        outputs: vec![TxOut::default(), TxOut::new(10 * COIN, somebody(50))],
    };
    assert_eq!(h.payments.fill_block_payee(&mut tx, 0, true), Some(winner.payee()));
    assert_eq!(tx.outputs[1].value, 7 * COIN);
}

#[test]
fn test_process_block_votes_once_per_height() {
    let h = harness();
    let ops: Vec<_> = (1..=3).map(|n| masternode(&h, n)).collect();
    let voter = LocalVoter {
        vin: ops[0].vin,
        key: ops[0].operator.clone(),
        pubkey: LegacySigner.public_key(&ops[0].operator).unwrap(),
    };
    let schedule = StaticSchedule::none();

    assert!(!h.payments.process_block(TIP + 10, None, &schedule).unwrap());
    assert!(h.payments.process_block(TIP + 10, Some(&voter), &schedule).unwrap());

    let payee = h.payments.block_payee(TIP + 10).unwrap();
    assert!(ops.iter().any(|op| op.payee == payee));
    assert!(h.outbox.drain().iter().any(|m| matches!(m,
        Outbound::Relay(inv) if inv.kind == InvKind::MasternodeWinner)));

    // not again for the same or an earlier height
    assert!(!h.payments.process_block(TIP + 10, Some(&voter), &schedule).unwrap());
    assert!(!h.payments.process_block(TIP + 9, Some(&voter), &schedule).unwrap());

    // budget blocks are left to the budget
    schedule.set(TIP + 11, true);
    assert!(!h.payments.process_block(TIP + 11, Some(&voter), &schedule).unwrap());
    assert!(h.payments.block_payee(TIP + 11).is_none());
}

#[test]
fn test_queue_skips_scheduled_masternodes() {
    let h = harness();
    let ops: Vec<_> = (1..=3).map(|n| masternode(&h, n)).collect();

    let (first, count) = h.payments.next_in_queue(TIP + 10, true);
    let first = first.unwrap();
    assert_eq!(count, 3);

    // once scheduled, somebody else is next
    let voter = ops.iter().find(|op| op.vin == first.vin).unwrap();
    h.payments
        .process_winner(PEER, &vote(voter, TIP + 4, &first.payee()))
        .unwrap();
    assert!(h.payments.is_scheduled(&first.payee(), TIP + 10));
    assert!(!h.payments.is_scheduled(&first.payee(), TIP + 4));

    let (next, count) = h.payments.next_in_queue(TIP + 10, true);
    assert_eq!(count, 2);
    assert_ne!(next.unwrap().vin, first.vin);
}

#[test]
fn test_last_paid_needs_two_votes() {
    let h = harness();
    let ops: Vec<_> = (1..=3).map(|n| masternode(&h, n)).collect();
    let target = h.registry.find(&ops[2].vin).unwrap();

    assert_eq!(h.payments.last_paid(&target), 0);
    assert!(h.payments.seconds_since_payment(&target) >= 30 * 24 * 3600);

    h.payments
        .add_winning_masternode(&PaymentWinner::new(ops[0].vin, TIP - 1, target.payee()));
    assert_eq!(h.payments.last_paid(&target), 0);

    h.payments
        .add_winning_masternode(&PaymentWinner::new(ops[1].vin, TIP - 1, target.payee()));
    let paid = h.payments.last_paid(&target);
    let block_time = h.chain.time_at(TIP - 1);
    assert!(paid >= block_time && paid < block_time + 150);
    assert_eq!(h.payments.seconds_since_payment(&target), T0 - paid);
}

#[test]
fn test_sync_advertises_recent_votes() {
    let h = harness();
    let ops: Vec<_> = (1..=3).map(|n| masternode(&h, n)).collect();
    assert!(h
        .payments
        .add_winning_masternode(&PaymentWinner::new(ops[0].vin, TIP - 5, somebody(9))));
    assert!(h
        .payments
        .add_winning_masternode(&PaymentWinner::new(ops[0].vin, TIP + 5, somebody(9))));

    // the request is capped to 1.25 x the enabled count
    assert_eq!(h.payments.sync(PEER, 100), 1);
    let sent = h.outbox.drain();
    assert_eq!(
        sent.iter()
            .filter(|m| matches!(m, Outbound::PushInventory { .. }))
            .count(),
        1
    );
    assert!(matches!(
        sent.last(),
        Some(Outbound::SyncStatusCount { count: 1, .. })
    ));
}

#[test]
fn test_clean_payment_list_drops_old_votes() {
    let h = harness();
    let op = masternode(&h, 1);
    assert!(h
        .payments
        .add_winning_masternode(&PaymentWinner::new(op.vin, 200, somebody(9))));
    assert!(h
        .payments
        .add_winning_masternode(&PaymentWinner::new(op.vin, 1100, somebody(9))));
    assert_eq!(h.payments.oldest_block(), Some(200));
    assert_eq!(h.payments.newest_block(), Some(1100));

    h.payments.clean_payment_list();
    assert_eq!(h.payments.vote_count(), 2);

    h.chain.set_tip(1201);
    h.payments.clean_payment_list();
    assert_eq!(h.payments.to_string(), "Votes: 1, Blocks: 1");
    assert_eq!(h.payments.oldest_block(), Some(1100));
}

#[test]
fn test_cache_round_trip() {
    let h = harness();
    let op = masternode(&h, 1);
    h.payments
        .process_winner(PEER, &vote(&op, TIP + 5, &somebody(9)))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let file = SnapshotFile::new(
        dir.path().join("mnpayments.dat"),
        "MasternodePayments",
        ChainParams::main().magic,
    );
    h.payments.dump(&file).unwrap();

    let restored = MasternodePayments::new(h.registry.clone(), h.sync.clone());
    assert!(restored.load(&file).unwrap());
    assert_eq!(restored.to_string(), "Votes: 1, Blocks: 1");
    assert_eq!(restored.block_payee(TIP + 5), Some(somebody(9)));

    let missing = SnapshotFile::new(
        dir.path().join("nothing.dat"),
        "MasternodePayments",
        ChainParams::main().magic,
    );
    assert!(!restored.load(&missing).unwrap());
}

#[test]
fn test_vote_guard_survives_reload() {
    let h = harness();
    let op = masternode(&h, 1);
    h.payments
        .process_winner(PEER, &vote(&op, TIP + 5, &somebody(9)))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let file = SnapshotFile::new(
        dir.path().join("mnpayments.dat"),
        "MasternodePayments",
        ChainParams::main().magic,
    );
    h.payments.dump(&file).unwrap();

    let restored = MasternodePayments::new(h.registry.clone(), h.sync.clone());
    assert!(restored.load(&file).unwrap());
    let err = restored
        .process_winner(PEER, &vote(&op, TIP + 5, &somebody(8)))
        .unwrap_err();
    assert!(matches!(err, PaymentError::AlreadyVoted { .. }));
    assert_eq!(
        restored.required_payments_string(TIP + 5),
        format!("{}:1", somebody(9).to_address())
    );
}
