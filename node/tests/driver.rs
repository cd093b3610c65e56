//! The periodic driver running on in-memory collaborators

use govnode_core::testing::{
    block_hash_at, ManualClock, MemoryChain, MemoryWallet, StaticSporks,
};
use govnode_core::{
    sha256d, MessageSigner, Network, OutPoint, QueueOutbox, Script, SecretKey, TxOut, COIN,
    PROTOCOL_VERSION,
};
use govnode_crypto::LegacySigner;
use govnode_masternode::{ActiveStatus, MasternodeBroadcast, MasternodePing};
use govnode_node::{Collaborators, Driver, GovernanceNode, NodeConfig, MAINTENANCE_TICKS};
use govnode_treasury::BudgetMode;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

const T0: i64 = 1_700_000_000;
const TIP: i64 = 20_000;
const KEY: &str = "0101010101010101010101010101010101010101010101010101010101010101";

struct Harness {
    _dir: TempDir,
    chain: Arc<MemoryChain>,
    clock: Arc<ManualClock>,
    node: Arc<GovernanceNode>,
}

fn config(dir: &TempDir) -> NodeConfig {
    NodeConfig {
        network: Network::Test,
        data_dir: dir.path().to_path_buf(),
        budget_mode: BudgetMode::Off,
        ..NodeConfig::default()
    }
}

/// Node whose chain tip was mined at `tip_time`, with the clock at `now`
fn harness_with(config: impl FnOnce(&TempDir) -> NodeConfig, tip_time: i64, now: i64) -> Harness {
    let dir = TempDir::new().unwrap();
    let chain = Arc::new(MemoryChain::new(TIP, tip_time - TIP * 60, 60));
    let clock = Arc::new(ManualClock::new(now));
    let node = GovernanceNode::new(
        &config(&dir),
        Collaborators {
            chain: chain.clone(),
            wallet: Arc::new(MemoryWallet::new(chain.clone())),
            sporks: Arc::new(StaticSporks::none()),
            clock: clock.clone(),
            outbox: Arc::new(QueueOutbox::new()),
        },
    )
    .unwrap();
    Harness {
        _dir: dir,
        chain,
        clock,
        node: Arc::new(node),
    }
}

fn harness() -> Harness {
    harness_with(config, T0, T0)
}

/// Register a masternode whose last ping was signed at `ping_time`
fn register(h: &Harness, n: u8, ping_time: i64) -> OutPoint {
    let signer = LegacySigner;
    let collateral = SecretKey([n; 32]);
    let operator = SecretKey([n.wrapping_add(100); 32]);
    let vin = OutPoint::new(sha256d(&[n]), 0);
    let collateral_pubkey = signer.public_key(&collateral).unwrap();
    h.chain.add_utxo(
        vin,
        TxOut::new(100_000 * COIN, Script::pay_to_pubkey_hash(&collateral_pubkey)),
        100,
    );

    let mut mnb = MasternodeBroadcast::new(
        vin,
        format!("8.8.{}.1:{}", n, h.node.params().default_port)
            .parse()
            .unwrap(),
        collateral_pubkey,
        signer.public_key(&operator).unwrap(),
        PROTOCOL_VERSION,
    );
    mnb.sign(&collateral, ping_time - 650, &signer).unwrap();
    let mut ping = MasternodePing::new(vin, block_hash_at(TIP - 12), ping_time);
    ping.sign(&operator, &signer).unwrap();
    mnb.last_ping = Some(ping);
    h.node.registry.update_masternode_list(&mnb);
    vin
}

#[test]
fn test_stale_chain_does_no_maintenance() {
    let h = harness_with(config, T0, T0 + 7200);
    let driver = Driver::new(h.node.clone(), 5);
    for _ in 0..10 {
        driver.tick();
    }
    assert_eq!(driver.synced_ticks(), 0);
    assert_eq!(driver.last_tip(), None);
    assert!(!h.node.caches().registry.path().exists());
}

#[test]
fn test_follows_the_tip() {
    let h = harness();
    let driver = Driver::new(h.node.clone(), 900);
    driver.tick();
    assert_eq!(driver.synced_ticks(), 1);
    assert_eq!(driver.last_tip(), Some(TIP));

    h.chain.set_tip(TIP + 1);
    driver.tick();
    assert_eq!(driver.last_tip(), Some(TIP + 1));
}

#[test]
fn test_maintenance_removes_silent_masternodes() {
    // three hours after the last ping
    let now = T0 + 3 * 3600;
    let h = harness_with(config, now, now);
    register(&h, 1, T0 - 50);
    assert_eq!(h.node.registry.size(), 1);

    let driver = Driver::new(h.node.clone(), 900);
    for _ in 1..MAINTENANCE_TICKS {
        driver.tick();
    }
    assert_eq!(h.node.registry.size(), 1);

    driver.tick();
    assert_eq!(driver.synced_ticks(), MAINTENANCE_TICKS);
    assert_eq!(h.node.registry.size(), 0);
}

#[test]
fn test_live_masternodes_survive_maintenance() {
    let h = harness();
    register(&h, 1, T0 - 50);
    let driver = Driver::new(h.node.clone(), 900);
    for _ in 0..MAINTENANCE_TICKS {
        driver.tick();
    }
    assert_eq!(h.node.registry.size(), 1);
}

#[test]
fn test_writes_caches_on_schedule() {
    let h = harness();
    let driver = Driver::new(h.node.clone(), 5);
    for _ in 0..4 {
        driver.tick();
    }
    assert!(!h.node.caches().payments.path().exists());

    driver.tick();
    assert!(h.node.caches().registry.path().exists());
    assert!(h.node.caches().payments.path().exists());
    assert!(h.node.caches().budget.path().exists());
    assert!(h
        .node
        .caches()
        .verify()
        .iter()
        .all(|(_, outcome)| outcome == "ok"));
}

#[test]
fn test_local_masternode_without_address_is_not_capable() {
    let h = harness_with(
        |dir| NodeConfig {
            masternode: true,
            masternode_privkey: Some(KEY.to_string()),
            ..config(dir)
        },
        T0,
        T0,
    );
    let active = h.node.active.as_ref().unwrap();
    assert_eq!(active.status_code(), ActiveStatus::Initial);

    let driver = Driver::new(h.node.clone(), 900);
    driver.tick();
    assert_eq!(active.status_code(), ActiveStatus::NotCapable);
    assert!(active.status().contains("Can't detect external address"));
    assert!(h.node.voter().is_none());
}

#[test]
fn test_status_lines() {
    let h = harness();
    let lines = h.node.status();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("Sync: "));
}

#[test]
fn test_caches_reload() {
    let h = harness();
    register(&h, 1, T0 - 50);
    h.node.dump_caches().unwrap();

    let clock = h.clock.clone();
    let reloaded = GovernanceNode::new(
        &config(&h._dir),
        Collaborators {
            chain: h.chain.clone(),
            wallet: Arc::new(MemoryWallet::new(h.chain.clone())),
            sporks: Arc::new(StaticSporks::none()),
            clock,
            outbox: Arc::new(QueueOutbox::new()),
        },
    )
    .unwrap();
    assert_eq!(reloaded.registry.size(), 0);
    reloaded.load_caches();
    assert_eq!(reloaded.registry.size(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_until_shutdown() {
    let h = harness();
    let driver = Arc::new(Driver::new(h.node.clone(), 900));
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(driver.clone().run(rx));
    tokio::time::sleep(Duration::from_millis(3500)).await;
    tx.send(true).unwrap();
    handle.await.unwrap();

    assert!(driver.synced_ticks() >= 3);
    assert!(h.node.caches().registry.path().exists());
    assert!(h.node.caches().budget.path().exists());
}
