//! Wiring of the governance components around the host's collaborators

use crate::config::NodeConfig;
use crate::validation::BlockRewards;
use anyhow::{Context, Result};
use govnode_consensus::payments::{CACHE_FILE_NAME as PAYMENTS_FILE, CACHE_MAGIC as PAYMENTS_MAGIC};
use govnode_consensus::MasternodePayments;
use govnode_core::{
    ChainParams, ChainView, Clock, Outbox, SnapshotFile, SporkPolicy, SyncProgress, Wallet,
};
use govnode_crypto::LegacySigner;
use govnode_masternode::manager::{CACHE_FILE_NAME as REGISTRY_FILE, CACHE_MAGIC as REGISTRY_MAGIC};
use govnode_masternode::{ActiveMasternode, LocalVoter, MasternodeManager};
use govnode_network::{Dispatcher, FulfilledRequests, MasternodeSync};
use govnode_treasury::manager::{CACHE_FILE_NAME as BUDGET_FILE, CACHE_MAGIC as BUDGET_MAGIC};
use govnode_treasury::{BudgetManager, VoteGate};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// What the host node provides
pub struct Collaborators {
    pub chain: Arc<dyn ChainView>,
    pub wallet: Arc<dyn Wallet>,
    pub sporks: Arc<dyn SporkPolicy>,
    pub clock: Arc<dyn Clock>,
    pub outbox: Arc<dyn Outbox>,
}

/// The three cache files of a data directory
pub struct CacheFiles {
    pub registry: SnapshotFile,
    pub payments: SnapshotFile,
    pub budget: SnapshotFile,
}

impl CacheFiles {
    pub fn new(data_dir: &Path, params: &ChainParams) -> Self {
        Self {
            registry: SnapshotFile::new(data_dir.join(REGISTRY_FILE), REGISTRY_MAGIC, params.magic),
            payments: SnapshotFile::new(data_dir.join(PAYMENTS_FILE), PAYMENTS_MAGIC, params.magic),
            budget: SnapshotFile::new(data_dir.join(BUDGET_FILE), BUDGET_MAGIC, params.magic),
        }
    }

    /// Check each file without loading it: (path, outcome)
    pub fn verify(&self) -> Vec<(PathBuf, String)> {
        let outcome = |file: &SnapshotFile, result: std::result::Result<(), String>| {
            let text = if !file.path().exists() {
                "missing".to_string()
            } else {
                match result {
                    Ok(()) => "ok".to_string(),
                    Err(e) => e,
                }
            };
            (file.path().to_path_buf(), text)
        };
        vec![
            outcome(
                &self.registry,
                MasternodeManager::verify_cache(&self.registry).map_err(|e| e.to_string()),
            ),
            outcome(
                &self.payments,
                MasternodePayments::verify_cache(&self.payments).map_err(|e| e.to_string()),
            ),
            outcome(
                &self.budget,
                BudgetManager::verify_cache(&self.budget).map_err(|e| e.to_string()),
            ),
        ]
    }
}

pub struct GovernanceNode {
    params: ChainParams,
    chain: Arc<dyn ChainView>,
    caches: CacheFiles,
    pub registry: Arc<MasternodeManager>,
    pub payments: Arc<MasternodePayments>,
    pub budget: Arc<BudgetManager>,
    pub sync: Arc<MasternodeSync>,
    pub dispatcher: Dispatcher,
    pub rewards: BlockRewards,
    pub active: Option<ActiveMasternode>,
}

impl GovernanceNode {
    pub fn new(config: &NodeConfig, c: Collaborators) -> Result<Self> {
        let params = config.params();
        let fulfilled = Arc::new(FulfilledRequests::new());
        let sync = Arc::new(MasternodeSync::new(
            params.clone(),
            c.chain.clone(),
            c.clock.clone(),
            c.sporks.clone(),
            c.outbox.clone(),
            fulfilled.clone(),
        ));
        let progress: Arc<dyn SyncProgress> = sync.clone();

        let registry = Arc::new(MasternodeManager::new(
            params.clone(),
            c.chain.clone(),
            Arc::new(LegacySigner),
            c.clock.clone(),
            progress.clone(),
            c.outbox.clone(),
        ));
        let payments = Arc::new(MasternodePayments::new(registry.clone(), progress.clone()));
        let budget = Arc::new(BudgetManager::new(
            registry.clone(),
            progress.clone(),
            c.wallet.clone(),
            config.budget_mode,
            VoteGate::from_entropy(),
        ));
        let dispatcher = Dispatcher::new(
            registry.clone(),
            payments.clone(),
            budget.clone(),
            sync.clone(),
            fulfilled,
        );
        let rewards = BlockRewards::new(
            params.clone(),
            c.sporks.clone(),
            progress.clone(),
            payments.clone(),
            budget.clone(),
        );

        let active = match (config.masternode, config.operator_key()?) {
            (true, Some(key)) => Some(
                ActiveMasternode::new(
                    registry.clone(),
                    c.wallet.clone(),
                    progress,
                    key,
                    config.masternode_addr,
                )
                .context("failed to set up the local masternode")?,
            ),
            _ => None,
        };

        Ok(Self {
            caches: CacheFiles::new(&config.data_dir, &params),
            params,
            chain: c.chain,
            registry,
            payments,
            budget,
            sync,
            dispatcher,
            rewards,
            active,
        })
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn chain(&self) -> &Arc<dyn ChainView> {
        &self.chain
    }

    pub fn caches(&self) -> &CacheFiles {
        &self.caches
    }

    /// Signing identity of the local masternode, once started
    pub fn voter(&self) -> Option<LocalVoter> {
        self.active.as_ref().and_then(|active| active.voter())
    }

    /// Load whatever caches exist. A damaged file is logged and skipped so
    /// the node starts fresh for that component.
    pub fn load_caches(&self) {
        if let Err(e) = self.registry.load(&self.caches.registry) {
            warn!("invalid masternode cache file: {}", e);
        }
        if let Err(e) = self.payments.load(&self.caches.payments) {
            warn!("invalid masternode payments cache file: {}", e);
        }
        if let Err(e) = self.budget.load(&self.caches.budget) {
            warn!("invalid budget cache file: {}", e);
        }
    }

    pub fn dump_caches(&self) -> Result<()> {
        self.registry
            .dump(&self.caches.registry)
            .context("dumping masternode cache")?;
        self.payments
            .dump(&self.caches.payments)
            .context("dumping masternode payments cache")?;
        self.budget
            .dump(&self.caches.budget)
            .context("dumping budget cache")?;
        info!("caches written");
        Ok(())
    }

    /// One status line per component
    pub fn status(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Sync: {}", self.sync.status()),
            self.registry.to_string(),
            self.payments.to_string(),
            self.budget.to_string(),
        ];
        if let Some(active) = &self.active {
            lines.push(format!("Masternode: {}", active.status()));
        }
        lines
    }
}
