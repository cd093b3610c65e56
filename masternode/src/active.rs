//! The local masternode, when this node runs as one

use crate::broadcast::{check_default_port, MasternodeBroadcast};
use crate::error::{MasternodeError, Result};
use crate::manager::MasternodeManager;
use crate::ping::MasternodePing;
use crate::types::{CollateralStatus, MIN_CONFIRMATIONS, PING_ANCHOR_DEPTH};
use govnode_core::{
    CollateralCandidate, InvKind, Inventory, OutPoint, Outbound, PubKey, SecretKey, SyncProgress,
    Wallet, PROTOCOL_VERSION,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveStatus {
    Initial,
    SyncInProcess,
    InputTooNew,
    NotCapable,
    Started,
}

/// Identity used to sign payment and budget votes
#[derive(Debug, Clone)]
pub struct LocalVoter {
    pub vin: OutPoint,
    pub key: SecretKey,
    pub pubkey: PubKey,
}

#[derive(Debug)]
struct ActiveState {
    status: ActiveStatus,
    not_capable_reason: String,
    vin: Option<OutPoint>,
    service: Option<SocketAddr>,
}

pub struct ActiveMasternode {
    registry: Arc<MasternodeManager>,
    wallet: Arc<dyn Wallet>,
    sync: Arc<dyn SyncProgress>,
    operator_key: SecretKey,
    operator_pubkey: PubKey,
    state: Mutex<ActiveState>,
}

impl ActiveMasternode {
    pub fn new(
        registry: Arc<MasternodeManager>,
        wallet: Arc<dyn Wallet>,
        sync: Arc<dyn SyncProgress>,
        operator_key: SecretKey,
        service: Option<SocketAddr>,
    ) -> Result<Self> {
        let operator_pubkey = registry.signer().public_key(&operator_key)?;
        registry.set_local(operator_pubkey.clone(), None);
        Ok(Self {
            registry,
            wallet,
            sync,
            operator_key,
            operator_pubkey,
            state: Mutex::new(ActiveState {
                status: ActiveStatus::Initial,
                not_capable_reason: String::new(),
                vin: None,
                service,
            }),
        })
    }

    pub fn status_code(&self) -> ActiveStatus {
        self.state.lock().status
    }

    pub fn vin(&self) -> Option<OutPoint> {
        self.state.lock().vin
    }

    pub fn pubkey(&self) -> &PubKey {
        &self.operator_pubkey
    }

    /// Signing identity, once the masternode is running
    pub fn voter(&self) -> Option<LocalVoter> {
        let st = self.state.lock();
        match (st.status, st.vin) {
            (ActiveStatus::Started, Some(vin)) => Some(LocalVoter {
                vin,
                key: self.operator_key.clone(),
                pubkey: self.operator_pubkey.clone(),
            }),
            _ => None,
        }
    }

    pub fn status(&self) -> String {
        let st = self.state.lock();
        match st.status {
            ActiveStatus::Initial => "Node just started, not yet activated".to_string(),
            ActiveStatus::SyncInProcess => {
                "Sync in progress. Must wait until sync is complete to start Masternode".to_string()
            }
            ActiveStatus::InputTooNew => format!(
                "Masternode input must have at least {} confirmations",
                MIN_CONFIRMATIONS
            ),
            ActiveStatus::NotCapable => {
                format!("Not capable masternode: {}", st.not_capable_reason)
            }
            ActiveStatus::Started => "Masternode successfully started".to_string(),
        }
    }

    /// Started remotely: our key showed up enabled in the network list
    pub fn enable_hot_cold(&self, vin: OutPoint, addr: SocketAddr) {
        let mut st = self.state.lock();
        st.status = ActiveStatus::Started;
        st.vin = Some(vin);
        st.service = Some(addr);
        self.registry.set_local(self.operator_pubkey.clone(), Some(vin));
        info!(target: "masternode", "Enabled! You may shut down the cold daemon.");
    }

    fn not_capable(&self, reason: impl Into<String>) {
        let mut st = self.state.lock();
        st.status = ActiveStatus::NotCapable;
        st.not_capable_reason = reason.into();
        debug!(target: "masternode", "ManageStatus() - not capable: {}", st.not_capable_reason);
    }

    /// Drive the local masternode towards `Started` and keep it pinging
    pub fn manage_status(&self) {
        let params = self.registry.params().clone();

        if !params.is_regtest() && !self.sync.is_blockchain_synced() {
            self.state.lock().status = ActiveStatus::SyncInProcess;
            debug!(target: "masternode", "ManageStatus() - {}", self.status());
            return;
        }

        {
            let mut st = self.state.lock();
            if st.status == ActiveStatus::SyncInProcess {
                st.status = ActiveStatus::Initial;
            }
        }

        if self.status_code() == ActiveStatus::Initial {
            self.registry.check_all();
            if let Some(mn) = self.registry.find_by_pubkey(&self.operator_pubkey) {
                if mn.is_enabled() && mn.protocol_version == PROTOCOL_VERSION {
                    self.enable_hot_cold(mn.vin, mn.addr);
                }
            }
        }

        if self.status_code() != ActiveStatus::Started {
            self.not_capable("");

            let configured = self.state.lock().service;
            let service = match configured {
                Some(service) => service,
                None => {
                    self.not_capable(
                        "Can't detect external address. Please use the masternodeaddr configuration option.",
                    );
                    return;
                }
            };

            if let Err(e) = check_default_port(&service, &params) {
                self.not_capable(e.to_string());
                return;
            }

            let candidate = match self.select_collateral() {
                Some(c) => c,
                None => {
                    self.not_capable("Could not find suitable coins!");
                    return;
                }
            };

            let age = self.registry.chain().input_age(&candidate.outpoint);
            if age < MIN_CONFIRMATIONS {
                let mut st = self.state.lock();
                st.status = ActiveStatus::InputTooNew;
                st.not_capable_reason = format!(
                    "Masternode input must have at least {} confirmations - {} confirmations",
                    MIN_CONFIRMATIONS, age
                );
                return;
            }

            let mnb = match self.create_broadcast(&candidate, service) {
                Ok(mnb) => mnb,
                Err(e) => {
                    self.not_capable(format!("Error on CreateBroadcast: {}", e));
                    return;
                }
            };

            self.registry.update_masternode_list(&mnb);
            self.registry
                .outbox()
                .send(Outbound::Relay(Inventory::new(InvKind::MasternodeAnnounce, mnb.hash())));

            {
                let mut st = self.state.lock();
                st.status = ActiveStatus::Started;
                st.vin = Some(candidate.outpoint);
                st.not_capable_reason.clear();
            }
            self.registry
                .set_local(self.operator_pubkey.clone(), Some(candidate.outpoint));
            info!(target: "masternode", "ManageStatus() - Is capable master node!");
            return;
        }

        if let Err(e) = self.send_ping() {
            debug!(target: "masternode", "ManageStatus() - Error on Ping: {}", e);
        }
    }

    fn select_collateral(&self) -> Option<CollateralCandidate> {
        let params = self.registry.params();
        self.wallet
            .collateral_outputs(params.masternode_collateral)
            .into_iter()
            .find(|c| {
                crate::types::collateral_status(
                    self.registry.chain().as_ref(),
                    &c.outpoint,
                    params.masternode_collateral,
                ) == CollateralStatus::Ok
            })
    }

    fn new_ping(&self, vin: OutPoint) -> Result<MasternodePing> {
        let chain = self.registry.chain();
        let tip = chain
            .tip_height()
            .ok_or_else(|| MasternodeError::NotCapable("no chain tip".to_string()))?;
        let anchor = chain
            .block_hash(tip - PING_ANCHOR_DEPTH)
            .ok_or_else(|| MasternodeError::NotCapable("no anchor block for ping".to_string()))?;
        let mut ping = MasternodePing::new(vin, anchor, self.registry.clock().now());
        ping.sign(&self.operator_key, self.registry.signer().as_ref())?;
        Ok(ping)
    }

    fn create_broadcast(
        &self,
        candidate: &CollateralCandidate,
        service: SocketAddr,
    ) -> Result<MasternodeBroadcast> {
        let ping = self.new_ping(candidate.outpoint)?;
        let mut mnb = MasternodeBroadcast::new(
            candidate.outpoint,
            service,
            candidate.pubkey.clone(),
            self.operator_pubkey.clone(),
            PROTOCOL_VERSION,
        );
        mnb.last_ping = Some(ping);
        mnb.sign(
            &candidate.secret,
            self.registry.clock().now(),
            self.registry.signer().as_ref(),
        )?;
        Ok(mnb)
    }

    /// Ping the network for our running masternode
    pub fn send_ping(&self) -> Result<()> {
        let vin = {
            let st = self.state.lock();
            match (st.status, st.vin) {
                (ActiveStatus::Started, Some(vin)) => vin,
                _ => {
                    return Err(MasternodeError::NotCapable(
                        "Masternode is not in a running status".to_string(),
                    ))
                }
            }
        };

        let ping = self.new_ping(vin)?;
        match self.registry.record_local_ping(&ping) {
            Ok(()) => {
                debug!(target: "masternode", "SendMasternodePing() - Relay Masternode Ping vin = {}", vin.short());
                Ok(())
            }
            Err(MasternodeError::UnknownMasternode(_)) => {
                let reason = format!(
                    "Masternode List doesn't include our Masternode, shutting down Masternode pinging service! {}",
                    vin.short()
                );
                warn!(target: "masternode", "{}", reason);
                self.not_capable(reason.clone());
                Err(MasternodeError::NotCapable(reason))
            }
            Err(e) => Err(e),
        }
    }
}
