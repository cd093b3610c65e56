//! Masternode announcements
//!
//! A broadcast is the wire form of a [`Masternode`]: identity, keys and the
//! collateral owner's signature, plus the most recent ping.

use crate::error::{MasternodeError, Result};
use crate::ping::MasternodePing;
use crate::types::{Masternode, MasternodeState};
use govnode_core::params::{ChainParams, MAINNET_PORT, MIN_PEER_MNANNOUNCE};
use govnode_core::{Hash256, HashWriter, MessageSigner, OutPoint, PubKey, SecretKey};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeBroadcast {
    pub vin: OutPoint,
    pub addr: SocketAddr,
    pub pubkey_collateral: PubKey,
    pub pubkey_masternode: PubKey,
    pub signature: Vec<u8>,
    pub sig_time: i64,
    pub protocol_version: u32,
    pub last_ping: Option<MasternodePing>,
}

impl MasternodeBroadcast {
    pub fn new(
        vin: OutPoint,
        addr: SocketAddr,
        pubkey_collateral: PubKey,
        pubkey_masternode: PubKey,
        protocol_version: u32,
    ) -> Self {
        Self {
            vin,
            addr,
            pubkey_collateral,
            pubkey_masternode,
            signature: Vec::new(),
            sig_time: 0,
            protocol_version,
            last_ping: None,
        }
    }

    pub fn hash(&self) -> Hash256 {
        HashWriter::new()
            .write_i64(self.sig_time)
            .write_bytes(&self.pubkey_collateral.0)
            .finish()
    }

    /// Signed message carrying key ids
    pub fn message(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.addr,
            self.sig_time,
            hex::encode(self.pubkey_collateral.key_id().0),
            hex::encode(self.pubkey_masternode.key_id().0),
            self.protocol_version
        )
    }

    /// Pre-key-id message format still accepted from older peers
    pub fn old_message(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.addr,
            self.sig_time,
            self.pubkey_collateral.to_hex(),
            self.pubkey_masternode.to_hex(),
            self.protocol_version
        )
    }

    pub fn sign(&mut self, key: &SecretKey, sig_time: i64, signer: &dyn MessageSigner) -> Result<()> {
        self.sig_time = sig_time;
        self.signature = signer.sign(&self.message(), key)?;
        Ok(())
    }

    /// Verify against either message format with the collateral key
    pub fn verify_signature(&self, signer: &dyn MessageSigner) -> Result<()> {
        let ok = signer.verify(&self.pubkey_collateral, &self.signature, &self.message())
            || signer.verify(&self.pubkey_collateral, &self.signature, &self.old_message());
        if ok {
            return Ok(());
        }
        let dos = if self.protocol_version < MIN_PEER_MNANNOUNCE {
            0
        } else {
            100
        };
        Err(MasternodeError::rejected(
            format!("Got bad Masternode address signature {}", self.vin.short()),
            dos,
        ))
    }
}

/// Mainnet masternodes must listen on the default port, other networks must not
pub fn check_default_port(addr: &SocketAddr, params: &ChainParams) -> Result<()> {
    let port = addr.port();
    if params.is_mainnet() {
        if port != params.default_port {
            return Err(MasternodeError::rejected(
                format!(
                    "Invalid port {} for masternode {}, only {} is supported on mainnet",
                    port, addr, params.default_port
                ),
                0,
            ));
        }
    } else if port == MAINNET_PORT {
        return Err(MasternodeError::rejected(
            format!(
                "Invalid port {} for masternode {}, {} is only supported on mainnet",
                port, addr, MAINNET_PORT
            ),
            0,
        ));
    }
    Ok(())
}

impl Masternode {
    /// Take the newer announcement's fields. Returns false when `mnb` is not
    /// newer than what we hold or is for another collateral. The embedded
    /// ping must already have been checked against `mnb.pubkey_masternode`.
    pub fn update_from_broadcast(&mut self, mnb: &MasternodeBroadcast) -> bool {
        if mnb.vin != self.vin || mnb.sig_time <= self.sig_time {
            return false;
        }
        self.pubkey_masternode = mnb.pubkey_masternode.clone();
        self.pubkey_collateral = mnb.pubkey_collateral.clone();
        self.sig_time = mnb.sig_time;
        self.signature = mnb.signature.clone();
        self.protocol_version = mnb.protocol_version;
        self.addr = mnb.addr;
        self.last_checked = 0;
        if let Some(ping) = mnb.last_ping.as_ref().filter(|p| p.vin == self.vin) {
            let newer = self
                .last_ping
                .as_ref()
                .map(|current| ping.sig_time > current.sig_time)
                .unwrap_or(true);
            if newer {
                self.last_ping = Some(ping.clone());
            }
        }
        true
    }
}

impl From<&Masternode> for MasternodeBroadcast {
    fn from(mn: &Masternode) -> Self {
        Self {
            vin: mn.vin,
            addr: mn.addr,
            pubkey_collateral: mn.pubkey_collateral.clone(),
            pubkey_masternode: mn.pubkey_masternode.clone(),
            signature: mn.signature.clone(),
            sig_time: mn.sig_time,
            protocol_version: mn.protocol_version,
            last_ping: mn.last_ping.clone(),
        }
    }
}

impl From<&MasternodeBroadcast> for Masternode {
    fn from(mnb: &MasternodeBroadcast) -> Self {
        Self {
            vin: mnb.vin,
            addr: mnb.addr,
            pubkey_collateral: mnb.pubkey_collateral.clone(),
            pubkey_masternode: mnb.pubkey_masternode.clone(),
            signature: mnb.signature.clone(),
            sig_time: mnb.sig_time,
            protocol_version: mnb.protocol_version,
            last_ping: mnb.last_ping.clone(),
            state: MasternodeState::PreEnabled,
            last_checked: 0,
        }
    }
}
