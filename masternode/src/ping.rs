//! Masternode liveness pings

use crate::error::{MasternodeError, Result};
use govnode_core::{Hash256, HashWriter, MessageSigner, OutPoint, PubKey, SecretKey};
use serde::{Deserialize, Serialize};

/// How far a ping's timestamp may drift from our clock, either way
pub const MAX_PING_DRIFT_SECONDS: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodePing {
    pub vin: OutPoint,
    /// Block the ping is anchored to
    pub block_hash: Hash256,
    pub sig_time: i64,
    pub signature: Vec<u8>,
}

impl MasternodePing {
    pub fn new(vin: OutPoint, block_hash: Hash256, sig_time: i64) -> Self {
        Self {
            vin,
            block_hash,
            sig_time,
            signature: Vec::new(),
        }
    }

    pub fn hash(&self) -> Hash256 {
        HashWriter::new()
            .write_hash(&self.vin.txid)
            .write_u32(self.vin.index)
            .write_i64(self.sig_time)
            .finish()
    }

    pub fn message(&self) -> String {
        format!("{}{}{}", self.vin.short(), self.block_hash, self.sig_time)
    }

    pub fn sign(&mut self, key: &SecretKey, signer: &dyn MessageSigner) -> Result<()> {
        self.signature = signer.sign(&self.message(), key)?;
        Ok(())
    }

    pub fn verify(&self, pubkey: &PubKey, signer: &dyn MessageSigner) -> Result<()> {
        if signer.verify(pubkey, &self.signature, &self.message()) {
            Ok(())
        } else {
            Err(MasternodeError::rejected(
                format!("Got bad Masternode ping signature {}", self.vin.short()),
                33,
            ))
        }
    }

    /// Reject pings stamped more than an hour away from `now`
    pub fn check_time(&self, now: i64) -> Result<()> {
        if self.sig_time > now + MAX_PING_DRIFT_SECONDS {
            return Err(MasternodeError::rejected(
                format!(
                    "Signature rejected, too far into the future {}",
                    self.vin.short()
                ),
                1,
            ));
        }
        if self.sig_time <= now - MAX_PING_DRIFT_SECONDS {
            return Err(MasternodeError::rejected(
                format!(
                    "Signature rejected, too far into the past {} - {} {}",
                    self.vin.short(),
                    self.sig_time,
                    now
                ),
                1,
            ));
        }
        Ok(())
    }
}
