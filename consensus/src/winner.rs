//! Payment votes

use crate::error::{PaymentError, Result};
use govnode_core::{Hash256, HashWriter, MessageSigner, OutPoint, PubKey, Script, SecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A masternode's vote for who gets paid at `block_height`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentWinner {
    pub vin: OutPoint,
    pub block_height: i64,
    pub payee: Script,
    pub signature: Vec<u8>,
}

impl PaymentWinner {
    pub fn new(vin: OutPoint, block_height: i64, payee: Script) -> Self {
        Self {
            vin,
            block_height,
            payee,
            signature: Vec::new(),
        }
    }

    pub fn hash(&self) -> Hash256 {
        HashWriter::new()
            .write_bytes(self.payee.as_bytes())
            .write_i64(self.block_height)
            .write_hash(&self.vin.txid)
            .write_u32(self.vin.index)
            .finish()
    }

    pub fn message(&self) -> String {
        format!(
            "{}{}{}",
            self.vin.short(),
            self.block_height,
            hex::encode(self.payee.as_bytes())
        )
    }

    pub fn sign(&mut self, key: &SecretKey, signer: &dyn MessageSigner) -> Result<()> {
        self.signature = signer.sign(&self.message(), key)?;
        Ok(())
    }

    pub fn verify(&self, pubkey: &PubKey, signer: &dyn MessageSigner) -> Result<()> {
        if signer.verify(pubkey, &self.signature, &self.message()) {
            Ok(())
        } else {
            Err(PaymentError::rejected(
                format!(
                    "Got bad Masternode payment signature {}",
                    self.vin.short()
                ),
                20,
            ))
        }
    }
}

impl fmt::Display for PaymentWinner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}",
            self.vin,
            self.block_height,
            self.payee.to_address(),
            self.signature.len()
        )
    }
}
