//! Masternode votes on proposals and finalized budgets

use crate::error::{BudgetError, Result};
use govnode_core::{Hash256, HashWriter, MessageSigner, OutPoint, PubKey, SecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum seconds between two votes of one masternode on one object
pub const BUDGET_VOTE_UPDATE_MIN: i64 = 60 * 60;

/// How far ahead of our clock a vote may be stamped
pub const MAX_VOTE_DRIFT_SECONDS: i64 = 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteOutcome {
    Abstain = 0,
    Yes = 1,
    No = 2,
}

impl VoteOutcome {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(VoteOutcome::Abstain),
            1 => Some(VoteOutcome::Yes),
            2 => Some(VoteOutcome::No),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoteOutcome::Abstain => "ABSTAIN",
            VoteOutcome::Yes => "YES",
            VoteOutcome::No => "NO",
        }
    }
}

impl fmt::Display for VoteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn verify_or_reject(
    signer: &dyn MessageSigner,
    pubkey: &PubKey,
    signature: &[u8],
    message: &str,
    what: &str,
    vin: &OutPoint,
) -> Result<()> {
    if signer.verify(pubkey, signature, message) {
        Ok(())
    } else {
        Err(BudgetError::rejected(
            format!("{} - signature invalid from {}", what, vin.short()),
            20,
        ))
    }
}

/// Keep only a vote newer than the one held, and by a wide enough margin
pub(crate) fn check_vote_update(existing: Option<i64>, time: i64, now: i64, hash: &Hash256) -> Result<()> {
    if let Some(previous) = existing {
        if previous > time {
            return Err(BudgetError::invalid(format!(
                "new vote older than existing vote - {}",
                hash
            )));
        }
        if time - previous < BUDGET_VOTE_UPDATE_MIN {
            return Err(BudgetError::invalid(format!(
                "time between votes is too soon - {} - {} sec < {} sec",
                hash,
                time - previous,
                BUDGET_VOTE_UPDATE_MIN
            )));
        }
    }
    if time > now + MAX_VOTE_DRIFT_SECONDS {
        return Err(BudgetError::invalid(format!(
            "new vote is too far ahead of current time - {} - nTime {} - Max Time {}",
            hash,
            time,
            now + MAX_VOTE_DRIFT_SECONDS
        )));
    }
    Ok(())
}

/// `mvote`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetVote {
    pub vin: OutPoint,
    pub proposal_hash: Hash256,
    pub outcome: VoteOutcome,
    pub time: i64,
    pub signature: Vec<u8>,
    /// Voter still known to the registry
    pub valid: bool,
    /// Already advertised in a partial sync
    pub synced: bool,
}

impl BudgetVote {
    pub fn new(vin: OutPoint, proposal_hash: Hash256, outcome: VoteOutcome, time: i64) -> Self {
        Self {
            vin,
            proposal_hash,
            outcome,
            time,
            signature: Vec::new(),
            valid: true,
            synced: false,
        }
    }

    /// Copy of a vote heard from a peer, with the flags we track locally reset
    pub fn received(&self) -> Self {
        Self {
            valid: true,
            synced: false,
            ..self.clone()
        }
    }

    pub fn hash(&self) -> Hash256 {
        HashWriter::new()
            .write_hash(&self.vin.txid)
            .write_u32(self.vin.index)
            .write_hash(&self.proposal_hash)
            .write_i32(self.outcome.code())
            .write_i64(self.time)
            .finish()
    }

    pub fn message(&self) -> String {
        format!(
            "{}{}{}{}",
            self.vin.short(),
            self.proposal_hash,
            self.outcome.code(),
            self.time
        )
    }

    pub fn sign(&mut self, key: &SecretKey, signer: &dyn MessageSigner) -> Result<()> {
        self.signature = signer.sign(&self.message(), key)?;
        Ok(())
    }

    pub fn verify(&self, pubkey: &PubKey, signer: &dyn MessageSigner) -> Result<()> {
        verify_or_reject(signer, pubkey, &self.signature, &self.message(), "mvote", &self.vin)
    }
}

/// `fbvote`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedBudgetVote {
    pub vin: OutPoint,
    pub budget_hash: Hash256,
    pub time: i64,
    pub signature: Vec<u8>,
    pub valid: bool,
    pub synced: bool,
}

impl FinalizedBudgetVote {
    pub fn new(vin: OutPoint, budget_hash: Hash256, time: i64) -> Self {
        Self {
            vin,
            budget_hash,
            time,
            signature: Vec::new(),
            valid: true,
            synced: false,
        }
    }

    /// Copy of a vote heard from a peer, with the flags we track locally reset
    pub fn received(&self) -> Self {
        Self {
            valid: true,
            synced: false,
            ..self.clone()
        }
    }

    pub fn hash(&self) -> Hash256 {
        HashWriter::new()
            .write_hash(&self.vin.txid)
            .write_u32(self.vin.index)
            .write_hash(&self.budget_hash)
            .write_i64(self.time)
            .finish()
    }

    pub fn message(&self) -> String {
        format!("{}{}{}", self.vin.short(), self.budget_hash, self.time)
    }

    pub fn sign(&mut self, key: &SecretKey, signer: &dyn MessageSigner) -> Result<()> {
        self.signature = signer.sign(&self.message(), key)?;
        Ok(())
    }

    pub fn verify(&self, pubkey: &PubKey, signer: &dyn MessageSigner) -> Result<()> {
        verify_or_reject(signer, pubkey, &self.signature, &self.message(), "fbvote", &self.vin)
    }
}
