//! Budget governance error types

use govnode_core::{CoreError, Hash256, OutPoint, SignerError, SnapshotError};
use govnode_masternode::MasternodeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BudgetError {
    /// Object refused; `dos` is the misbehaviour score owed by the sender
    #[error("{reason}")]
    Rejected { reason: String, dos: u32 },

    #[error("Unknown masternode {0}")]
    UnknownMasternode(OutPoint),

    #[error("Proposal not found! {0}")]
    UnknownProposal(Hash256),

    #[error("Finalized Budget {0} not found!")]
    UnknownBudget(Hash256),

    /// Collateral not (yet) acceptable
    #[error("Invalid collateral: {reason} ({confirmations} confirmations)")]
    Collateral { reason: String, confirmations: i64 },

    #[error(transparent)]
    Masternode(#[from] MasternodeError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl BudgetError {
    pub fn rejected(reason: impl Into<String>, dos: u32) -> Self {
        BudgetError::Rejected {
            reason: reason.into(),
            dos,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::rejected(reason, 0)
    }

    pub fn dos(&self) -> u32 {
        match self {
            BudgetError::Rejected { dos, .. } => *dos,
            _ => 0,
        }
    }
}

pub type Result<T> = std::result::Result<T, BudgetError>;
