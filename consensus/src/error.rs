//! Payment consensus error types

use govnode_core::{OutPoint, SignerError, SnapshotError};
use govnode_masternode::MasternodeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    /// Vote refused; `dos` is the misbehaviour score owed by the sender
    #[error("{reason}")]
    Rejected { reason: String, dos: u32 },

    #[error("Unknown Masternode {0}")]
    UnknownMasternode(OutPoint),

    #[error("Masternode {voter} already voted for block {height}")]
    AlreadyVoted { voter: OutPoint, height: i64 },

    #[error(transparent)]
    Masternode(#[from] MasternodeError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl PaymentError {
    pub fn rejected(reason: impl Into<String>, dos: u32) -> Self {
        PaymentError::Rejected {
            reason: reason.into(),
            dos,
        }
    }

    pub fn dos(&self) -> u32 {
        match self {
            PaymentError::Rejected { dos, .. } => *dos,
            _ => 0,
        }
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
