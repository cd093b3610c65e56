//! Masternode error types

use govnode_core::{OutPoint, SignerError, SnapshotError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MasternodeError {
    /// Message refused; `dos` is the misbehaviour score owed by the sender
    #[error("{reason}")]
    Rejected { reason: String, dos: u32 },

    #[error("Unknown masternode {0}")]
    UnknownMasternode(OutPoint),

    #[error("Not capable masternode: {0}")]
    NotCapable(String),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl MasternodeError {
    pub fn rejected(reason: impl Into<String>, dos: u32) -> Self {
        MasternodeError::Rejected {
            reason: reason.into(),
            dos,
        }
    }

    pub fn dos(&self) -> u32 {
        match self {
            MasternodeError::Rejected { dos, .. } => *dos,
            _ => 0,
        }
    }
}

pub type Result<T> = std::result::Result<T, MasternodeError>;
