//! Network error types

use govnode_consensus::PaymentError;
use govnode_masternode::MasternodeError;
use govnode_treasury::BudgetError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Payload too large: {size} bytes")]
    PayloadTooLarge { size: usize },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Masternode(#[from] MasternodeError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Budget(#[from] BudgetError),
}

impl NetworkError {
    /// Misbehaviour score carried by the underlying rejection
    pub fn dos(&self) -> u32 {
        match self {
            NetworkError::Masternode(e) => e.dos(),
            NetworkError::Payment(e) => e.dos(),
            NetworkError::Budget(e) => e.dos(),
            NetworkError::UnknownCommand(_) => 0,
            NetworkError::PayloadTooLarge { .. } | NetworkError::Decode(_) => 10,
            NetworkError::Encode(_) | NetworkError::Io(_) => 0,
        }
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;
