//! Core error types

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Outcome of reading a cache file, in the order the checks run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    Ok,
    FileError,
    HashReadError,
    IncorrectHash,
    IncorrectMagicMessage,
    IncorrectMagicNumber,
    IncorrectFormat,
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to open file {path}: {source}")]
    FileError { path: PathBuf, source: io::Error },

    #[error("Failed to read checksum from {0}")]
    HashReadError(PathBuf),

    #[error("Checksum mismatch in {0}, data corrupted")]
    IncorrectHash(PathBuf),

    #[error("Invalid magic message in {0}")]
    IncorrectMagicMessage(PathBuf),

    #[error("Invalid network magic number in {0}")]
    IncorrectMagicNumber(PathBuf),

    #[error("Failed to deserialize {path}: {reason}")]
    IncorrectFormat { path: PathBuf, reason: String },

    #[error("Failed to write {path}: {reason}")]
    WriteError { path: PathBuf, reason: String },
}

impl SnapshotError {
    pub fn read_result(&self) -> ReadResult {
        match self {
            SnapshotError::FileError { .. } | SnapshotError::WriteError { .. } => {
                ReadResult::FileError
            }
            SnapshotError::HashReadError(_) => ReadResult::HashReadError,
            SnapshotError::IncorrectHash(_) => ReadResult::IncorrectHash,
            SnapshotError::IncorrectMagicMessage(_) => ReadResult::IncorrectMagicMessage,
            SnapshotError::IncorrectMagicNumber(_) => ReadResult::IncorrectMagicNumber,
            SnapshotError::IncorrectFormat { .. } => ReadResult::IncorrectFormat,
        }
    }

    /// True when the file simply does not exist yet
    pub fn is_missing(&self) -> bool {
        matches!(self, SnapshotError::FileError { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Signer(#[from] SignerError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
