//! Framed cache files
//!
//! Layout: `magic message ‖ network magic (4 bytes) ‖ bincode payload ‖
//! sha256d checksum (32 bytes)`. The checksum covers everything before it.

use crate::error::SnapshotError;
use crate::hash::sha256d;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const CHECKSUM_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
    magic_message: String,
    network_magic: [u8; 4],
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>, magic_message: &str, network_magic: [u8; 4]) -> Self {
        Self {
            path: path.into(),
            magic_message: magic_message.to_string(),
            network_magic,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write<T: Serialize>(&self, payload: &T) -> Result<(), SnapshotError> {
        let write_err = |reason: String| SnapshotError::WriteError {
            path: self.path.clone(),
            reason,
        };

        let mut data = bincode::serialize(&self.magic_message).map_err(|e| write_err(e.to_string()))?;
        data.extend_from_slice(&self.network_magic);
        let body = bincode::serialize(payload).map_err(|e| write_err(e.to_string()))?;
        data.extend_from_slice(&body);
        let checksum = sha256d(&data);
        data.extend_from_slice(checksum.as_bytes());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &data).map_err(|e| write_err(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| write_err(e.to_string()))?;

        log::debug!(
            "Written info to {}  {} bytes",
            self.path.display(),
            data.len()
        );
        Ok(())
    }

    pub fn read<T: DeserializeOwned>(&self) -> Result<T, SnapshotError> {
        let data = fs::read(&self.path).map_err(|source| SnapshotError::FileError {
            path: self.path.clone(),
            source,
        })?;

        if data.len() < CHECKSUM_LEN {
            return Err(SnapshotError::HashReadError(self.path.clone()));
        }
        let (body, checksum) = data.split_at(data.len() - CHECKSUM_LEN);
        if sha256d(body).as_bytes()[..] != checksum[..] {
            return Err(SnapshotError::IncorrectHash(self.path.clone()));
        }

        let mut reader: &[u8] = body;
        let magic: String = bincode::deserialize_from(&mut reader)
            .map_err(|_| SnapshotError::IncorrectMagicMessage(self.path.clone()))?;
        if magic != self.magic_message {
            return Err(SnapshotError::IncorrectMagicMessage(self.path.clone()));
        }

        if reader.len() < 4 || reader[..4] != self.network_magic {
            return Err(SnapshotError::IncorrectMagicNumber(self.path.clone()));
        }
        reader = &reader[4..];

        bincode::deserialize(reader).map_err(|e| SnapshotError::IncorrectFormat {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Read and discard, checking only that the file would load
    pub fn verify<T: DeserializeOwned>(&self) -> Result<(), SnapshotError> {
        self.read::<T>().map(|_| ())
    }
}
