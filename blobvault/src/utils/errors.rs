//! Custom error types for blobvault.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mixed backup prefixes in {dir}: {first:?} vs {second:?}")]
    MixedPrefixes {
        dir: PathBuf,
        first: String,
        second: String,
    },

    #[error("{path} is named like a backup but is the wrong kind of entry; refusing to continue")]
    WrongEntryType { path: PathBuf },

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Missing input: {0}")]
    Missing(String),

    #[error("No backup found: {0}")]
    NoBackup(String),

    #[error("Invalid date argument: {0}")]
    InvalidDate(String),

    #[error("Backup run failed for {0} storage(s)")]
    StoragesFailed(usize),
}

impl VaultError {
    /// Configuration and consistency errors point at operator mistakes
    /// or prior-run corruption; they must stop the whole run instead of
    /// letting the next storage proceed on the same broken footing.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VaultError::Config(_)
                | VaultError::MixedPrefixes { .. }
                | VaultError::WrongEntryType { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
