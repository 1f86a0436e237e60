//! blobvault library
//!
//! Rotating full/incremental backups for a filestorage object database
//! and its blobstorage tree: hard-link snapshots, tar archive chains,
//! retention policies, and restore.

pub mod blob;
pub mod cmd;
pub mod config;
pub mod entries;
pub mod filestorage;
pub mod fs;
pub mod naming;
pub mod rotate;
pub mod runner;
pub mod utils;

// Re-export commonly used types
pub use config::{BackupMode, Settings, Storage};
pub use utils::errors::VaultError;
pub type Result<T> = std::result::Result<T, VaultError>;
