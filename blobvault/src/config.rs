//! Configuration management for blobvault.
//!
//! All options live in one TOML file and are parsed into typed structs
//! once at startup, then validated eagerly: conflicting or incomplete
//! combinations are fatal before anything touches the disk.

use crate::blob::BlobOptions;
use crate::filestorage::BackupFlags;
use crate::utils::{Result, VaultError};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Which location set an operation works against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    /// Rotating full/incremental backups.
    Standard,
    /// One-shot full snapshots kept separately.
    Snapshot,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Path to the external backup utility for the filestorage.
    #[serde(default = "default_backup_utility")]
    pub backup_utility: PathBuf,

    /// Number of full filestorage backups (and blob generations) to keep.
    /// 0 disables retention.
    #[serde(default = "default_keep")]
    pub keep: u32,

    /// Days of blob backups to keep for partial backups; extends `keep`.
    #[serde(default)]
    pub keep_blob_days: u32,

    /// Make full backups instead of incremental ones.
    #[serde(default)]
    pub full: bool,

    /// Let the backup utility verify only the latest incremental.
    #[serde(default = "default_true")]
    pub quick: bool,

    /// Pass --verbose to the backup utility.
    #[serde(default)]
    pub verbose: bool,

    /// Gzip the filestorage backups.
    #[serde(default)]
    pub gzip: bool,

    /// Back up blobstorages at all.
    #[serde(default = "default_true")]
    pub backup_blobs: bool,

    /// Skip the filestorage and only handle blobs.
    #[serde(default)]
    pub only_blobs: bool,

    /// Use rsync (with hard links) for directory-mode blob backups.
    #[serde(default = "default_true")]
    pub use_rsync: bool,

    /// Extra options appended to every rsync invocation.
    #[serde(default)]
    pub rsync_options: Vec<String>,

    /// Store blob backups as tar archives instead of directories.
    #[serde(default)]
    pub archive_blob: bool,

    /// Gzip blob archives.
    #[serde(default)]
    pub compress_blob: bool,

    /// Name blob backups by UTC timestamp instead of rotation number.
    #[serde(default)]
    pub blob_timestamps: bool,

    /// Make incremental blob archives (requires timestamps + archives).
    #[serde(default)]
    pub incremental_blobs: bool,

    /// Hard-link the very first rsync backup against the live source.
    #[serde(default)]
    pub rsync_hard_links_on_first_copy: bool,

    /// Shell command to run before any operation; failure aborts.
    #[serde(default)]
    pub pre_command: Option<String>,

    /// Shell command to run after a successful operation.
    #[serde(default)]
    pub post_command: Option<String>,

    pub storages: Vec<Storage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Storage {
    /// Display name of the storage ("1" for the only storage).
    pub name: String,

    /// The filestorage database file.
    pub datafs: PathBuf,

    /// The blobstorage tree belonging to this storage, if any.
    #[serde(default)]
    pub blobdir: Option<PathBuf>,

    pub backup_location: PathBuf,

    #[serde(default)]
    pub blob_backup_location: Option<PathBuf>,

    #[serde(default)]
    pub snapshot_location: Option<PathBuf>,

    #[serde(default)]
    pub blob_snapshot_location: Option<PathBuf>,
}

fn default_backup_utility() -> PathBuf {
    PathBuf::from("repozo")
}

fn default_keep() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl Storage {
    /// The filestorage backup location for the given mode, or a
    /// descriptive error when the configuration lacks it.
    pub fn fs_location(&self, mode: BackupMode) -> Result<&Path> {
        match mode {
            BackupMode::Standard => Ok(&self.backup_location),
            BackupMode::Snapshot => self.snapshot_location.as_deref().ok_or_else(|| {
                VaultError::Config(format!(
                    "storage {} has no snapshot_location",
                    self.name
                ))
            }),
        }
    }

    /// The blob backup location for the given mode.
    pub fn blob_location(&self, mode: BackupMode) -> Result<&Path> {
        let (location, key) = match mode {
            BackupMode::Standard => (&self.blob_backup_location, "blob_backup_location"),
            BackupMode::Snapshot => (&self.blob_snapshot_location, "blob_snapshot_location"),
        };
        location.as_deref().ok_or_else(|| {
            VaultError::Config(format!("storage {} has no {}", self.name, key))
        })
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VaultError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let settings: Settings = toml::from_str(&content)
            .map_err(|e| VaultError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject conflicting or incomplete option combinations up front.
    pub fn validate(&self) -> Result<()> {
        if self.storages.is_empty() {
            return Err(VaultError::Config("no storages configured".to_string()));
        }
        if self.only_blobs && !self.backup_blobs {
            return Err(VaultError::Config(
                "only_blobs requires backup_blobs".to_string(),
            ));
        }
        if self.incremental_blobs && !self.blob_timestamps {
            return Err(VaultError::Config(
                "incremental_blobs requires blob_timestamps".to_string(),
            ));
        }
        if self.incremental_blobs && !self.archive_blob {
            return Err(VaultError::Config(
                "incremental_blobs requires archive_blob".to_string(),
            ));
        }
        if self.incremental_blobs && self.only_blobs {
            return Err(VaultError::Config(
                "incremental_blobs needs filestorage backups to anchor to, \
                 which only_blobs disables"
                    .to_string(),
            ));
        }

        // Every location must be distinct: two storages rotating inside
        // the same directory would destroy each other's entries.
        let mut seen: HashSet<&Path> = HashSet::new();
        for storage in &self.storages {
            let locations = [
                Some(storage.backup_location.as_path()),
                storage.snapshot_location.as_deref(),
                storage.blob_backup_location.as_deref(),
                storage.blob_snapshot_location.as_deref(),
            ];
            for location in locations.into_iter().flatten() {
                if !seen.insert(location) {
                    return Err(VaultError::Config(format!(
                        "location {} is used more than once",
                        location.display()
                    )));
                }
            }
            if self.backup_blobs && storage.blobdir.is_some() {
                if storage.blob_backup_location.is_none() {
                    return Err(VaultError::Config(format!(
                        "storage {} has a blobdir but no blob_backup_location",
                        storage.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Blob engine options for one operation. Snapshots are always full
    /// and never incremental.
    pub fn blob_options(&self, mode: BackupMode) -> BlobOptions {
        let full = self.full || mode == BackupMode::Snapshot;
        let incremental = self.incremental_blobs && mode == BackupMode::Standard;
        BlobOptions {
            full,
            keep: self.keep,
            keep_days: self.keep_blob_days,
            use_rsync: self.use_rsync,
            rsync_options: self.rsync_options.clone(),
            archive: self.archive_blob,
            compress: self.compress_blob,
            timestamps: self.blob_timestamps,
            incremental,
            hard_links_on_first_copy: self.rsync_hard_links_on_first_copy,
        }
    }

    /// Backup-utility flags for one operation.
    pub fn backup_flags(&self, mode: BackupMode) -> BackupFlags {
        let full = self.full || mode == BackupMode::Snapshot;
        BackupFlags {
            full,
            verbose: self.verbose,
            gzip: self.gzip,
            quick: self.quick,
        }
    }
}
