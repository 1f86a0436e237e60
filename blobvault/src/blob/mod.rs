//! Blobstorage backup engine: rotation, hard-link snapshots, tar
//! archives, retention, and restore.

pub mod archive;
pub mod cleanup;
pub mod restore;
pub mod sync;

use crate::filestorage;
use crate::naming::{gen_timestamp, Generation};
use crate::utils::{Result, VaultError};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info};

/// How blob backups are made and retained. Decided once at startup from
/// the validated configuration and threaded through explicitly.
#[derive(Debug, Clone)]
pub struct BlobOptions {
    pub full: bool,
    pub keep: u32,
    pub keep_days: u32,
    pub use_rsync: bool,
    pub rsync_options: Vec<String>,
    pub archive: bool,
    pub compress: bool,
    pub timestamps: bool,
    pub incremental: bool,
    pub hard_links_on_first_copy: bool,
}

impl BlobOptions {
    pub fn retention_policy(&self) -> cleanup::RetentionPolicy {
        cleanup::RetentionPolicy {
            keep: self.keep,
            keep_days: self.keep_days,
            full: self.full,
        }
    }

    /// The `latest` symlink only makes sense when names carry their own
    /// timestamps, and would be misleading when it could end up pointing
    /// at a partial delta.
    fn latest_symlink_enabled(&self) -> bool {
        self.timestamps && !self.incremental
    }
}

/// The prefix shared by every entry in a destination directory: the base
/// name of the tree being backed up.
pub fn base_prefix(source: &Path) -> Result<String> {
    source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            VaultError::Config(format!("{} has no usable base name", source.display()))
        })
}

/// Pick the generation for a new backup. In timestamp mode the blob
/// backup carries the timestamp of the most recent filestorage backup,
/// so both sides of one backup run share exactly one generation; without
/// a filestorage backup a fresh timestamp is generated. In numbered mode
/// the newest entry is always `0`.
pub fn target_generation(
    timestamps: bool,
    fs_location: Option<&Path>,
    now: DateTime<Utc>,
) -> Generation {
    if !timestamps {
        return Generation::Number(0);
    }
    let from_filestorage = fs_location.and_then(|location| {
        match filestorage::latest_backup_timestamp(location) {
            Ok(ts) => ts,
            Err(e) => {
                debug!(
                    "Could not read filestorage backups in {}: {}",
                    location.display(),
                    e
                );
                None
            }
        }
    });
    match from_filestorage {
        Some(ts) => Generation::Timestamp(ts),
        None => Generation::Timestamp(gen_timestamp(now)),
    }
}

/// Back up `source` into `destination` and apply retention.
///
/// `fs_location` is the companion filestorage backup directory, when
/// there is one: it supplies the shared generation timestamp, anchors
/// incremental archives, and (in incremental mode) drives orphan
/// pruning. A failure of the underlying copy or archive command aborts
/// before cleanup runs.
pub fn backup_blobs(
    source: &Path,
    destination: &Path,
    fs_location: Option<&Path>,
    options: &BlobOptions,
    now: DateTime<Utc>,
) -> Result<()> {
    let prefix = base_prefix(source)?;
    info!(
        "Please wait while backing up blobs from {} to {}",
        source.display(),
        destination.display()
    );

    let written = if options.archive {
        archive::backup(source, destination, &prefix, fs_location, options, now)?
    } else {
        sync::backup(source, destination, &prefix, fs_location, options, now)?
    };

    // Cleanup still runs after a no-op backup: companion orphan state
    // may have changed even when nothing new was written.
    let companion = if options.incremental { fs_location } else { None };
    cleanup::cleanup_backups(
        destination,
        &prefix,
        options.retention_policy(),
        options.archive,
        companion,
        now,
    )?;
    cleanup::refresh_latest_symlink(
        destination,
        written.as_deref(),
        options.latest_symlink_enabled(),
    )?;
    Ok(())
}

/// Restore blobs from `backup_location` into `blobdir`.
///
/// With `only_check`, only verify that the restore could work (the
/// requested backup exists); nothing is touched.
pub fn restore_blobs(
    backup_location: &Path,
    blobdir: &Path,
    options: &BlobOptions,
    date: Option<&str>,
    only_check: bool,
) -> Result<()> {
    if options.archive {
        restore::restore_archive(backup_location, blobdir, options, date, only_check)
    } else {
        restore::restore_directory(backup_location, blobdir, options, date, only_check)
    }
}
