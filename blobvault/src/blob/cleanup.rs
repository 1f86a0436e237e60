//! Retention and cleanup of blob backups.
//!
//! Two regimes, never combined in one invocation:
//!
//! - When a companion filestorage backup directory drives incremental
//!   archives, blob backups live and die with the filestorage
//!   generations: anything older than the oldest retained full
//!   filestorage backup is an orphan and is removed, regardless of the
//!   keep counts.
//! - Otherwise a keep-count/keep-days policy applies: the newest `keep`
//!   units always survive, and a day threshold can only extend retention
//!   further back, never shorten it below that floor.

use crate::entries::{
    combine_into_groups, list_entries_with_prefix, sort_most_recent_first, BackupEntry,
    BackupGroup, EntryKind, ListOptions,
};
use crate::utils::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info};

/// Retention policy for one destination directory.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub keep: u32,
    pub keep_days: u32,
    pub full: bool,
}

impl RetentionPolicy {
    /// The effective `(keep, keep_days)` pair. Full backups ignore the
    /// day threshold. For partial backups with a day threshold, at least
    /// the most recent entry is always kept, as a safety net against
    /// clock or metadata corruption.
    fn effective(&self) -> (u32, u32) {
        let keep_days = if self.full { 0 } else { self.keep_days };
        let mut keep = self.keep;
        if keep_days > 0 && keep == 0 {
            keep = 1;
        }
        (keep, keep_days)
    }
}

/// Age in whole days of the moment an entry stands for.
fn age_in_days(entry: &BackupEntry, now: DateTime<Utc>) -> i64 {
    (now - entry.generation.moment(entry.modified)).num_days()
}

fn remove_entry(entry: &BackupEntry) -> Result<()> {
    info!("Removing {}", entry.path.display());
    if entry.kind == EntryKind::Directory {
        std::fs::remove_dir_all(&entry.path)?;
    } else {
        std::fs::remove_file(&entry.path)?;
    }
    Ok(())
}

fn remove_group(group: &BackupGroup) -> Result<()> {
    for entry in &group.entries {
        remove_entry(entry)?;
    }
    Ok(())
}

/// The timestamp a group is anchored at: the oldest normalized
/// timestamp among its members (the full archive and its state file; any
/// deltas are newer).
fn group_anchor_timestamp(group: &BackupGroup) -> String {
    group
        .entries
        .iter()
        .map(|e| e.normalized_timestamp())
        .min()
        .unwrap_or_default()
}

/// Remove expendable backups from `destination`.
///
/// With `companion_fs` set (incremental-archive mode), only orphan
/// pruning runs; the count/day policy governs otherwise. Routine
/// deletions are logged, never errors.
pub fn cleanup_backups(
    destination: &Path,
    prefix: &str,
    policy: RetentionPolicy,
    archive_mode: bool,
    companion_fs: Option<&Path>,
    now: DateTime<Utc>,
) -> Result<()> {
    let options = if archive_mode {
        ListOptions::archives_with_state()
    } else {
        ListOptions::directories()
    };
    let mut entries = list_entries_with_prefix(destination, prefix, options)?;
    sort_most_recent_first(&mut entries);
    if entries.is_empty() {
        debug!("No backups found in {}, nothing to remove.", destination.display());
        return Ok(());
    }

    if let Some(fs_location) = companion_fs {
        return prune_orphans(entries, fs_location, archive_mode);
    }

    let (keep, keep_days) = policy.effective();
    if keep == 0 {
        // keep == 0 disables retention entirely.
        debug!("Value of 'keep' is 0, we don't want to remove anything.");
        return Ok(());
    }

    let mut removed = 0usize;
    if archive_mode {
        for group in combine_into_groups(entries).iter().skip(keep as usize) {
            if keep_days > 0 {
                // Group entries stay newest-first; the first one sets
                // the group's age.
                let age = group
                    .entries
                    .first()
                    .map(|e| age_in_days(e, now))
                    .unwrap_or(0);
                if age < keep_days as i64 {
                    continue;
                }
            }
            remove_group(group)?;
            removed += group.entries.len();
        }
    } else {
        for entry in entries.iter().skip(keep as usize) {
            if keep_days > 0 && age_in_days(entry, now) < keep_days as i64 {
                continue;
            }
            remove_entry(entry)?;
            removed += 1;
        }
    }
    if removed > 0 {
        info!("Removed {} old backup entry(ies), keeping the latest {}.", removed, keep);
    } else {
        debug!("No backups needed removing.");
    }
    Ok(())
}

/// Delete every backup older than the oldest retained full filestorage
/// backup. Without a matching database generation a blob backup cannot
/// be restored, whatever the keep counts say.
fn prune_orphans(
    entries: Vec<BackupEntry>,
    fs_location: &Path,
    archive_mode: bool,
) -> Result<()> {
    let Some(oldest) = crate::filestorage::oldest_full_timestamp(fs_location)? else {
        debug!(
            "No full filestorage backups in {}; not pruning orphans.",
            fs_location.display()
        );
        return Ok(());
    };

    let mut removed = 0usize;
    if archive_mode {
        for group in combine_into_groups(entries) {
            if group_anchor_timestamp(&group) < oldest {
                remove_group(&group)?;
                removed += group.entries.len();
            }
        }
    } else {
        for entry in &entries {
            if entry.normalized_timestamp() < oldest {
                remove_entry(entry)?;
                removed += 1;
            }
        }
    }
    if removed > 0 {
        info!(
            "Removed {} blob backup entry(ies) older than the oldest \
             retained filestorage backup ({}).",
            removed, oldest
        );
    }
    Ok(())
}

/// Recreate the `latest` convenience symlink inside `destination`.
///
/// Any existing symlink is removed first; it is only recreated (pointing
/// at the entry just written) when `enabled`.
pub fn refresh_latest_symlink(
    destination: &Path,
    newest: Option<&str>,
    enabled: bool,
) -> Result<()> {
    let link = destination.join("latest");
    match std::fs::symlink_metadata(&link) {
        Ok(meta) if meta.file_type().is_symlink() => std::fs::remove_file(&link)?,
        Ok(_) => {
            debug!("{} exists but is not a symlink; leaving it alone.", link.display());
            return Ok(());
        }
        Err(_) => {}
    }
    if enabled {
        if let Some(newest) = newest {
            std::os::unix::fs::symlink(newest, &link)?;
            debug!("Symlinked {} to {}.", link.display(), newest);
        }
    }
    Ok(())
}
