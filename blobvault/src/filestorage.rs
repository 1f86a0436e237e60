//! Driving the external backup utility for the filestorage (the object
//! database file) and cleaning up what it leaves behind.
//!
//! The utility itself is opaque: we build its argument list, run it, and
//! judge it by exit status. It writes `<timestamp>.fs` / `<timestamp>.fsz`
//! full snapshots, `<timestamp>.deltafs(z)` incrementals, and auxiliary
//! `.dat` files into the backup location; those names are the only
//! contract this module relies on.

use crate::cmd;
use crate::naming::is_timestamp;
use crate::utils::Result;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info};

/// Suffixes of full snapshot files (`--gzip` produces `.fsz`).
const FULL_SUFFIXES: [&str; 2] = [".fs", ".fsz"];

/// Suffixes of incremental snapshot files.
const DELTA_SUFFIXES: [&str; 2] = [".deltafs", ".deltafsz"];

/// Flags for a backup-utility run.
#[derive(Debug, Clone, Copy)]
pub struct BackupFlags {
    pub full: bool,
    pub verbose: bool,
    pub gzip: bool,
    pub quick: bool,
}

/// Build the argument list for a backup run:
/// `--backup -f <fs> -r <dir> [--quick] [-F] [--verbose] [--gzip]`.
pub fn backup_arguments(datafs: &Path, location: &Path, flags: BackupFlags) -> Vec<String> {
    let mut arguments = vec![
        "--backup".to_string(),
        "-f".to_string(),
        datafs.display().to_string(),
        "-r".to_string(),
        location.display().to_string(),
    ];
    // A full backup re-reads everything anyway; --quick only makes sense
    // for incrementals.
    if flags.quick && !flags.full {
        arguments.push("--quick".to_string());
    }
    if flags.full {
        arguments.push("-F".to_string());
    } else {
        debug!(
            "Making an incremental backup; if nothing changed since the \
             last backup there will be no new file."
        );
    }
    if flags.verbose {
        arguments.push("--verbose".to_string());
    }
    if flags.gzip {
        arguments.push("--gzip".to_string());
    }
    arguments
}

/// Build the argument list for a restore run:
/// `--recover -o <fs> -r <dir> [-D <date>] [--verbose]`.
pub fn restore_arguments(
    datafs: &Path,
    location: &Path,
    date: Option<&str>,
    verbose: bool,
) -> Vec<String> {
    let mut arguments = vec![
        "--recover".to_string(),
        "-o".to_string(),
        datafs.display().to_string(),
        "-r".to_string(),
        location.display().to_string(),
    ];
    if let Some(date) = date {
        debug!("Restore as of date {} requested.", date);
        arguments.push("-D".to_string());
        arguments.push(date.to_string());
    }
    if verbose {
        arguments.push("--verbose".to_string());
    }
    arguments
}

/// Run the backup utility to back up one filestorage.
pub fn run_backup(utility: &Path, datafs: &Path, location: &Path, flags: BackupFlags) -> Result<()> {
    info!(
        "Please wait while backing up database file: {} to {}",
        datafs.display(),
        location.display()
    );
    cmd::run_checked(
        &utility.display().to_string(),
        backup_arguments(datafs, location, flags),
    )
}

/// Run the backup utility to restore one filestorage.
pub fn run_restore(
    utility: &Path,
    datafs: &Path,
    location: &Path,
    date: Option<&str>,
    verbose: bool,
) -> Result<()> {
    info!(
        "Please wait while restoring database file: {} to {}",
        location.display(),
        datafs.display()
    );
    cmd::run_checked(
        &utility.display().to_string(),
        restore_arguments(datafs, location, date, verbose),
    )
}

fn has_suffix(name: &str, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|s| name.ends_with(s))
}

/// Pick the file names to delete: everything strictly older than the
/// `keep`-th most recent full snapshot. Dependents (incrementals, `.dat`
/// files) have no say of their own; they live and die with their
/// modification time relative to that cutoff.
fn expendable_files(files: &[(String, SystemTime)], keep: u32) -> Vec<String> {
    if keep == 0 {
        // Explicit "retention disabled" sentinel, not "keep zero".
        debug!("Value of 'keep' is 0, we don't want to remove anything.");
        return Vec::new();
    }
    let mut fulls: Vec<&(String, SystemTime)> = files
        .iter()
        .filter(|(name, _)| has_suffix(name, &FULL_SUFFIXES))
        .collect();
    if fulls.len() <= keep as usize {
        debug!(
            "Not removing backups: {} full backup(s) <= keep ({}).",
            fulls.len(),
            keep
        );
        return Vec::new();
    }
    // Newest first; the keep-th entry sets the cutoff.
    fulls.sort_by(|a, b| b.1.cmp(&a.1));
    let cutoff = fulls[keep as usize - 1].1;

    files
        .iter()
        .filter(|(_, modified)| *modified < cutoff)
        .map(|(name, _)| name.clone())
        .collect()
}

/// Remove old filestorage backups, keeping the last `keep` full
/// snapshots plus everything that belongs to them.
pub fn cleanup(location: &Path, keep: u32) -> Result<()> {
    debug!("Trying to clean up old backups.");
    let mut files = Vec::new();
    for dirent in std::fs::read_dir(location)? {
        let dirent = dirent?;
        if !dirent.file_type()?.is_file() {
            continue;
        }
        let name = dirent.file_name().to_string_lossy().into_owned();
        let modified = dirent.metadata()?.modified()?;
        files.push((name, modified));
    }

    let doomed = expendable_files(&files, keep);
    if doomed.is_empty() {
        return Ok(());
    }
    for name in &doomed {
        let path = location.join(name);
        std::fs::remove_file(&path)?;
        debug!("Deleted {}.", path.display());
    }
    info!(
        "Removed {} file(s) belonging to old backups, the latest {} full \
         backups have been kept.",
        doomed.len(),
        keep
    );
    Ok(())
}

fn timestamps_with_suffixes(location: &Path, suffixes: &[&str]) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for dirent in std::fs::read_dir(location)? {
        let dirent = dirent?;
        if !dirent.file_type()?.is_file() {
            continue;
        }
        let name = dirent.file_name().to_string_lossy().into_owned();
        for suffix in suffixes {
            if let Some(stem) = name.strip_suffix(suffix) {
                if is_timestamp(stem) {
                    found.push(stem.to_string());
                }
                break;
            }
        }
    }
    Ok(found)
}

/// Timestamp of the most recent backup of any kind, full or incremental.
/// This is the generation a simultaneous blob backup should carry.
pub fn latest_backup_timestamp(location: &Path) -> Result<Option<String>> {
    let mut all = timestamps_with_suffixes(location, &FULL_SUFFIXES)?;
    all.extend(timestamps_with_suffixes(location, &DELTA_SUFFIXES)?);
    Ok(all.into_iter().max())
}

/// Timestamp of the most recent *full* backup: the generation an
/// incremental blob archive chain is anchored to.
pub fn latest_full_timestamp(location: &Path) -> Result<Option<String>> {
    Ok(timestamps_with_suffixes(location, &FULL_SUFFIXES)?
        .into_iter()
        .max())
}

/// Timestamp of the oldest retained full backup. Blob backups older than
/// this have lost their matching database generation and are orphans.
pub fn oldest_full_timestamp(location: &Path) -> Result<Option<String>> {
    Ok(timestamps_with_suffixes(location, &FULL_SUFFIXES)?
        .into_iter()
        .min())
}
