//! Restoring blob backups: pick an entry (most recent, or the most
//! recent at or before a requested date), then copy a directory-mode
//! tree back or unpack an archive chain oldest-to-newest.

use crate::blob::BlobOptions;
use crate::cmd;
use crate::entries::{
    list_entries_with_prefix, sort_most_recent_first, BackupEntry, EntryKind, ListOptions,
};
use crate::fs::tree::copy_tree;
use crate::utils::{Result, VaultError};
use std::path::{Path, PathBuf};
use tracing::info;

/// Normalize a restore date argument `yyyy-mm-dd[-hh[-mm[-ss]]]` to the
/// full timestamp width, padding missing components with zeros.
pub fn normalize_restore_date(date: &str) -> Result<String> {
    const WIDTHS: [usize; 6] = [4, 2, 2, 2, 2, 2];
    let parts: Vec<&str> = date.split('-').collect();
    if parts.len() < 3 || parts.len() > 6 {
        return Err(VaultError::InvalidDate(date.to_string()));
    }
    for (part, width) in parts.iter().zip(WIDTHS) {
        if part.len() != width || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(VaultError::InvalidDate(date.to_string()));
        }
    }
    let mut padded: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
    while padded.len() < 6 {
        padded.push("00".to_string());
    }
    Ok(padded.join("-"))
}

/// The most recent entry whose normalized timestamp is at or before the
/// cutoff; the most recent overall without one. Expects entries sorted
/// most-recent-first.
fn select_entry<'a>(
    entries: &'a [BackupEntry],
    cutoff: Option<&str>,
) -> Option<&'a BackupEntry> {
    match cutoff {
        None => entries.first(),
        Some(cutoff) => entries
            .iter()
            .find(|e| e.normalized_timestamp().as_str() <= cutoff),
    }
}

fn target_parent(blobdir: &Path) -> PathBuf {
    match blobdir.parent() {
        Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    }
}

/// Restore a directory-mode backup into `blobdir`.
pub fn restore_directory(
    backup_location: &Path,
    blobdir: &Path,
    options: &BlobOptions,
    date: Option<&str>,
    only_check: bool,
) -> Result<()> {
    let prefix = crate::blob::base_prefix(blobdir)?;
    let cutoff = date.map(normalize_restore_date).transpose()?;

    let mut entries =
        list_entries_with_prefix(backup_location, &prefix, ListOptions::directories())?;
    sort_most_recent_first(&mut entries);
    let selected = select_entry(&entries, cutoff.as_deref()).ok_or_else(|| {
        VaultError::NoBackup(format!(
            "no blob backup in {} to restore{}",
            backup_location.display(),
            cutoff.as_deref().map(|c| format!(" at {}", c)).unwrap_or_default()
        ))
    })?;
    let source_tree = selected.path.join(&prefix);
    if !source_tree.is_dir() {
        return Err(VaultError::NoBackup(format!(
            "backup {} does not contain a {} tree",
            selected.path.display(),
            prefix
        )));
    }
    if only_check {
        return Ok(());
    }

    info!(
        "Restoring blobs from {} to {}",
        source_tree.display(),
        blobdir.display()
    );
    if options.use_rsync {
        let mut args: Vec<String> = vec!["-a".to_string()];
        args.extend(options.rsync_options.iter().cloned());
        args.push("--delete".to_string());
        args.push(source_tree.display().to_string());
        args.push(target_parent(blobdir).display().to_string());
        cmd::run_silent("rsync", &args)
    } else {
        if blobdir.exists() {
            std::fs::remove_dir_all(blobdir)?;
        }
        copy_tree(&source_tree, blobdir)
    }
}

/// Restore an archive-mode backup into `blobdir`, layering incremental
/// archives over their full archive when needed.
pub fn restore_archive(
    backup_location: &Path,
    blobdir: &Path,
    options: &BlobOptions,
    date: Option<&str>,
    only_check: bool,
) -> Result<()> {
    let prefix = crate::blob::base_prefix(blobdir)?;
    let cutoff = date.map(normalize_restore_date).transpose()?;

    let mut entries =
        list_entries_with_prefix(backup_location, &prefix, ListOptions::archives())?;
    // Snapshot-state files are never a restore source, and neither are
    // leftover directory-mode entries.
    entries.retain(|e| matches!(e.kind, EntryKind::FullArchive | EntryKind::DeltaArchive));
    sort_most_recent_first(&mut entries);

    let selected_index = match cutoff.as_deref() {
        None => {
            if entries.is_empty() {
                None
            } else {
                Some(0)
            }
        }
        Some(cutoff) => entries
            .iter()
            .position(|e| e.normalized_timestamp().as_str() <= cutoff),
    };
    let selected_index = selected_index.ok_or_else(|| {
        VaultError::NoBackup(format!(
            "no blob archive in {} to restore{}",
            backup_location.display(),
            cutoff.as_deref().map(|c| format!(" at {}", c)).unwrap_or_default()
        ))
    })?;

    // An incremental archive is only meaningful on top of the full
    // archive it was recorded against: everything from that full up to
    // the selected archive has to be unpacked, oldest first.
    let chain: Vec<&BackupEntry> = if entries[selected_index].kind == EntryKind::DeltaArchive {
        let full_offset = entries[selected_index..]
            .iter()
            .position(|e| e.kind == EntryKind::FullArchive)
            .ok_or_else(|| {
                VaultError::NoBackup(format!(
                    "incremental archive {} has no full archive to restore against",
                    entries[selected_index].path.display()
                ))
            })?;
        entries[selected_index..=selected_index + full_offset]
            .iter()
            .rev()
            .collect()
    } else {
        vec![&entries[selected_index]]
    };

    if only_check {
        return Ok(());
    }

    if blobdir.exists() {
        std::fs::remove_dir_all(blobdir)?;
    }
    std::fs::create_dir_all(blobdir)?;

    let incremental = chain.len() > 1 || options.incremental;
    for entry in chain {
        info!(
            "Restoring blobs from {} to {}",
            entry.path.display(),
            blobdir.display()
        );
        let compress = entry
            .path
            .extension()
            .is_some_and(|ext| ext == "gz");
        let mut args: Vec<String> = Vec::new();
        args.push(if compress { "xzf" } else { "xf" }.to_string());
        args.push(entry.path.display().to_string());
        if incremental {
            args.push("--incremental".to_string());
        }
        args.push("-C".to_string());
        args.push(blobdir.display().to_string());
        cmd::run_silent("tar", &args)?;
    }
    Ok(())
}
