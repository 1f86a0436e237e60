//! Per-storage orchestration of backup and restore runs.
//!
//! Storages are processed one at a time, each finishing its whole
//! backup+cleanup chain before the next begins. A failure halts the
//! failing storage's chain (no blob backup after a failed filestorage
//! backup, no cleanup after a failed copy) but the remaining storages
//! still get their turn; the process exits nonzero if any storage
//! failed. Restores are different: all checks run first, and the
//! destructive pass stops at the first failure.

use crate::blob;
use crate::blob::restore::normalize_restore_date;
use crate::cmd;
use crate::config::{BackupMode, Settings, Storage};
use crate::filestorage;
use crate::fs::tree::ensure_location;
use crate::utils::{Result, VaultError};
use chrono::{DateTime, Utc};
use std::io::Write;
use tracing::{error, info};

/// Run a backup (or snapshot) over every configured storage.
pub fn backup_all(settings: &Settings, mode: BackupMode, now: DateTime<Utc>) -> Result<()> {
    if let Some(pre) = &settings.pre_command {
        cmd::run_shell(pre)?;
    }
    prepare_locations(settings, mode)?;

    let mut failed = 0usize;
    for storage in &settings.storages {
        if let Err(e) = backup_one(settings, storage, mode, now) {
            if e.is_fatal() {
                return Err(e);
            }
            error!("Backup of storage {} failed: {}", storage.name, e);
            failed += 1;
        }
    }

    if let Some(post) = &settings.post_command {
        cmd::run_shell(post)?;
    }
    if failed > 0 {
        return Err(VaultError::StoragesFailed(failed));
    }
    Ok(())
}

fn prepare_locations(settings: &Settings, mode: BackupMode) -> Result<()> {
    for storage in &settings.storages {
        if !settings.only_blobs {
            ensure_location(storage.fs_location(mode)?)?;
        }
        if settings.backup_blobs && storage.blobdir.is_some() {
            ensure_location(storage.blob_location(mode)?)?;
        }
    }
    Ok(())
}

fn backup_one(
    settings: &Settings,
    storage: &Storage,
    mode: BackupMode,
    now: DateTime<Utc>,
) -> Result<()> {
    let fs_location = if settings.only_blobs {
        None
    } else {
        let location = storage.fs_location(mode)?;
        filestorage::run_backup(
            &settings.backup_utility,
            &storage.datafs,
            location,
            settings.backup_flags(mode),
        )?;
        filestorage::cleanup(location, settings.keep)?;
        Some(location)
    };

    if !settings.backup_blobs {
        return Ok(());
    }
    let blobdir = storage.blobdir.as_deref().ok_or_else(|| {
        VaultError::Missing(format!(
            "blob backup requested but storage {} has no blobdir",
            storage.name
        ))
    })?;
    blob::backup_blobs(
        blobdir,
        storage.blob_location(mode)?,
        fs_location,
        &settings.blob_options(mode),
        now,
    )
}

/// Restore every configured storage, checks first.
pub fn restore_all(
    settings: &Settings,
    mode: BackupMode,
    date: Option<&str>,
    no_prompt: bool,
) -> Result<()> {
    if let Some(date) = date {
        // Fail on a bad date before anything is replaced.
        normalize_restore_date(date)?;
        info!("Date restriction: restoring state at {}.", date);
    }

    if !no_prompt && !confirm_restore(settings) {
        info!("Not restoring.");
        return Ok(());
    }

    if let Some(pre) = &settings.pre_command {
        cmd::run_shell(pre)?;
    }

    // Check pass: nothing is touched until every storage checks out.
    for storage in &settings.storages {
        check_one(settings, storage, mode, date)?;
    }

    for storage in &settings.storages {
        restore_one(settings, storage, mode, date)?;
    }

    if let Some(post) = &settings.post_command {
        cmd::run_shell(post)?;
    }
    Ok(())
}

fn check_one(
    settings: &Settings,
    storage: &Storage,
    mode: BackupMode,
    date: Option<&str>,
) -> Result<()> {
    if !settings.only_blobs {
        // Creating a missing parent directory doubles as a check that we
        // are allowed to write there at all.
        if let Some(parent) = storage.datafs.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                info!("Created directory {}", parent.display());
            }
        }
    }
    if settings.backup_blobs {
        if let Some(blobdir) = storage.blobdir.as_deref() {
            blob::restore_blobs(
                storage.blob_location(mode)?,
                blobdir,
                &settings.blob_options(mode),
                date,
                true,
            )
            .map_err(|e| {
                error!("Restoring blobstorage of storage {} would fail.", storage.name);
                e
            })?;
        }
    }
    Ok(())
}

fn restore_one(
    settings: &Settings,
    storage: &Storage,
    mode: BackupMode,
    date: Option<&str>,
) -> Result<()> {
    if !settings.only_blobs {
        filestorage::run_restore(
            &settings.backup_utility,
            &storage.datafs,
            storage.fs_location(mode)?,
            date,
            settings.verbose,
        )?;
    }
    if settings.backup_blobs {
        if let Some(blobdir) = storage.blobdir.as_deref() {
            blob::restore_blobs(
                storage.blob_location(mode)?,
                blobdir,
                &settings.blob_options(mode),
                date,
                false,
            )?;
        }
    }
    Ok(())
}

/// Spell out what a restore will replace and require a literal yes/no.
fn confirm_restore(settings: &Settings) -> bool {
    let mut question = String::from("\n");
    if !settings.only_blobs {
        question.push_str("This will replace the filestorage:\n");
        for storage in &settings.storages {
            question.push_str(&format!("    {}\n", storage.datafs.display()));
        }
    }
    if settings.backup_blobs {
        question.push_str("This will replace the blobstorage:\n");
        for storage in &settings.storages {
            if let Some(blobdir) = &storage.blobdir {
                question.push_str(&format!("    {}\n", blobdir.display()));
            }
        }
    }
    question.push_str("Are you sure?");
    ask_exact(&question)
}

/// Ask a yes/no question on the terminal, defaulting to no, and insist
/// on a full "yes" or "no".
fn ask_exact(question: &str) -> bool {
    let stdin = std::io::stdin();
    loop {
        print!("{} (yes/No)? ", question);
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        if stdin.read_line(&mut answer).is_err() || answer.is_empty() {
            // EOF: take the default.
            return false;
        }
        match answer.trim().to_lowercase().as_str() {
            "" => return false,
            "yes" => return true,
            "no" => return false,
            _ => println!("Please explicitly answer yes/no in full (or accept the default)"),
        }
    }
}
