//! Directory-mode blob backups: one directory tree per generation,
//! hard-linked against the previous generation via rsync `--link-dest`
//! so that unchanged files cost no extra disk.

use crate::blob::{target_generation, BlobOptions};
use crate::cmd;
use crate::entries::{list_entries_with_prefix, sort_most_recent_first, ListOptions};
use crate::fs::tree::copy_tree;
use crate::rotate::rotate_directories;
use crate::utils::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Create one directory-mode backup generation. Returns the name of the
/// entry the `latest` symlink should point at.
pub fn backup(
    source: &Path,
    destination: &Path,
    prefix: &str,
    fs_location: Option<&Path>,
    options: &BlobOptions,
    now: DateTime<Utc>,
) -> Result<Option<String>> {
    let generation = target_generation(options.timestamps, fs_location, now);
    let entry_name = format!("{}.{}", prefix, generation);
    let entry_path = destination.join(&entry_name);

    if options.timestamps {
        if entry_path.exists() {
            // The companion filestorage backup produced nothing new, so
            // this generation is already covered.
            info!(
                "Blob backup {} already exists; no new backup needed.",
                entry_path.display()
            );
            return Ok(Some(entry_name));
        }
        let mut existing =
            list_entries_with_prefix(destination, prefix, ListOptions::directories())?;
        sort_most_recent_first(&mut existing);
        let previous = existing.first().map(|e| e.name());
        create(source, &entry_path, previous.as_deref(), options)?;
    } else {
        rotate_directories(destination, prefix)?;
        let previous_name = format!("{}.1", prefix);
        let previous = destination
            .join(&previous_name)
            .is_dir()
            .then_some(previous_name);
        create(source, &entry_path, previous.as_deref(), options)?;
    }
    Ok(Some(entry_name))
}

/// Copy `source` into `entry_path`, hard-linking against the previous
/// generation when there is one.
fn create(
    source: &Path,
    entry_path: &Path,
    previous: Option<&str>,
    options: &BlobOptions,
) -> Result<()> {
    if !options.use_rsync {
        debug!("Copying {} to {}", source.display(), entry_path.display());
        let prefix = crate::blob::base_prefix(source)?;
        return copy_tree(source, &entry_path.join(prefix));
    }

    let mut args: Vec<String> = vec!["-a".to_string()];
    args.extend(options.rsync_options.iter().cloned());
    match previous {
        Some(previous) => {
            // Relative to the entry being written, the previous
            // generation is one level up.
            args.push("--delete".to_string());
            args.push(format!("--link-dest={}", Path::new("..").join(previous).display()));
        }
        None if options.hard_links_on_first_copy => {
            // Opt-in: hard-link the very first backup against the live
            // source tree itself. rsync resolves the link target per
            // transferred path (`<basename>/...`), so the target is the
            // source's parent directory, absolute.
            let parent = source
                .canonicalize()?
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/"));
            args.push(format!("--link-dest={}", parent.display()));
        }
        None => {}
    }
    args.push(source.display().to_string());
    args.push(entry_path.display().to_string());

    std::fs::create_dir_all(entry_path)?;
    cmd::run_silent("rsync", &args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::tool_available;
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    fn options(use_rsync: bool) -> BlobOptions {
        BlobOptions {
            full: false,
            keep: 0,
            keep_days: 0,
            use_rsync,
            rsync_options: Vec::new(),
            archive: false,
            compress: false,
            timestamps: true,
            incremental: false,
            hard_links_on_first_copy: false,
        }
    }

    fn utc(ymd: (i32, u32, u32)) -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(ymd.0, ymd.1, ymd.2, 1, 2, 3).unwrap()
    }

    #[test]
    fn test_backup_without_rsync_writes_nested_tree() -> Result<()> {
        let tmp = TempDir::new()?;
        let source = tmp.path().join("blobstorage");
        fs::create_dir_all(source.join("0x00"))?;
        fs::write(source.join("0x00/file.blob"), b"blob data")?;
        let backups = tmp.path().join("backups");
        fs::create_dir_all(&backups)?;

        let written = backup(
            &source,
            &backups,
            "blobstorage",
            None,
            &options(false),
            utc((2017, 1, 2)),
        )?;
        assert_eq!(written.as_deref(), Some("blobstorage.2017-01-02-01-02-03"));
        let payload = backups.join("blobstorage.2017-01-02-01-02-03/blobstorage/0x00/file.blob");
        assert_eq!(fs::read(payload)?, b"blob data");
        Ok(())
    }

    #[test]
    fn test_backup_existing_generation_is_noop() -> Result<()> {
        let tmp = TempDir::new()?;
        let source = tmp.path().join("blobstorage");
        fs::create_dir_all(&source)?;
        let backups = tmp.path().join("backups");
        fs::create_dir_all(backups.join("blobstorage.2017-01-02-01-02-03"))?;

        // Same generation already present: nothing is created.
        let written = backup(
            &source,
            &backups,
            "blobstorage",
            None,
            &options(false),
            utc((2017, 1, 2)),
        )?;
        assert_eq!(written.as_deref(), Some("blobstorage.2017-01-02-01-02-03"));
        assert!(!backups
            .join("blobstorage.2017-01-02-01-02-03/blobstorage")
            .exists());
        Ok(())
    }

    #[test]
    fn test_numbered_backup_rotates_first() -> Result<()> {
        let tmp = TempDir::new()?;
        let source = tmp.path().join("blobstorage");
        fs::create_dir_all(&source)?;
        fs::write(source.join("a.blob"), b"one")?;
        let backups = tmp.path().join("backups");
        fs::create_dir_all(backups.join("blobstorage.0/blobstorage"))?;

        let mut opts = options(false);
        opts.timestamps = false;
        backup(&source, &backups, "blobstorage", None, &opts, utc((2017, 1, 2)))?;

        assert!(backups.join("blobstorage.0/blobstorage/a.blob").exists());
        assert!(backups.join("blobstorage.1/blobstorage").exists());
        Ok(())
    }

    #[test]
    fn test_hard_link_reuse_between_generations() -> Result<()> {
        if !tool_available("rsync") {
            eprintln!("rsync not available, skipping");
            return Ok(());
        }
        let tmp = TempDir::new()?;
        let source = tmp.path().join("blobstorage");
        fs::create_dir_all(&source)?;
        fs::write(source.join("stable.blob"), b"unchanged")?;
        fs::write(source.join("volatile.blob"), b"version one")?;
        let backups = tmp.path().join("backups");
        fs::create_dir_all(&backups)?;

        backup(&source, &backups, "blobstorage", None, &options(true), utc((2017, 1, 2)))?;
        fs::write(source.join("volatile.blob"), b"version two")?;
        backup(&source, &backups, "blobstorage", None, &options(true), utc((2017, 1, 3)))?;

        let first = backups.join("blobstorage.2017-01-02-01-02-03/blobstorage");
        let second = backups.join("blobstorage.2017-01-03-01-02-03/blobstorage");
        let stable_a = fs::metadata(first.join("stable.blob"))?;
        let stable_b = fs::metadata(second.join("stable.blob"))?;
        assert_eq!(stable_a.ino(), stable_b.ino());

        let volatile_a = fs::metadata(first.join("volatile.blob"))?;
        let volatile_b = fs::metadata(second.join("volatile.blob"))?;
        assert_ne!(volatile_a.ino(), volatile_b.ino());
        assert_eq!(fs::read(second.join("volatile.blob"))?, b"version two");
        Ok(())
    }
}
