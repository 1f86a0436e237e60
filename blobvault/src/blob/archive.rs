//! Archive-mode blob backups: one tar file per generation, optionally
//! gzip-compressed, optionally incremental.
//!
//! Incremental archives use tar's `--listed-incremental` snapshot-state
//! file. The state file is keyed by the timestamp of the most recent
//! *full* filestorage backup, not the most recent blob backup: a blob
//! delta is only restorable together with the database generation it was
//! taken against. The first archive written for a state file is the full
//! one; every later archive against the same state file is a `.delta.`.

use crate::blob::{target_generation, BlobOptions};
use crate::cmd;
use crate::filestorage;
use crate::naming::{gen_timestamp, Generation};
use crate::rotate::rotate_archives;
use crate::utils::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Create one archive-mode backup generation. Returns the name of the
/// entry the `latest` symlink should point at.
pub fn backup(
    source: &Path,
    destination: &Path,
    prefix: &str,
    fs_location: Option<&Path>,
    options: &BlobOptions,
    now: DateTime<Utc>,
) -> Result<Option<String>> {
    if !options.timestamps {
        // Numbered archives rotate exactly like numbered directories and
        // never do incrementals.
        rotate_archives(destination, prefix)?;
        let name = format!("{}.0{}", prefix, plain_suffix(options));
        create(source, &destination.join(&name), None)?;
        return Ok(Some(name));
    }

    let generation = target_generation(true, fs_location, now);
    let (name, snapshot_state) =
        archive_name(destination, prefix, &generation, fs_location, options, now)?;
    let archive_path = destination.join(&name);
    if archive_path.exists() {
        info!(
            "Blob archive {} already exists; no new backup needed.",
            archive_path.display()
        );
        return Ok(Some(name));
    }
    create(source, &archive_path, snapshot_state.as_deref())?;
    Ok(Some(name))
}

fn plain_suffix(options: &BlobOptions) -> &'static str {
    if options.compress {
        ".tar.gz"
    } else {
        ".tar"
    }
}

/// Work out the archive file name and, in incremental mode, the
/// snapshot-state file to record against.
fn archive_name(
    destination: &Path,
    prefix: &str,
    generation: &Generation,
    fs_location: Option<&Path>,
    options: &BlobOptions,
    now: DateTime<Utc>,
) -> Result<(String, Option<PathBuf>)> {
    if !options.incremental {
        return Ok((format!("{}.{}{}", prefix, generation, plain_suffix(options)), None));
    }

    let full_timestamp = match fs_location {
        Some(location) => filestorage::latest_full_timestamp(location)?,
        None => None,
    };
    let anchor = match full_timestamp {
        Some(ts) => ts,
        None if options.full => gen_timestamp(now),
        None => {
            // Without a full filestorage backup to anchor to, a delta
            // would be unrestoreable. Fall back to a plain full archive
            // and pick the chain up again at the next full backup cycle.
            warn!(
                "No full filestorage backup found to anchor incremental \
                 blob archives; making a full archive instead."
            );
            return Ok((
                format!("{}.{}{}", prefix, generation, plain_suffix(options)),
                None,
            ));
        }
    };

    let snapshot_state = destination.join(format!("{}.{}.snar", prefix, anchor));
    let delta = snapshot_state.exists();
    let infix = if delta { ".delta" } else { "" };
    let name = format!("{}.{}{}{}", prefix, generation, infix, plain_suffix(options));
    Ok((name, Some(snapshot_state)))
}

/// Run tar to archive the *contents* of `source`.
fn create(source: &Path, archive_path: &Path, snapshot_state: Option<&Path>) -> Result<()> {
    let compress = archive_path
        .extension()
        .is_some_and(|ext| ext == "gz");
    let mut args: Vec<String> = Vec::new();
    args.push(if compress { "czf" } else { "cf" }.to_string());
    args.push(archive_path.display().to_string());
    if let Some(state) = snapshot_state {
        args.push(format!("--listed-incremental={}", state.display()));
    }
    args.push("-C".to_string());
    args.push(source.display().to_string());
    args.push(".".to_string());
    cmd::run_silent("tar", &args)
}
