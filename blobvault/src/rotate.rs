//! Rotation of numbered backups.
//!
//! In the numbered scheme the newest backup is always `<prefix>.0`, so
//! before a new backup is written every existing entry shifts up by one.
//! Renames run highest-number-first; going the other way would clobber
//! (`.0` -> `.1` while `.1` still exists). Timestamped entries are never
//! rotated: their names are already unique.

use crate::entries::{list_entries_with_prefix, BackupEntry, ListOptions};
use crate::naming::Generation;
use crate::utils::Result;
use std::path::Path;
use tracing::info;

/// Shift every numbered directory `<prefix>.N` to `<prefix>.N+1`.
pub fn rotate_directories(dir: &Path, prefix: &str) -> Result<()> {
    let entries = list_entries_with_prefix(dir, prefix, ListOptions::directories())?;
    rotate(dir, prefix, entries)
}

/// Shift every numbered archive `<prefix>.N<suffix>` to
/// `<prefix>.N+1<suffix>`, keeping the suffix.
pub fn rotate_archives(dir: &Path, prefix: &str) -> Result<()> {
    let entries = list_entries_with_prefix(dir, prefix, ListOptions::archives_with_state())?;
    rotate(dir, prefix, entries)
}

fn rotate(dir: &Path, prefix: &str, entries: Vec<BackupEntry>) -> Result<()> {
    let mut numbered: Vec<(u64, BackupEntry)> = entries
        .into_iter()
        .filter_map(|entry| match entry.generation {
            Generation::Number(n) => Some((n, entry)),
            Generation::Timestamp(_) => None,
        })
        .collect();
    // Highest number first, to avoid rename collisions.
    numbered.sort_by(|a, b| b.0.cmp(&a.0));

    for (number, entry) in numbered {
        let name = entry.name();
        let (_, suffix) = crate::naming::strip_archive_suffix(&name);
        let new_name = format!("{}.{}{}", prefix, number + 1, suffix.unwrap_or_default());
        info!("Renaming {} to {}.", name, new_name);
        std::fs::rename(&entry.path, dir.join(new_name))?;
    }
    Ok(())
}
