//! Enumeration of backup entries in a destination directory.
//!
//! The directory listing is the source of truth: there is no persisted
//! index. Every invocation re-discovers entries here and classifies them
//! once into a tagged [`BackupEntry`]; the rest of the engine works off
//! the tag instead of re-deriving types from name shapes.

use crate::naming::{parse_backup_name, Generation};
use crate::utils::{Result, VaultError};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// What kind of backup unit an entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A hard-linked snapshot tree.
    Directory,
    /// A full tar archive (`.tar` / `.tar.gz`).
    FullArchive,
    /// An incremental tar archive (`.delta.tar` / `.delta.tar.gz`).
    DeltaArchive,
    /// A `--listed-incremental` snapshot-state file (`.snar`).
    SnapshotState,
}

/// One discovered backup unit.
#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub prefix: String,
    pub generation: Generation,
    pub kind: EntryKind,
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl BackupEntry {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Timestamp string used when comparing against filestorage backups:
    /// the entry's own timestamp, or one derived from its modification
    /// time for numbered entries.
    pub fn normalized_timestamp(&self) -> String {
        self.generation.normalized_timestamp(self.modified)
    }
}

/// What to list in a destination directory.
#[derive(Debug, Clone, Copy)]
pub struct ListOptions {
    /// Recognize archive suffixes. Directory entries are still returned:
    /// a history can contain both (a storage migrated between modes).
    pub archives: bool,
    /// Include `.snar` snapshot-state files (cleanup wants them; restore
    /// source selection never does).
    pub snapshot_state: bool,
}

impl ListOptions {
    pub fn directories() -> Self {
        Self { archives: false, snapshot_state: false }
    }

    pub fn archives() -> Self {
        Self { archives: true, snapshot_state: false }
    }

    pub fn archives_with_state() -> Self {
        Self { archives: true, snapshot_state: true }
    }
}

/// List the backup entries directly inside `dir`.
///
/// All accepted entries must share a single prefix; a second prefix is a
/// fatal error, as is an accepted name of the wrong filesystem type.
/// Unrelated names (including the `latest` symlink) are skipped.
pub fn list_entries(dir: &Path, options: ListOptions) -> Result<Vec<BackupEntry>> {
    let mut entries = Vec::new();
    let mut prefix: Option<String> = None;

    for dirent in std::fs::read_dir(dir)? {
        let dirent = dirent?;
        let name = dirent.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(parsed) = parse_backup_name(name, None, options.archives) else {
            debug!("Ignoring {} in {}", name, dir.display());
            continue;
        };

        // Classify before the prefix check so that a wrong-type entry is
        // reported as such even in an otherwise empty directory.
        let file_type = dirent.file_type()?;
        let kind = match parsed.suffix {
            None => {
                if !file_type.is_dir() {
                    return Err(VaultError::WrongEntryType { path: dirent.path() });
                }
                EntryKind::Directory
            }
            Some(suffix) => {
                if !file_type.is_file() {
                    return Err(VaultError::WrongEntryType { path: dirent.path() });
                }
                if parsed.is_snapshot_state() {
                    EntryKind::SnapshotState
                } else if suffix.starts_with(".delta.") {
                    EntryKind::DeltaArchive
                } else {
                    EntryKind::FullArchive
                }
            }
        };

        match &prefix {
            None => prefix = Some(parsed.prefix.clone()),
            Some(first) if *first != parsed.prefix => {
                return Err(VaultError::MixedPrefixes {
                    dir: dir.to_path_buf(),
                    first: first.clone(),
                    second: parsed.prefix,
                });
            }
            Some(_) => {}
        }

        if kind == EntryKind::SnapshotState && !options.snapshot_state {
            continue;
        }

        let modified = dirent.metadata()?.modified()?;
        entries.push(BackupEntry {
            prefix: parsed.prefix,
            generation: parsed.generation,
            kind,
            path: dirent.path(),
            modified,
        });
    }

    Ok(entries)
}

/// List entries and verify they carry the expected prefix. Entries under
/// a different prefix would make rotation and retention unsafe.
pub fn list_entries_with_prefix(
    dir: &Path,
    expected_prefix: &str,
    options: ListOptions,
) -> Result<Vec<BackupEntry>> {
    let entries = list_entries(dir, options)?;
    if let Some(entry) = entries.first() {
        if entry.prefix != expected_prefix {
            return Err(VaultError::MixedPrefixes {
                dir: dir.to_path_buf(),
                first: expected_prefix.to_string(),
                second: entry.prefix.clone(),
            });
        }
    }
    Ok(entries)
}

/// Sort entries most-recent-first by generation.
///
/// The generation order is authoritative. As a diagnostic for clock skew
/// or manual tampering, a disagreement with modification-time order is
/// logged as a warning, never an error.
pub fn sort_most_recent_first(entries: &mut [BackupEntry]) {
    entries.sort_by(|a, b| {
        b.generation
            .cmp(&a.generation)
            .then_with(|| b.modified.cmp(&a.modified))
    });
    if entries.windows(2).any(|w| w[0].modified < w[1].modified) {
        warn!(
            "Backup order by name disagrees with modification times; \
             trusting the names. Were backups restored or copied by hand?"
        );
    }
}

/// One retention unit: a full archive with its snapshot-state file and
/// dependent deltas, or a single directory entry.
#[derive(Debug)]
pub struct BackupGroup {
    pub entries: Vec<BackupEntry>,
}

impl BackupGroup {
    pub fn newest_modified(&self) -> SystemTime {
        self.entries
            .iter()
            .map(|e| e.modified)
            .max()
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }

    pub fn newest_generation(&self) -> Option<&Generation> {
        self.entries.iter().map(|e| &e.generation).max()
    }

    fn has_full(&self) -> bool {
        self.entries.iter().any(|e| e.kind == EntryKind::FullArchive)
    }

    fn has_snapshot_state(&self) -> bool {
        self.entries.iter().any(|e| e.kind == EntryKind::SnapshotState)
    }

    fn has_delta(&self) -> bool {
        self.entries.iter().any(|e| e.kind == EntryKind::DeltaArchive)
    }
}

/// Group entries (already sorted most-recent-first) into retention units.
///
/// Scanning newest-first, a full tar, its snapshot-state file, and the
/// deltas created after it form one group: deleting the full tar without
/// its dependent deltas would leave unrestoreable files behind. A delta
/// that lands next to an already complete group belongs to the next
/// (older) generation; a delta with no full tar at all ends up isolated
/// in its own group, which is warned about but tolerated.
pub fn combine_into_groups(entries: Vec<BackupEntry>) -> Vec<BackupGroup> {
    let mut groups: Vec<BackupGroup> = Vec::new();
    let mut current = BackupGroup { entries: Vec::new() };

    for entry in entries {
        let start_new = match entry.kind {
            EntryKind::Directory => !current.entries.is_empty(),
            EntryKind::DeltaArchive => current.has_full() || current.has_snapshot_state(),
            EntryKind::FullArchive | EntryKind::SnapshotState => {
                current.has_full() && current.has_snapshot_state()
            }
        };
        if start_new || current.entries.iter().any(|e| e.kind == EntryKind::Directory) {
            if !current.entries.is_empty() {
                groups.push(current);
            }
            current = BackupGroup { entries: Vec::new() };
        }
        current.entries.push(entry);
    }
    if !current.entries.is_empty() {
        groups.push(current);
    }

    for group in &groups {
        if group.has_delta() && !group.has_full() {
            warn!(
                "Incremental archive {} has no matching full archive; \
                 treating it as a backup of its own",
                group.entries[0].path.display()
            );
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(entries: &[BackupEntry]) -> Vec<String> {
        entries.iter().map(|e| e.name()).collect()
    }

    #[test]
    fn test_list_directories_skips_unrelated_names() -> Result<()> {
        let tmp = TempDir::new()?;
        fs::create_dir(tmp.path().join("blob.0"))?;
        fs::create_dir(tmp.path().join("blob.1"))?;
        fs::create_dir(tmp.path().join("not-a-backup"))?;
        fs::write(tmp.path().join("README.txt"), b"hello")?;

        let entries = list_entries(tmp.path(), ListOptions::directories())?;
        let mut found = names(&entries);
        found.sort();
        assert_eq!(found, vec!["blob.0", "blob.1"]);
        Ok(())
    }

    #[test]
    fn test_list_rejects_wrong_entry_type() -> Result<()> {
        let tmp = TempDir::new()?;
        fs::create_dir(tmp.path().join("blob.0"))?;
        // A file named like a rotation-eligible directory.
        fs::write(tmp.path().join("blob.1"), b"surprise")?;

        let result = list_entries(tmp.path(), ListOptions::directories());
        assert!(matches!(result, Err(VaultError::WrongEntryType { .. })));
        Ok(())
    }

    #[test]
    fn test_list_rejects_mixed_prefixes() -> Result<()> {
        let tmp = TempDir::new()?;
        fs::create_dir(tmp.path().join("blob.3"))?;
        fs::create_dir(tmp.path().join("other.4"))?;

        let result = list_entries(tmp.path(), ListOptions::directories());
        assert!(matches!(result, Err(VaultError::MixedPrefixes { .. })));
        Ok(())
    }

    #[test]
    fn test_list_with_expected_prefix_rejects_foreign_entries() -> Result<()> {
        let tmp = TempDir::new()?;
        fs::create_dir(tmp.path().join("other.4"))?;

        let result = list_entries_with_prefix(tmp.path(), "blob", ListOptions::directories());
        assert!(matches!(result, Err(VaultError::MixedPrefixes { .. })));
        Ok(())
    }

    #[test]
    fn test_list_archives_classifies_kinds() -> Result<()> {
        let tmp = TempDir::new()?;
        fs::write(tmp.path().join("blob.2017-01-02-03-04-05.tar.gz"), b"full")?;
        fs::write(tmp.path().join("blob.2017-01-03-03-04-05.delta.tar.gz"), b"delta")?;
        fs::write(tmp.path().join("blob.2017-01-02-03-04-05.snar"), b"state")?;

        let without_state = list_entries(tmp.path(), ListOptions::archives())?;
        assert_eq!(without_state.len(), 2);
        assert!(without_state.iter().all(|e| e.kind != EntryKind::SnapshotState));

        let with_state = list_entries(tmp.path(), ListOptions::archives_with_state())?;
        assert_eq!(with_state.len(), 3);
        assert!(with_state.iter().any(|e| e.kind == EntryKind::SnapshotState));
        Ok(())
    }

    #[test]
    fn test_sort_most_recent_first_mixed() -> Result<()> {
        let tmp = TempDir::new()?;
        for name in ["blob.0", "blob.2", "blob.1999-12-31-23-59-30", "blob.2017-01-02-03-04-05"] {
            fs::create_dir(tmp.path().join(name))?;
        }
        let mut entries = list_entries(tmp.path(), ListOptions::directories())?;
        sort_most_recent_first(&mut entries);
        assert_eq!(
            names(&entries),
            vec![
                "blob.2017-01-02-03-04-05",
                "blob.1999-12-31-23-59-30",
                "blob.0",
                "blob.2",
            ]
        );
        Ok(())
    }

    fn fake_entry(name: &str, kind: EntryKind) -> BackupEntry {
        let parsed = parse_backup_name(name, None, true).unwrap();
        BackupEntry {
            prefix: parsed.prefix,
            generation: parsed.generation,
            kind,
            path: PathBuf::from(name),
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_combine_full_snar_and_deltas() {
        // Newest first: two deltas depend on the most recent full, one
        // delta on the older full.
        let entries = vec![
            fake_entry("blob.2017-01-04-00-00-00.delta.tar", EntryKind::DeltaArchive),
            fake_entry("blob.2017-01-03-00-00-00.delta.tar", EntryKind::DeltaArchive),
            fake_entry("blob.2017-01-02-00-00-00.tar", EntryKind::FullArchive),
            fake_entry("blob.2017-01-02-00-00-00.snar", EntryKind::SnapshotState),
            fake_entry("blob.2017-01-01-12-00-00.delta.tar", EntryKind::DeltaArchive),
            fake_entry("blob.2017-01-01-00-00-00.tar", EntryKind::FullArchive),
            fake_entry("blob.2017-01-01-00-00-00.snar", EntryKind::SnapshotState),
        ];
        let groups = combine_into_groups(entries);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].entries.len(), 4);
        assert_eq!(groups[1].entries.len(), 3);
    }

    #[test]
    fn test_combine_directories_are_their_own_groups() {
        let entries = vec![
            fake_entry("blob.2017-01-02-00-00-00.tar", EntryKind::FullArchive),
            fake_entry("blob.2017-01-01-00-00-00", EntryKind::Directory),
            fake_entry("blob.2016-12-31-00-00-00", EntryKind::Directory),
        ];
        let groups = combine_into_groups(entries);
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn test_combine_lone_delta_is_isolated() {
        let entries = vec![
            fake_entry("blob.2017-01-02-00-00-00.tar", EntryKind::FullArchive),
            fake_entry("blob.2017-01-02-00-00-00.snar", EntryKind::SnapshotState),
            fake_entry("blob.2017-01-01-00-00-00.delta.tar", EntryKind::DeltaArchive),
        ];
        let groups = combine_into_groups(entries);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].entries.len(), 1);
        assert_eq!(groups[1].entries[0].kind, EntryKind::DeltaArchive);
    }
}
