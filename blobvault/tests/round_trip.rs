//! End-to-end backup/restore round trips through the public API.
//!
//! Tests that need rsync or tar probe for the tool first and skip
//! themselves when it is not installed.

use blobvault::blob::{self, BlobOptions};
use blobvault::cmd::tool_available;
use blobvault::config::BackupMode;
use blobvault::{runner, Settings};
use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Relative path -> contents, for byte-for-byte tree comparison.
fn tree_contents(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut contents = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .into_owned();
            contents.insert(relative, fs::read(entry.path()).unwrap());
        }
    }
    contents
}

fn options() -> BlobOptions {
    BlobOptions {
        full: false,
        keep: 0,
        keep_days: 0,
        use_rsync: true,
        rsync_options: Vec::new(),
        archive: false,
        compress: false,
        timestamps: true,
        incremental: false,
        hard_links_on_first_copy: false,
    }
}

#[test]
fn directory_mode_round_trip_with_rsync() {
    if !tool_available("rsync") {
        eprintln!("rsync not available, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let blobdir = tmp.path().join("blobstorage");
    let backups = tmp.path().join("backups");
    fs::create_dir_all(blobdir.join("0x01")).unwrap();
    fs::create_dir_all(&backups).unwrap();
    fs::write(blobdir.join("0x01/one.blob"), b"first").unwrap();
    fs::write(blobdir.join("two.blob"), b"second").unwrap();

    let t1 = Utc.with_ymd_and_hms(2017, 1, 2, 3, 4, 5).unwrap();
    blob::backup_blobs(&blobdir, &backups, None, &options(), t1).unwrap();
    let state_t1 = tree_contents(&blobdir);

    // Change, add, and delete something, then take a second backup.
    fs::write(blobdir.join("two.blob"), b"second, edited").unwrap();
    fs::write(blobdir.join("three.blob"), b"third").unwrap();
    fs::remove_file(blobdir.join("0x01/one.blob")).unwrap();
    let t2 = Utc.with_ymd_and_hms(2017, 1, 3, 3, 4, 5).unwrap();
    blob::backup_blobs(&blobdir, &backups, None, &options(), t2).unwrap();
    let state_t2 = tree_contents(&blobdir);

    // The latest symlink follows the newest generation.
    let latest = fs::read_link(backups.join("latest")).unwrap();
    assert_eq!(latest, Path::new("blobstorage.2017-01-03-03-04-05"));

    // Restore the most recent backup over a wrecked tree.
    fs::remove_dir_all(&blobdir).unwrap();
    fs::create_dir_all(&blobdir).unwrap();
    fs::write(blobdir.join("garbage.blob"), b"stale").unwrap();
    blob::restore_blobs(&backups, &blobdir, &options(), None, false).unwrap();
    assert_eq!(tree_contents(&blobdir), state_t2);

    // Restore the state as of a date between the two backups.
    blob::restore_blobs(&backups, &blobdir, &options(), Some("2017-01-02-12"), false).unwrap();
    assert_eq!(tree_contents(&blobdir), state_t1);
}

#[test]
fn archive_mode_incremental_chain_round_trip() {
    if !tool_available("tar") {
        eprintln!("tar not available, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let blobdir = tmp.path().join("blobstorage");
    let backups = tmp.path().join("archives");
    let fs_backups = tmp.path().join("fsbackups");
    fs::create_dir_all(&blobdir).unwrap();
    fs::create_dir_all(&backups).unwrap();
    fs::create_dir_all(&fs_backups).unwrap();

    fs::write(blobdir.join("keep.blob"), b"stays the same").unwrap();
    fs::write(blobdir.join("edit.blob"), b"before").unwrap();
    fs::write(blobdir.join("drop.blob"), b"doomed").unwrap();

    let mut opts = options();
    opts.archive = true;
    opts.incremental = true;

    // A full filestorage backup anchors the chain.
    fs::write(fs_backups.join("2017-01-01-00-00-00.fs"), b"full").unwrap();
    let t1 = Utc.with_ymd_and_hms(2017, 1, 1, 6, 0, 0).unwrap();
    blob::backup_blobs(&blobdir, &backups, Some(&fs_backups), &opts, t1).unwrap();
    assert!(backups.join("blobstorage.2017-01-01-00-00-00.tar").is_file());
    assert!(backups.join("blobstorage.2017-01-01-00-00-00.snar").is_file());

    // Mutate the tree; an incremental filestorage backup happens, and
    // the next blob archive is a delta against the same state file.
    fs::write(blobdir.join("edit.blob"), b"after").unwrap();
    fs::write(blobdir.join("new.blob"), b"fresh").unwrap();
    fs::remove_file(blobdir.join("drop.blob")).unwrap();
    let expected = tree_contents(&blobdir);

    fs::write(fs_backups.join("2017-01-02-00-00-00.deltafs"), b"delta").unwrap();
    let t2 = Utc.with_ymd_and_hms(2017, 1, 2, 6, 0, 0).unwrap();
    blob::backup_blobs(&blobdir, &backups, Some(&fs_backups), &opts, t2).unwrap();
    assert!(backups
        .join("blobstorage.2017-01-02-00-00-00.delta.tar")
        .is_file());

    // Restoring layers the delta over the full archive and reproduces
    // the mutated tree, including the deletion.
    fs::remove_dir_all(&blobdir).unwrap();
    blob::restore_blobs(&backups, &blobdir, &opts, None, false).unwrap();
    assert_eq!(tree_contents(&blobdir), expected);
}

#[test]
fn numbered_mode_rotates_and_prunes() {
    let tmp = TempDir::new().unwrap();
    let blobdir = tmp.path().join("blobstorage");
    let backups = tmp.path().join("backups");
    fs::create_dir_all(&blobdir).unwrap();
    fs::create_dir_all(&backups).unwrap();

    let mut opts = options();
    opts.use_rsync = false;
    opts.timestamps = false;
    opts.keep = 2;

    let now = Utc.with_ymd_and_hms(2017, 1, 2, 3, 4, 5).unwrap();
    for round in 0..3u8 {
        fs::write(blobdir.join("counter.blob"), [round]).unwrap();
        blob::backup_blobs(&blobdir, &backups, None, &opts, now).unwrap();
    }

    // Three rounds with keep=2: the oldest generation was pruned.
    assert_eq!(
        fs::read(backups.join("blobstorage.0/blobstorage/counter.blob")).unwrap(),
        [2]
    );
    assert_eq!(
        fs::read(backups.join("blobstorage.1/blobstorage/counter.blob")).unwrap(),
        [1]
    );
    assert!(!backups.join("blobstorage.2").exists());
}

#[test]
fn full_backup_run_through_config() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let content = format!(
        r#"
            only_blobs = true
            use_rsync = false
            blob_timestamps = true
            keep = 1

            [[storages]]
            name = "1"
            datafs = "{root}/var/filestorage/Data.fs"
            blobdir = "{root}/var/blobstorage"
            backup_location = "{root}/var/backups"
            blob_backup_location = "{root}/var/blobstoragebackups"
        "#,
        root = root.display()
    );
    let config_path = root.join("blobvault.toml");
    fs::write(&config_path, content).unwrap();
    let settings = Settings::from_file(&config_path).unwrap();

    let blobdir = root.join("var/blobstorage");
    fs::create_dir_all(&blobdir).unwrap();
    fs::write(blobdir.join("a.blob"), b"payload").unwrap();

    let t1 = Utc.with_ymd_and_hms(2017, 1, 2, 3, 4, 5).unwrap();
    runner::backup_all(&settings, BackupMode::Standard, t1).unwrap();
    let t2 = Utc.with_ymd_and_hms(2017, 1, 3, 3, 4, 5).unwrap();
    runner::backup_all(&settings, BackupMode::Standard, t2).unwrap();

    // keep = 1: only the second generation survives.
    let location = root.join("var/blobstoragebackups");
    assert!(!location.join("blobstorage.2017-01-02-03-04-05").exists());
    assert!(location
        .join("blobstorage.2017-01-03-03-04-05/blobstorage/a.blob")
        .exists());
}
