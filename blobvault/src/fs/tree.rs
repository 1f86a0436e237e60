//! Recursive tree copy used when rsync is disabled or unavailable.
//!
//! This is the plain-copy fallback: no hard links, no delta detection.
//! Symlinks are recreated as symlinks rather than followed, matching
//! what `rsync -a` would do.

use crate::utils::{Result, VaultError};
use std::path::Path;
use tracing::info;
use walkdir::WalkDir;

/// Copy the tree at `source` to `dest`. `dest` must not exist yet.
pub fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in WalkDir::new(source).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| VaultError::Command(format!("walk failed: {}", e)))?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Make sure a backup location exists, creating it (and parents) when
/// missing. A location that exists but is not a directory is a fatal
/// configuration error.
pub fn ensure_location(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(VaultError::Config(format!(
                "{} exists but is not a directory",
                path.display()
            )));
        }
        return Ok(());
    }
    std::fs::create_dir_all(path)?;
    info!("Created {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_copy_tree_copies_files_and_subdirs() -> Result<()> {
        let tmp = TempDir::new()?;
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("sub"))?;
        fs::write(src.join("a.txt"), b"alpha")?;
        fs::write(src.join("sub/b.txt"), b"beta")?;

        let dst = tmp.path().join("dst");
        copy_tree(&src, &dst)?;

        assert_eq!(fs::read(dst.join("a.txt"))?, b"alpha");
        assert_eq!(fs::read(dst.join("sub/b.txt"))?, b"beta");
        Ok(())
    }

    #[test]
    fn test_copy_tree_preserves_symlinks() -> Result<()> {
        let tmp = TempDir::new()?;
        let src = tmp.path().join("src");
        fs::create_dir_all(&src)?;
        fs::write(src.join("real.txt"), b"data")?;
        std::os::unix::fs::symlink("real.txt", src.join("link.txt"))?;

        let dst = tmp.path().join("dst");
        copy_tree(&src, &dst)?;

        let meta = fs::symlink_metadata(dst.join("link.txt"))?;
        assert!(meta.file_type().is_symlink());
        assert_eq!(fs::read(dst.join("link.txt"))?, b"data");
        Ok(())
    }

    #[test]
    fn test_ensure_location_creates_nested_dirs() -> Result<()> {
        let tmp = TempDir::new()?;
        let nested = tmp.path().join("a/b/c");
        ensure_location(&nested)?;
        assert!(nested.is_dir());
        // Second call is a no-op.
        ensure_location(&nested)?;
        Ok(())
    }

    #[test]
    fn test_ensure_location_rejects_files() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = tmp.path().join("occupied");
        fs::write(&file, b"x")?;
        assert!(matches!(ensure_location(&file), Err(VaultError::Config(_))));
        Ok(())
    }
}
