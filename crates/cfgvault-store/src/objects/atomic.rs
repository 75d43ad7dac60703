//! Atomic write primitives
//!
//! Content goes to a uniquely named temp file in the target directory, is
//! fsynced, then renamed into place. A reader never sees a partial object.

use crate::errors::{io_error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
}

/// Atomically write bytes to `target_path` and mark the file read-only
pub fn atomic_write(target_path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error("create_object_dir", e))?;
    }

    let temp_path = temp_path_for(target_path);
    let written = write_synced(&temp_path, content);
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, target_path) {
        let _ = fs::remove_file(&temp_path);
        return Err(io_error("rename_object_temp", e));
    }

    sync_parent(target_path);
    Ok(())
}

fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| io_error("create_object_temp", e))?;
    file.write_all(content)
        .map_err(|e| io_error("write_object_temp", e))?;
    file.sync_all()
        .map_err(|e| io_error("sync_object_temp", e))?;

    let mut perms = file
        .metadata()
        .map_err(|e| io_error("stat_object_temp", e))?
        .permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms).map_err(|e| io_error("chmod_object_temp", e))?;
    Ok(())
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

/// Remove a file left behind by an interrupted commit
pub fn remove_orphan(path: &Path) -> Result<()> {
    if let Ok(meta) = fs::metadata(path) {
        let mut perms = meta.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(path, perms).map_err(|e| io_error("chmod_orphan", e))?;
    }
    fs::remove_file(path).map_err(|e| io_error("remove_orphan", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parent() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("a").join("b").join("1.cfg");

        atomic_write(&target, b"hostname sw1\n").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"hostname sw1\n");
    }

    #[test]
    fn test_written_object_is_read_only() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("1.cfg");

        atomic_write(&target, b"x").unwrap();

        assert!(fs::metadata(&target).unwrap().permissions().readonly());
    }

    #[test]
    fn test_no_tmp_files_after_write() {
        let temp_dir = TempDir::new().unwrap();
        atomic_write(&temp_dir.path().join("1.cfg"), b"clean").unwrap();

        let leftovers = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_remove_orphan_handles_read_only_file() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("1.cfg");
        atomic_write(&target, b"orphan").unwrap();

        remove_orphan(&target).unwrap();
        assert!(!target.exists());
    }
}
