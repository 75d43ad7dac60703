//! Filesystem object store

use crate::errors::{io_error, Result};
use crate::objects::atomic::{atomic_write, remove_orphan};
use crate::objects::keying::key_path;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Object store rooted at the vault directory
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, key: &str) -> PathBuf {
        key_path(&self.root, key)
    }

    /// Write an object under `key`
    ///
    /// Callers only put keys that have no index entry yet, so a file already
    /// at that path is the orphan of an interrupted commit and is replaced.
    pub fn put(&self, key: &str, content: &[u8]) -> Result<()> {
        let path = self.path_of(key);
        if path.exists() {
            tracing::warn!(object_key = key, "Replacing orphan object from interrupted commit");
            remove_orphan(&path)?;
        }
        atomic_write(&path, content)
    }

    /// Read an object; `None` when the file does not exist
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_of(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read_object", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::object_key;
    use cfgvault_core_types::DeviceId;
    use tempfile::TempDir;

    #[test]
    fn test_put_get() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path());
        let key = object_key(&DeviceId::new("rtr-1"), 1);

        store.put(&key, b"interface Gi0/1\n").unwrap();

        assert_eq!(store.get(&key).unwrap().unwrap(), b"interface Gi0/1\n");
    }

    #[test]
    fn test_get_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path());
        let key = object_key(&DeviceId::new("rtr-1"), 99);

        assert!(store.get(&key).unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_orphan() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path());
        let key = object_key(&DeviceId::new("rtr-1"), 1);

        store.put(&key, b"from crashed commit").unwrap();
        store.put(&key, b"committed").unwrap();

        assert_eq!(store.get(&key).unwrap().unwrap(), b"committed");
    }
}
