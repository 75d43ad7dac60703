//! Object keys
//!
//! Device ids are free-form, so the directory name is the SHA-256 of the id.
//! The first two hex characters shard the tree.

use cfgvault_core::checksum::sha256_hex;
use cfgvault_core_types::DeviceId;
use std::path::{Path, PathBuf};

pub const OBJECTS_DIR: &str = "objects";
pub const OBJECT_EXTENSION: &str = "cfg";

/// Relative key for a device's `sequence`-th snapshot
///
/// Sequences are zero-padded so a directory listing sorts in commit order.
pub fn object_key(device_id: &DeviceId, sequence: u64) -> String {
    let device_digest = sha256_hex(device_id.as_str().as_bytes());
    let shard = &device_digest[..2];
    format!(
        "{}/{}/{}/{:010}.{}",
        OBJECTS_DIR, shard, device_digest, sequence, OBJECT_EXTENSION
    )
}

/// Resolve a key below the store root
pub fn key_path(root: &Path, key: &str) -> PathBuf {
    key.split('/').fold(root.to_path_buf(), |path, part| path.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let key = object_key(&DeviceId::new("OLT-CORE-01"), 7);
        let parts: Vec<&str> = key.split('/').collect();

        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "objects");
        assert_eq!(parts[1].len(), 2);
        assert!(parts[2].starts_with(parts[1]));
        assert_eq!(parts[3], "0000000007.cfg");
    }

    #[test]
    fn test_unsafe_device_ids_stay_inside_root() {
        let key = object_key(&DeviceId::new("../../etc/passwd"), 1);
        let path = key_path(Path::new("/vault"), &key);
        assert!(path.starts_with("/vault/objects"));
        assert!(!key.contains(".."));
    }

    #[test]
    fn test_distinct_devices_get_distinct_directories() {
        let a = object_key(&DeviceId::new("sw-a"), 1);
        let b = object_key(&DeviceId::new("sw-b"), 1);
        assert_ne!(a, b);
    }
}
