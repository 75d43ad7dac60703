//! SHA-256 content checksums
//!
//! Checksums are lowercase hex. The same function is used at commit time and
//! on every read, so any drift between the two would surface as an integrity
//! failure.

use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// True when `s` has the shape of a checksum produced by `sha256_hex`
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
