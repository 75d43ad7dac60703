//! Error handling for cfgvault-store
//!
//! Wraps cfgvault-core CvError with store-specific helpers

use cfgvault_core::errors::{CvError, CvErrorKind, VaultError};

/// Result type alias using CvError
pub type Result<T> = std::result::Result<T, CvError>;

/// Create a migration error
pub fn migration_error(migration_id: &str, reason: &str) -> CvError {
    CvError::new(CvErrorKind::Persistence)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", migration_id, reason))
}

/// An already-applied migration no longer matches the embedded SQL
pub fn migration_checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> CvError {
    CvError::new(CvErrorKind::Integrity)
        .with_op("migration_checksum")
        .with_message(format!(
            "Checksum mismatch for migration {}: recorded {}, embedded {}",
            migration_id, expected, actual
        ))
}

/// Stored object bytes do not hash to the indexed checksum
pub fn integrity_mismatch(snapshot_id: &str, expected: &str, actual: &str) -> CvError {
    CvError::from(VaultError::ChecksumMismatch {
        snapshot_id: snapshot_id.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    })
    .with_op("read_snapshot")
}

/// Index entry without its object
pub fn object_missing(snapshot_id: &str) -> CvError {
    CvError::from(VaultError::ObjectMissing {
        snapshot_id: snapshot_id.to_string(),
    })
    .with_op("read_snapshot")
}

pub fn not_found(op: &str, entity_id: &str, what: &str) -> CvError {
    CvError::new(CvErrorKind::NotFound)
        .with_op(op.to_string())
        .with_entity_id(entity_id.to_string())
        .with_message(format!("{} not found", what))
}

/// A row holds a value the model cannot represent
pub fn corrupt_row(op: &str, detail: impl Into<String>) -> CvError {
    CvError::new(CvErrorKind::Serialization)
        .with_op(op.to_string())
        .with_message(detail)
}

/// Another thread panicked while holding a store lock
pub fn lock_poisoned(op: &str) -> CvError {
    CvError::new(CvErrorKind::Concurrency)
        .with_op(op.to_string())
        .with_message("store lock poisoned")
}

/// Create a database error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> CvError {
    CvError::new(CvErrorKind::Persistence)
        .with_op("sqlite")
        .with_message(err.to_string())
}

/// Create an IO error
pub fn io_error(operation: &str, err: std::io::Error) -> CvError {
    CvError::new(CvErrorKind::Io)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}
