//! Snapshot index writes

use crate::errors::{from_rusqlite, Result};
use crate::time::to_millis;
use cfgvault_core::errors::{CvError, CvErrorKind};
use cfgvault_core::Snapshot;
use cfgvault_core_types::DeviceId;
use rusqlite::{Connection, OptionalExtension, Transaction};

/// Where the next snapshot of a device goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadPosition {
    /// Sequence the next snapshot must take (1 for a new device)
    pub next_sequence: u64,
    /// Checksum of the current head, if any
    pub head_checksum: Option<String>,
}

/// Read the device's current head
pub fn head_position(conn: &Connection, device_id: &DeviceId) -> Result<HeadPosition> {
    let head: Option<(i64, String)> = conn
        .query_row(
            "SELECT sequence, checksum FROM snapshots
             WHERE device_id = ?1
             ORDER BY sequence DESC
             LIMIT 1",
            [device_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(from_rusqlite)?;

    Ok(match head {
        Some((sequence, checksum)) => HeadPosition {
            next_sequence: sequence as u64 + 1,
            head_checksum: Some(checksum),
        },
        None => HeadPosition {
            next_sequence: 1,
            head_checksum: None,
        },
    })
}

/// Insert the index row for a snapshot whose object is already on disk
///
/// # Errors
///
/// `Concurrency` when the (device, sequence) slot was taken in the meantime;
/// `Persistence` for any other database failure.
pub fn insert_snapshot(tx: &Transaction, snapshot: &Snapshot) -> Result<()> {
    tx.execute(
        "INSERT INTO snapshots (
            snapshot_id, device_id, sequence, collected_at, committed_at,
            checksum, size_bytes, duplicate, origin, object_key
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            snapshot.id.as_str(),
            snapshot.device_id.as_str(),
            snapshot.sequence as i64,
            to_millis(snapshot.collected_at),
            to_millis(snapshot.committed_at),
            snapshot.checksum,
            snapshot.size_bytes as i64,
            snapshot.duplicate,
            snapshot.origin.as_str(),
            snapshot.object_key,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            CvError::new(CvErrorKind::Concurrency)
                .with_op("insert_snapshot")
                .with_device_id(snapshot.device_id.as_str())
                .with_message(format!(
                    "sequence {} already taken or out of order: {}",
                    snapshot.sequence, e
                ))
        }
        other => from_rusqlite(other),
    })?;

    tracing::debug!(
        snapshot_id = %snapshot.id,
        device_id = %snapshot.device_id,
        sequence = snapshot.sequence,
        duplicate = snapshot.duplicate,
        "Inserted snapshot index row"
    );

    Ok(())
}
