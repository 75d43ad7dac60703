//! Read-only snapshot index queries

use crate::errors::{corrupt_row, from_rusqlite, not_found, Result};
use crate::time::from_millis;
use cfgvault_core::{Snapshot, SnapshotOrigin};
use cfgvault_core_types::{DeviceId, SnapshotId};
use rusqlite::{Connection, OptionalExtension, Row};

const SNAPSHOT_COLUMNS: &str = "snapshot_id, device_id, sequence, collected_at, committed_at,
     checksum, size_bytes, duplicate, origin, object_key";

/// A raw row from the `snapshots` table
struct SnapshotRow {
    snapshot_id: String,
    device_id: String,
    sequence: i64,
    collected_at: i64,
    committed_at: i64,
    checksum: String,
    size_bytes: i64,
    duplicate: bool,
    origin: String,
    object_key: String,
}

fn row_to_snapshot_row(row: &Row<'_>) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        snapshot_id: row.get(0)?,
        device_id: row.get(1)?,
        sequence: row.get(2)?,
        collected_at: row.get(3)?,
        committed_at: row.get(4)?,
        checksum: row.get(5)?,
        size_bytes: row.get(6)?,
        duplicate: row.get(7)?,
        origin: row.get(8)?,
        object_key: row.get(9)?,
    })
}

impl SnapshotRow {
    fn into_snapshot(self) -> Result<Snapshot> {
        let origin = SnapshotOrigin::parse(&self.origin)
            .ok_or_else(|| corrupt_row("read_snapshot_row", format!("origin '{}'", self.origin)))?;
        Ok(Snapshot {
            id: SnapshotId::from_string(self.snapshot_id),
            device_id: DeviceId::new(self.device_id),
            sequence: self.sequence as u64,
            collected_at: from_millis("read_snapshot_row", self.collected_at)?,
            committed_at: from_millis("read_snapshot_row", self.committed_at)?,
            checksum: self.checksum,
            size_bytes: self.size_bytes as u64,
            duplicate: self.duplicate,
            origin,
            object_key: self.object_key,
        })
    }
}

fn collect_snapshots(
    rows: impl Iterator<Item = rusqlite::Result<SnapshotRow>>,
) -> Result<Vec<Snapshot>> {
    rows.map(|row| row.map_err(from_rusqlite)?.into_snapshot())
        .collect()
}

/// Fetch one snapshot's metadata
///
/// # Errors
///
/// - `NotFound` when no row has this id
/// - `Persistence` when the query fails
pub fn fetch_snapshot(conn: &Connection, snapshot_id: &SnapshotId) -> Result<Snapshot> {
    conn.query_row(
        &format!("SELECT {} FROM snapshots WHERE snapshot_id = ?1", SNAPSHOT_COLUMNS),
        [snapshot_id.as_str()],
        row_to_snapshot_row,
    )
    .optional()
    .map_err(from_rusqlite)?
    .ok_or_else(|| not_found("fetch_snapshot", snapshot_id.as_str(), "snapshot"))?
    .into_snapshot()
}

/// Snapshots of one device with `sequence > after`, ascending
///
/// `after = 0` starts from the beginning; `limit = None` returns the rest.
pub fn list_snapshots(
    conn: &Connection,
    device_id: &DeviceId,
    after: u64,
    limit: Option<u32>,
) -> Result<Vec<Snapshot>> {
    let limit = limit.map(i64::from).unwrap_or(-1);
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM snapshots
             WHERE device_id = ?1 AND sequence > ?2
             ORDER BY sequence ASC
             LIMIT ?3",
            SNAPSHOT_COLUMNS
        ))
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map(
            rusqlite::params![device_id.as_str(), after as i64, limit],
            row_to_snapshot_row,
        )
        .map_err(from_rusqlite)?;
    collect_snapshots(rows)
}

/// Latest snapshot of a device
pub fn head_snapshot(conn: &Connection, device_id: &DeviceId) -> Result<Option<Snapshot>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM snapshots WHERE device_id = ?1 ORDER BY sequence DESC LIMIT 1",
            SNAPSHOT_COLUMNS
        ),
        [device_id.as_str()],
        row_to_snapshot_row,
    )
    .optional()
    .map_err(from_rusqlite)?
    .map(SnapshotRow::into_snapshot)
    .transpose()
}

/// Per-device archive overview
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSummary {
    pub device_id: DeviceId,
    pub snapshot_count: u64,
    pub head_sequence: u64,
    pub last_committed_at: chrono::DateTime<chrono::Utc>,
}

/// Every device that has at least one snapshot, ordered by device id
pub fn device_summaries(conn: &Connection) -> Result<Vec<DeviceSummary>> {
    let mut stmt = conn
        .prepare(
            "SELECT device_id, COUNT(*), MAX(sequence), MAX(committed_at)
             FROM snapshots
             GROUP BY device_id
             ORDER BY device_id",
        )
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .map_err(from_rusqlite)?;

    rows.map(|row| {
        let (device_id, count, head, last) = row.map_err(from_rusqlite)?;
        Ok(DeviceSummary {
            device_id: DeviceId::new(device_id),
            snapshot_count: count as u64,
            head_sequence: head as u64,
            last_committed_at: from_millis("device_summaries", last)?,
        })
    })
    .collect()
}
