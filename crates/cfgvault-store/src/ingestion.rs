//! Ingestion records

use crate::errors::{corrupt_row, from_rusqlite, Result};
use crate::time::{from_millis, to_millis};
use cfgvault_core::{IngestionRecord, IngestionState};
use cfgvault_core_types::{IngestionId, SnapshotId};
use rusqlite::{Connection, Row};

struct IngestionRow {
    ingestion_id: String,
    source_group: String,
    source_id: String,
    file_name: String,
    expected_name: String,
    received_at: i64,
    state: String,
    detail: Option<String>,
    snapshot_id: Option<String>,
}

fn row_to_ingestion_row(row: &Row<'_>) -> rusqlite::Result<IngestionRow> {
    Ok(IngestionRow {
        ingestion_id: row.get(0)?,
        source_group: row.get(1)?,
        source_id: row.get(2)?,
        file_name: row.get(3)?,
        expected_name: row.get(4)?,
        received_at: row.get(5)?,
        state: row.get(6)?,
        detail: row.get(7)?,
        snapshot_id: row.get(8)?,
    })
}

impl IngestionRow {
    fn into_record(self) -> Result<IngestionRecord> {
        let state = IngestionState::parse(&self.state).ok_or_else(|| {
            corrupt_row("read_ingestion_row", format!("state '{}'", self.state))
        })?;
        Ok(IngestionRecord {
            id: IngestionId::from_string(self.ingestion_id),
            group: self.source_group,
            source_id: self.source_id,
            file_name: self.file_name,
            expected_name: self.expected_name,
            received_at: from_millis("read_ingestion_row", self.received_at)?,
            state,
            detail: self.detail,
            snapshot_id: self.snapshot_id.map(SnapshotId::from_string),
        })
    }
}

pub fn insert_record(conn: &Connection, record: &IngestionRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO ingestion_records (
            ingestion_id, source_group, source_id, file_name, expected_name,
            received_at, state, detail, snapshot_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            record.id.as_str(),
            record.group,
            record.source_id,
            record.file_name,
            record.expected_name,
            to_millis(record.received_at),
            record.state.as_str(),
            record.detail,
            record.snapshot_id.as_ref().map(|s| s.as_str()),
        ],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}

/// Newest records first, optionally for a single source
pub fn list_records(
    conn: &Connection,
    source_id: Option<&str>,
    limit: u32,
) -> Result<Vec<IngestionRecord>> {
    let mut stmt = conn
        .prepare(
            "SELECT ingestion_id, source_group, source_id, file_name, expected_name,
                    received_at, state, detail, snapshot_id
             FROM ingestion_records
             WHERE ?1 IS NULL OR source_id = ?1
             ORDER BY received_at DESC, ingestion_id DESC
             LIMIT ?2",
        )
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map(
            rusqlite::params![source_id, i64::from(limit)],
            row_to_ingestion_row,
        )
        .map_err(from_rusqlite)?;
    rows.map(|row| row.map_err(from_rusqlite)?.into_record())
        .collect()
}
