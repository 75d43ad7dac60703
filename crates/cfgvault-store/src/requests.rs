//! Queued collection requests
//!
//! Written by the `collect` command or the management front-end, claimed by
//! the running engine. Claiming marks rows in the same transaction that
//! reads them, so each request is handed out once.

use crate::errors::{from_rusqlite, Result};
use crate::time::{from_millis, to_millis};
use cfgvault_core_types::DeviceId;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

/// One request for an immediate collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRequest {
    pub request_id: i64,
    /// `None` asks for every enabled device
    pub device_id: Option<DeviceId>,
    pub requested_at: DateTime<Utc>,
}

fn row_to_request(row: &Row<'_>) -> rusqlite::Result<(i64, Option<String>, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_request((request_id, device_id, requested_at): (i64, Option<String>, i64)) -> Result<CollectionRequest> {
    Ok(CollectionRequest {
        request_id,
        device_id: device_id.map(DeviceId::new),
        requested_at: from_millis("read_collection_request", requested_at)?,
    })
}

/// Queue a request and return its id
pub fn insert_request(
    conn: &Connection,
    device_id: Option<&DeviceId>,
    requested_at: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO collection_requests (device_id, requested_at) VALUES (?1, ?2)",
        rusqlite::params![device_id.map(|d| d.as_str()), to_millis(requested_at)],
    )
    .map_err(from_rusqlite)?;
    Ok(conn.last_insert_rowid())
}

/// Unclaimed requests, oldest first
pub fn pending_requests(conn: &Connection) -> Result<Vec<CollectionRequest>> {
    let mut stmt = conn
        .prepare(
            "SELECT request_id, device_id, requested_at FROM collection_requests
             WHERE claimed_at IS NULL ORDER BY request_id",
        )
        .map_err(from_rusqlite)?;
    let rows = stmt.query_map([], row_to_request).map_err(from_rusqlite)?;
    rows.map(|row| into_request(row.map_err(from_rusqlite)?))
        .collect()
}

/// Take every unclaimed request, marking it claimed at `now`
pub fn claim_requests(conn: &mut Connection, now: DateTime<Utc>) -> Result<Vec<CollectionRequest>> {
    let tx = conn.transaction().map_err(from_rusqlite)?;
    let requests = pending_requests(&tx)?;
    if let Some(last) = requests.last() {
        tx.execute(
            "UPDATE collection_requests SET claimed_at = ?1
             WHERE claimed_at IS NULL AND request_id <= ?2",
            rusqlite::params![to_millis(now), last.request_id],
        )
        .map_err(from_rusqlite)?;
    }
    tx.commit().map_err(from_rusqlite)?;
    Ok(requests)
}
