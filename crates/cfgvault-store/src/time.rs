//! Timestamps are stored as Unix milliseconds

use chrono::{DateTime, TimeZone, Utc};

use crate::errors::{corrupt_row, Result};

pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(op: &str, ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| corrupt_row(op, format!("timestamp out of range: {}", ms)))
}
