//! Operator-facing audit trail
//!
//! Append-only. Integrity failures, rejected or incomplete uploads and
//! notable job events land here in addition to the structured log.

use crate::errors::{corrupt_row, from_rusqlite, Result};
use crate::time::{from_millis, to_millis};
use cfgvault_core_types::schema::{AUDIT_INGESTION, AUDIT_INTEGRITY, AUDIT_JOB};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    Integrity,
    Ingestion,
    Job,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::Integrity => AUDIT_INTEGRITY,
            AuditCategory::Ingestion => AUDIT_INGESTION,
            AuditCategory::Job => AUDIT_JOB,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            AUDIT_INTEGRITY => Some(AuditCategory::Integrity),
            AUDIT_INGESTION => Some(AuditCategory::Ingestion),
            AUDIT_JOB => Some(AuditCategory::Job),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub id: i64,
    pub occurred_at: DateTime<Utc>,
    pub category: AuditCategory,
    pub severity: Severity,
    /// Device id, snapshot id or upload path the event is about
    pub subject: String,
    pub message: String,
}

pub fn append_event(
    conn: &Connection,
    category: AuditCategory,
    severity: Severity,
    subject: &str,
    message: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_events (occurred_at, category, severity, subject, message)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            to_millis(at),
            category.as_str(),
            severity.as_str(),
            subject,
            message
        ],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}

/// Newest events first
pub fn list_events(
    conn: &Connection,
    category: Option<AuditCategory>,
    limit: u32,
) -> Result<Vec<AuditEvent>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, occurred_at, category, severity, subject, message
             FROM audit_events
             WHERE ?1 IS NULL OR category = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map(
            rusqlite::params![category.map(|c| c.as_str()), i64::from(limit)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .map_err(from_rusqlite)?;

    rows.map(|row| {
        let (id, at, category, severity, subject, message) = row.map_err(from_rusqlite)?;
        Ok(AuditEvent {
            id,
            occurred_at: from_millis("list_audit_events", at)?,
            category: AuditCategory::parse(&category)
                .ok_or_else(|| corrupt_row("list_audit_events", format!("category '{}'", category)))?,
            severity: Severity::parse(&severity)
                .ok_or_else(|| corrupt_row("list_audit_events", format!("severity '{}'", severity)))?,
            subject,
            message,
        })
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::apply_migrations;

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_append_and_filter() {
        let conn = setup();
        append_event(&conn, AuditCategory::Integrity, Severity::Error, "snap-1", "checksum mismatch", Utc::now()).unwrap();
        append_event(&conn, AuditCategory::Ingestion, Severity::Warning, "zte/olt-1/x", "rejected", Utc::now()).unwrap();

        let integrity = list_events(&conn, Some(AuditCategory::Integrity), 10).unwrap();
        assert_eq!(integrity.len(), 1);
        assert_eq!(integrity[0].subject, "snap-1");
        assert_eq!(list_events(&conn, None, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_events_are_append_only() {
        let conn = setup();
        append_event(&conn, AuditCategory::Job, Severity::Info, "sw-1", "reaped", Utc::now()).unwrap();

        assert!(conn.execute("DELETE FROM audit_events", []).is_err());
        assert!(conn.execute("UPDATE audit_events SET message = 'x'", []).is_err());
    }
}
