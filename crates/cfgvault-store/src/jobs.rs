//! Collection job ledger
//!
//! A job row is inserted when the job is dispatched, updated at each state
//! transition and frozen once it carries an outcome (enforced by trigger).

use crate::errors::{corrupt_row, from_rusqlite, not_found, Result};
use crate::time::{from_millis, to_millis};
use cfgvault_core::errors::{CvError, CvErrorKind};
use cfgvault_core::{CollectionJob, FailureReason, JobOutcome, JobStage, JobState, Trigger};
use cfgvault_core_types::{DeviceId, JobId, SnapshotId};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

const JOB_COLUMNS: &str = "job_id, device_id, trigger_kind, state, started_at, finished_at,
     outcome, failed_stage, failure_reason, error_code, error_detail, snapshot_id";

struct JobRow {
    job_id: String,
    device_id: String,
    trigger_kind: String,
    state: String,
    started_at: i64,
    finished_at: Option<i64>,
    failed_stage: Option<String>,
    failure_reason: Option<String>,
    error_code: Option<String>,
    error_detail: Option<String>,
    snapshot_id: Option<String>,
}

fn row_to_job_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        job_id: row.get(0)?,
        device_id: row.get(1)?,
        trigger_kind: row.get(2)?,
        state: row.get(3)?,
        started_at: row.get(4)?,
        finished_at: row.get(5)?,
        failed_stage: row.get(7)?,
        failure_reason: row.get(8)?,
        error_code: row.get(9)?,
        error_detail: row.get(10)?,
        snapshot_id: row.get(11)?,
    })
}

impl JobRow {
    fn into_job(self) -> Result<CollectionJob> {
        const OP: &str = "read_job_row";
        let trigger = match self.trigger_kind.as_str() {
            "scheduled" => Trigger::Scheduled,
            "manual" => Trigger::Manual,
            other => return Err(corrupt_row(OP, format!("trigger '{}'", other))),
        };
        let state = match self.state.as_str() {
            "succeeded" => JobState::Succeeded,
            "skipped" => JobState::Skipped,
            "failed" => {
                let stage = self
                    .failed_stage
                    .as_deref()
                    .and_then(JobStage::parse)
                    .ok_or_else(|| corrupt_row(OP, "failed job without stage"))?;
                let reason = self
                    .failure_reason
                    .as_deref()
                    .and_then(FailureReason::parse)
                    .ok_or_else(|| corrupt_row(OP, "failed job without reason"))?;
                JobState::Failed { stage, reason }
            }
            other => JobState::Active(
                JobStage::parse(other)
                    .ok_or_else(|| corrupt_row(OP, format!("state '{}'", other)))?,
            ),
        };
        Ok(CollectionJob {
            id: JobId::from_string(self.job_id),
            device_id: DeviceId::new(self.device_id),
            trigger,
            started_at: from_millis(OP, self.started_at)?,
            finished_at: self
                .finished_at
                .map(|ms| from_millis(OP, ms))
                .transpose()?,
            state,
            error_code: self.error_code,
            error_detail: self.error_detail,
            snapshot_id: self.snapshot_id.map(SnapshotId::from_string),
        })
    }
}

fn failure_columns(state: &JobState) -> (Option<&'static str>, Option<&'static str>) {
    match state {
        JobState::Failed { stage, reason } => (Some(stage.as_str()), Some(reason.as_str())),
        _ => (None, None),
    }
}

/// Record a newly dispatched job
///
/// Skipped jobs are inserted already closed, so they never collide with the
/// device's open job.
///
/// # Errors
///
/// `AlreadyRunning` when the device already has an open job row.
pub fn insert_job(conn: &Connection, job: &CollectionJob) -> Result<()> {
    let (failed_stage, failure_reason) = failure_columns(&job.state);
    conn.execute(
        &format!(
            "INSERT INTO collection_jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            JOB_COLUMNS
        ),
        rusqlite::params![
            job.id.as_str(),
            job.device_id.as_str(),
            job.trigger.as_str(),
            job.state.name(),
            to_millis(job.started_at),
            job.finished_at.map(to_millis),
            job.state.outcome().map(|o| o.as_str()),
            failed_stage,
            failure_reason,
            job.error_code,
            job.error_detail,
            job.snapshot_id.as_ref().map(|s| s.as_str()),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            CvError::new(CvErrorKind::AlreadyRunning)
                .with_op("insert_job")
                .with_device_id(job.device_id.as_str())
                .with_message("device already has an open job")
        }
        other => from_rusqlite(other),
    })?;
    Ok(())
}

/// Persist the job's current state
///
/// # Errors
///
/// `IllegalTransition` when the stored row is already closed.
pub fn update_job(conn: &Connection, job: &CollectionJob) -> Result<()> {
    let (failed_stage, failure_reason) = failure_columns(&job.state);
    let changed = conn
        .execute(
            "UPDATE collection_jobs SET
                state = ?2, finished_at = ?3, outcome = ?4, failed_stage = ?5,
                failure_reason = ?6, error_code = ?7, error_detail = ?8, snapshot_id = ?9
             WHERE job_id = ?1",
            rusqlite::params![
                job.id.as_str(),
                job.state.name(),
                job.finished_at.map(to_millis),
                job.state.outcome().map(|o| o.as_str()),
                failed_stage,
                failure_reason,
                job.error_code,
                job.error_detail,
                job.snapshot_id.as_ref().map(|s| s.as_str()),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CvError::new(CvErrorKind::IllegalTransition)
                    .with_op("update_job")
                    .with_entity_id(job.id.as_str())
                    .with_message(e.to_string())
            }
            other => from_rusqlite(other),
        })?;

    if changed == 0 {
        return Err(not_found("update_job", job.id.as_str(), "job"));
    }
    Ok(())
}

pub fn fetch_job(conn: &Connection, job_id: &JobId) -> Result<CollectionJob> {
    conn.query_row(
        &format!("SELECT {} FROM collection_jobs WHERE job_id = ?1", JOB_COLUMNS),
        [job_id.as_str()],
        row_to_job_row,
    )
    .optional()
    .map_err(from_rusqlite)?
    .ok_or_else(|| not_found("fetch_job", job_id.as_str(), "job"))?
    .into_job()
}

/// Most recent jobs of a device, newest first
pub fn list_jobs(conn: &Connection, device_id: &DeviceId, limit: u32) -> Result<Vec<CollectionJob>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM collection_jobs
             WHERE device_id = ?1
             ORDER BY started_at DESC, job_id DESC
             LIMIT ?2",
            JOB_COLUMNS
        ))
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map(
            rusqlite::params![device_id.as_str(), i64::from(limit)],
            row_to_job_row,
        )
        .map_err(from_rusqlite)?;
    rows.map(|row| row.map_err(from_rusqlite)?.into_job())
        .collect()
}

/// Start time of the device's last successful collection
pub fn last_success(conn: &Connection, device_id: &DeviceId) -> Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = conn
        .query_row(
            "SELECT MAX(started_at) FROM collection_jobs
             WHERE device_id = ?1 AND outcome = ?2",
            rusqlite::params![device_id.as_str(), JobOutcome::Succeeded.as_str()],
            |row| row.get(0),
        )
        .map_err(from_rusqlite)?;
    ms.map(|ms| from_millis("last_success", ms)).transpose()
}

/// Close every job left open by an unclean stop
///
/// Returns the number of jobs closed.
pub fn reap_interrupted_jobs(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    conn.execute(
        "UPDATE collection_jobs SET
            failed_stage = state,
            state = 'failed',
            outcome = 'failed',
            failure_reason = ?1,
            error_code = ?2,
            error_detail = 'engine stopped while the job was running',
            finished_at = ?3
         WHERE outcome IS NULL",
        rusqlite::params![
            FailureReason::Interrupted.as_str(),
            CvErrorKind::Cancelled.code(),
            to_millis(now),
        ],
    )
    .map_err(from_rusqlite)
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

    fn pending(device: &str) -> CollectionJob {
        CollectionJob::pending(DeviceId::new(device), Trigger::Scheduled, Utc::now())
    }

    #[test]
    fn test_insert_and_fetch_round_trip() {
        let conn = setup();
        let mut job = pending("sw-1");
        insert_job(&conn, &job).unwrap();

        job.advance(JobStage::Connecting).unwrap();
        job.fail(FailureReason::Connect, "ERR_CONNECT", "refused", Utc::now())
            .unwrap();
        update_job(&conn, &job).unwrap();

        let back = fetch_job(&conn, &job.id).unwrap();
        assert_eq!(
            back.state,
            JobState::Failed {
                stage: JobStage::Connecting,
                reason: FailureReason::Connect
            }
        );
        assert_eq!(back.error_detail.as_deref(), Some("refused"));
    }

    #[test]
    fn test_one_open_job_per_device() {
        let conn = setup();
        insert_job(&conn, &pending("sw-1")).unwrap();

        let err = insert_job(&conn, &pending("sw-1")).unwrap_err();
        assert_eq!(err.kind(), CvErrorKind::AlreadyRunning);

        // Other devices are unaffected
        insert_job(&conn, &pending("sw-2")).unwrap();
    }

    #[test]
    fn test_skipped_job_does_not_block() {
        let conn = setup();
        insert_job(&conn, &pending("sw-1")).unwrap();

        let mut skipped = pending("sw-1");
        skipped.skip(Utc::now()).unwrap();
        insert_job(&conn, &skipped).unwrap();

        let jobs = list_jobs(&conn, &DeviceId::new("sw-1"), 10).unwrap();
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn test_closed_job_cannot_be_reopened() {
        let conn = setup();
        let mut job = pending("sw-1");
        insert_job(&conn, &job).unwrap();
        job.skip(Utc::now()).unwrap();
        update_job(&conn, &job).unwrap();

        let mut reopened = job.clone();
        reopened.state = JobState::Active(JobStage::Pending);
        let err = update_job(&conn, &reopened).unwrap_err();
        assert_eq!(err.kind(), CvErrorKind::IllegalTransition);
    }

    #[test]
    fn test_reap_interrupted_jobs() {
        let conn = setup();
        let mut job = pending("sw-1");
        insert_job(&conn, &job).unwrap();
        job.advance(JobStage::Connecting).unwrap();
        job.advance(JobStage::Collecting).unwrap();
        update_job(&conn, &job).unwrap();

        assert_eq!(reap_interrupted_jobs(&conn, Utc::now()).unwrap(), 1);
        assert_eq!(reap_interrupted_jobs(&conn, Utc::now()).unwrap(), 0);

        let back = fetch_job(&conn, &job.id).unwrap();
        assert_eq!(
            back.state,
            JobState::Failed {
                stage: JobStage::Collecting,
                reason: FailureReason::Interrupted
            }
        );
    }

    #[test]
    fn test_last_success_ignores_failures() {
        let conn = setup();
        let device = DeviceId::new("sw-1");
        assert_eq!(last_success(&conn, &device).unwrap(), None);

        let mut failed = pending("sw-1");
        insert_job(&conn, &failed).unwrap();
        failed
            .fail(FailureReason::Connect, "ERR_CONNECT", "down", Utc::now())
            .unwrap();
        update_job(&conn, &failed).unwrap();

        assert_eq!(last_success(&conn, &device).unwrap(), None);
    }
}
