//! Snapshot store façade
//!
//! Owns the index connection and the object store. The index connection is
//! held only for short sections and never while object bytes are being
//! written, so commits of different devices overlap on disk I/O.

use crate::audit::{self, AuditCategory, AuditEvent, Severity};
use crate::db;
use crate::errors::{integrity_mismatch, lock_poisoned, object_missing, Result};
use crate::ingestion;
use crate::jobs;
use crate::migrations::apply_migrations;
use crate::objects::{object_key, ObjectStore};
use crate::requests::{self, CollectionRequest};
use crate::snapshot::{self, DeviceSummary};
use cfgvault_core::checksum::sha256_hex;
use cfgvault_core::errors::{CvError, CvErrorKind};
use cfgvault_core::{
    log_op_end, log_op_error, log_op_start, CollectionJob, IngestionRecord, RawConfig, Snapshot,
    SnapshotOrigin,
};
use cfgvault_core_types::{DeviceId, JobId, SnapshotId};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

pub const INDEX_FILE: &str = "index.db";

/// Append-only, checksum-verified snapshot archive
pub struct SnapshotStore {
    conn: Mutex<Connection>,
    objects: ObjectStore,
    committing: Mutex<HashSet<DeviceId>>,
}

/// Marks a device as mid-commit; cleared on drop
struct CommitSlot<'a> {
    committing: &'a Mutex<HashSet<DeviceId>>,
    device_id: DeviceId,
}

impl Drop for CommitSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.committing.lock() {
            set.remove(&self.device_id);
        }
    }
}

impl SnapshotStore {
    /// Open (or create) a store rooted at `root`: `root/index.db` plus
    /// `root/objects/`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)
            .map_err(|e| crate::errors::io_error("create_store_root", e))?;
        let conn = db::open(root.join(INDEX_FILE))?;
        db::configure(&conn)?;
        Self::with_connection(conn, root)
    }

    /// Store with an in-memory index; objects still go to `objects_root`
    pub fn open_in_memory(objects_root: impl AsRef<Path>) -> Result<Self> {
        let conn = db::open_in_memory()?;
        db::configure(&conn)?;
        Self::with_connection(conn, objects_root.as_ref())
    }

    fn with_connection(mut conn: Connection, root: &Path) -> Result<Self> {
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            objects: ObjectStore::new(root),
            committing: Mutex::new(HashSet::new()),
        })
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    fn conn(&self, op: &str) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| lock_poisoned(op))
    }

    fn claim_commit_slot(&self, device_id: &DeviceId) -> Result<CommitSlot<'_>> {
        let mut set = self
            .committing
            .lock()
            .map_err(|_| lock_poisoned("commit"))?;
        if !set.insert(device_id.clone()) {
            return Err(CvError::new(CvErrorKind::Concurrency)
                .with_op("commit")
                .with_device_id(device_id.as_str())
                .with_message("another commit for this device is in progress"));
        }
        Ok(CommitSlot {
            committing: &self.committing,
            device_id: device_id.clone(),
        })
    }

    /// Commit collected content as the device's next snapshot
    ///
    /// Content identical to the current head is still stored, flagged
    /// `duplicate`. The object is written before the index row, so a crash
    /// leaves at worst an unindexed object.
    ///
    /// # Errors
    ///
    /// `Concurrency` if another commit for the device is in flight;
    /// `Io`/`Persistence` on storage failures.
    pub fn commit(
        &self,
        device_id: &DeviceId,
        content: &RawConfig,
        collected_at: DateTime<Utc>,
        origin: SnapshotOrigin,
    ) -> Result<Snapshot> {
        let started = Instant::now();
        log_op_start!("commit_snapshot", device_id = %device_id, origin = origin.as_str());

        let result = self.commit_inner(device_id, content, collected_at, origin);
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(snapshot) => log_op_end!(
                "commit_snapshot",
                duration_ms = duration_ms,
                device_id = %device_id,
                snapshot_id = %snapshot.id,
                sequence = snapshot.sequence,
                duplicate = snapshot.duplicate,
            ),
            Err(e) => log_op_error!("commit_snapshot", e.clone(), duration_ms = duration_ms, device_id = %device_id),
        }
        result
    }

    fn commit_inner(
        &self,
        device_id: &DeviceId,
        content: &RawConfig,
        collected_at: DateTime<Utc>,
        origin: SnapshotOrigin,
    ) -> Result<Snapshot> {
        let _slot = self.claim_commit_slot(device_id)?;
        let checksum = content.checksum();

        let head = {
            let conn = self.conn("commit")?;
            snapshot::head_position(&conn, device_id)?
        };

        let key = object_key(device_id, head.next_sequence);
        self.objects.put(&key, content.as_bytes())?;

        let snapshot = Snapshot {
            id: SnapshotId::new(),
            device_id: device_id.clone(),
            sequence: head.next_sequence,
            collected_at,
            committed_at: Utc::now(),
            duplicate: head.head_checksum.as_deref() == Some(checksum.as_str()),
            checksum,
            size_bytes: content.len() as u64,
            origin,
            object_key: key,
        };

        let mut conn = self.conn("commit")?;
        let tx = conn
            .transaction()
            .map_err(crate::errors::from_rusqlite)?;
        snapshot::insert_snapshot(&tx, &snapshot)?;
        tx.commit().map_err(crate::errors::from_rusqlite)?;

        Ok(snapshot)
    }

    /// Snapshot metadata without touching the object
    pub fn get(&self, snapshot_id: &SnapshotId) -> Result<Snapshot> {
        let conn = self.conn("get_snapshot")?;
        snapshot::fetch_snapshot(&conn, snapshot_id)
    }

    /// Content of a snapshot, verified against its indexed checksum
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id; `Integrity` when the object is missing
    /// or altered (an `integrity` audit event is appended first).
    pub fn read(&self, snapshot_id: &SnapshotId) -> Result<RawConfig> {
        self.read_with_meta(snapshot_id).map(|(_, content)| content)
    }

    pub fn read_with_meta(&self, snapshot_id: &SnapshotId) -> Result<(Snapshot, RawConfig)> {
        let meta = self.get(snapshot_id)?;
        let bytes = self.load_verified(&meta)?;
        Ok((meta, RawConfig::new(bytes)))
    }

    /// Check a snapshot's object against the index without returning content
    pub fn verify(&self, snapshot_id: &SnapshotId) -> Result<Snapshot> {
        let meta = self.get(snapshot_id)?;
        self.load_verified(&meta)?;
        Ok(meta)
    }

    fn load_verified(&self, meta: &Snapshot) -> Result<Vec<u8>> {
        let failure = match self.objects.get(&meta.object_key)? {
            None => object_missing(meta.id.as_str()),
            Some(bytes) => {
                let actual = sha256_hex(&bytes);
                if actual == meta.checksum {
                    return Ok(bytes);
                }
                integrity_mismatch(meta.id.as_str(), &meta.checksum, &actual)
            }
        };
        let failure = failure.with_device_id(meta.device_id.as_str());

        tracing::error!(
            snapshot_id = %meta.id,
            device_id = %meta.device_id,
            sequence = meta.sequence,
            err_code = failure.code(),
            "Snapshot failed integrity verification"
        );
        if let Err(e) = self.audit(
            AuditCategory::Integrity,
            Severity::Error,
            meta.id.as_str(),
            &format!(
                "device {} sequence {}: {}",
                meta.device_id,
                meta.sequence,
                failure.message()
            ),
        ) {
            tracing::warn!(error = %e, "Failed to append integrity audit event");
        }
        Err(failure)
    }

    /// All snapshots of a device, ascending sequence
    pub fn list(&self, device_id: &DeviceId) -> Result<Vec<Snapshot>> {
        self.list_after(device_id, 0, None)
    }

    /// Snapshots with `sequence > after`, for resumable listing
    pub fn list_after(
        &self,
        device_id: &DeviceId,
        after: u64,
        limit: Option<u32>,
    ) -> Result<Vec<Snapshot>> {
        let conn = self.conn("list_snapshots")?;
        snapshot::list_snapshots(&conn, device_id, after, limit)
    }

    pub fn head(&self, device_id: &DeviceId) -> Result<Option<Snapshot>> {
        let conn = self.conn("head_snapshot")?;
        snapshot::head_snapshot(&conn, device_id)
    }

    pub fn device_summaries(&self) -> Result<Vec<DeviceSummary>> {
        let conn = self.conn("device_summaries")?;
        snapshot::device_summaries(&conn)
    }

    // ----- job ledger -----

    pub fn insert_job(&self, job: &CollectionJob) -> Result<()> {
        let conn = self.conn("insert_job")?;
        jobs::insert_job(&conn, job)
    }

    pub fn update_job(&self, job: &CollectionJob) -> Result<()> {
        let conn = self.conn("update_job")?;
        jobs::update_job(&conn, job)
    }

    pub fn job(&self, job_id: &JobId) -> Result<CollectionJob> {
        let conn = self.conn("fetch_job")?;
        jobs::fetch_job(&conn, job_id)
    }

    pub fn jobs_for_device(&self, device_id: &DeviceId, limit: u32) -> Result<Vec<CollectionJob>> {
        let conn = self.conn("list_jobs")?;
        jobs::list_jobs(&conn, device_id, limit)
    }

    pub fn last_success(&self, device_id: &DeviceId) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn("last_success")?;
        jobs::last_success(&conn, device_id)
    }

    /// Close jobs left open by an unclean stop; call once before dispatching
    pub fn reap_interrupted_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let reaped = {
            let conn = self.conn("reap_interrupted_jobs")?;
            jobs::reap_interrupted_jobs(&conn, now)?
        };
        if reaped > 0 {
            tracing::warn!(reaped, "Closed jobs interrupted by previous shutdown");
            self.audit(
                AuditCategory::Job,
                Severity::Warning,
                "engine",
                &format!("{} interrupted job(s) closed at startup", reaped),
            )?;
        }
        Ok(reaped)
    }

    // ----- collection requests -----

    /// Queue an immediate collection of one device, or of all with `None`
    pub fn request_collection(&self, device_id: Option<&DeviceId>) -> Result<i64> {
        let conn = self.conn("request_collection")?;
        requests::insert_request(&conn, device_id, Utc::now())
    }

    pub fn pending_collection_requests(&self) -> Result<Vec<CollectionRequest>> {
        let conn = self.conn("pending_collection_requests")?;
        requests::pending_requests(&conn)
    }

    pub fn claim_collection_requests(&self, now: DateTime<Utc>) -> Result<Vec<CollectionRequest>> {
        let mut conn = self.conn("claim_collection_requests")?;
        requests::claim_requests(&mut conn, now)
    }

    // ----- ingestion records -----

    pub fn record_ingestion(&self, record: &IngestionRecord) -> Result<()> {
        let conn = self.conn("record_ingestion")?;
        ingestion::insert_record(&conn, record)
    }

    pub fn ingestion_records(
        &self,
        source_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<IngestionRecord>> {
        let conn = self.conn("ingestion_records")?;
        ingestion::list_records(&conn, source_id, limit)
    }

    // ----- audit trail -----

    pub fn audit(
        &self,
        category: AuditCategory,
        severity: Severity,
        subject: &str,
        message: &str,
    ) -> Result<()> {
        let conn = self.conn("audit")?;
        audit::append_event(&conn, category, severity, subject, message, Utc::now())
    }

    pub fn audit_events(
        &self,
        category: Option<AuditCategory>,
        limit: u32,
    ) -> Result<Vec<AuditEvent>> {
        let conn = self.conn("audit_events")?;
        audit::list_events(&conn, category, limit)
    }
}
