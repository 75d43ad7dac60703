//! Push ingestion
//!
//! The FTP listener turns finished and broken uploads into
//! [`IngestionEvent`]s; one [`IngestionPipeline`] task consumes them and
//! promotes valid files through the same commit path as polled output.

pub mod ftp;
pub mod permissions;

use crate::coordinator::JobCoordinator;
use cfgvault_core::errors::{CvError, CvErrorKind};
use cfgvault_core::{
    log_op_end, log_op_error, log_op_start, IngestionRecord, IngestionRules, RawConfig,
    SourcePath,
};
use cfgvault_store::{AuditCategory, Severity};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

pub use ftp::{FtpListener, FtpSettings};

/// Completion callback of one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionEvent {
    FileReceived {
        /// `group/source-id/file-name` relative to the ingestion root
        relative: String,
        local_path: PathBuf,
        received_at: DateTime<Utc>,
    },
    Incomplete {
        relative: String,
        local_path: PathBuf,
        received_at: DateTime<Utc>,
        detail: String,
    },
}

/// Best-effort split of a path that may not parse as a `SourcePath`
fn record_fields(relative: &str) -> (String, String, String) {
    let mut parts: Vec<&str> = relative.split('/').filter(|p| !p.is_empty()).collect();
    let file_name = parts.pop().unwrap_or_default().to_string();
    let source_id = parts.pop().unwrap_or_default().to_string();
    (parts.join("/"), source_id, file_name)
}

pub struct IngestionPipeline {
    coordinator: Arc<JobCoordinator>,
    rules: IngestionRules,
}

impl IngestionPipeline {
    pub fn new(coordinator: Arc<JobCoordinator>, rules: IngestionRules) -> Self {
        Self { coordinator, rules }
    }

    /// Consume events until every sender is gone
    pub async fn run(self, mut events: mpsc::Receiver<IngestionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        tracing::info!("Ingestion pipeline stopped");
    }

    /// Process one event and return the record that was written
    pub async fn handle(&self, event: IngestionEvent) -> IngestionRecord {
        match event {
            IngestionEvent::FileReceived {
                relative,
                local_path,
                received_at,
            } => self.promote(&relative, &local_path, received_at).await,
            IngestionEvent::Incomplete {
                relative,
                local_path,
                received_at,
                detail,
            } => {
                discard(&local_path).await;
                let record = self.pending(&relative, received_at).incomplete(detail.clone());
                tracing::warn!(path = %relative, detail = %detail, "Incomplete upload discarded");
                self.audit(Severity::Warning, &relative, &format!("incomplete upload: {}", detail));
                self.save(&record);
                record
            }
        }
    }

    fn pending(&self, relative: &str, received_at: DateTime<Utc>) -> IngestionRecord {
        let (group, source_id, file_name) = record_fields(relative);
        IngestionRecord::pending(
            group,
            source_id,
            file_name,
            self.rules.expected_file_name.clone(),
            received_at,
        )
    }

    async fn promote(
        &self,
        relative: &str,
        local_path: &Path,
        received_at: DateTime<Utc>,
    ) -> IngestionRecord {
        let started = Instant::now();
        log_op_start!("ingest", path = %relative);

        let source = match SourcePath::parse(relative)
            .and_then(|source| self.rules.validate(&source).map(|()| source))
        {
            Ok(source) => source,
            Err(e) => {
                discard(local_path).await;
                return self.rejected(relative, received_at, CvError::from(e), started);
            }
        };

        let content = match tokio::fs::read(local_path).await {
            Ok(bytes) if bytes.is_empty() => {
                discard(local_path).await;
                let err = CvError::new(CvErrorKind::Validation)
                    .with_op("ingest")
                    .with_message("empty upload");
                return self.rejected(relative, received_at, err, started);
            }
            Ok(bytes) => RawConfig::new(bytes),
            Err(e) => {
                let err = CvError::new(CvErrorKind::Io)
                    .with_op("ingest")
                    .with_message(format!("cannot read upload: {}", e));
                return self.rejected(relative, received_at, err, started);
            }
        };

        let device_id = source.device_id();
        let base = self.pending(relative, received_at);
        match self
            .coordinator
            .commit_ingested(&device_id, content, received_at)
            .await
        {
            Ok(snapshot) => {
                discard(local_path).await;
                let record = base.accept(snapshot.id.clone());
                self.save(&record);
                log_op_end!(
                    "ingest",
                    duration_ms = started.elapsed().as_millis() as u64,
                    source_id = %source.source_id,
                    snapshot_id = %snapshot.id,
                    sequence = snapshot.sequence,
                    duplicate = snapshot.duplicate
                );
                record
            }
            // The drop file stays for the operator when the archive refuses it.
            Err(e) => self.rejected(relative, received_at, e, started),
        }
    }

    fn rejected(
        &self,
        relative: &str,
        received_at: DateTime<Utc>,
        err: CvError,
        started: Instant,
    ) -> IngestionRecord {
        let record = self.pending(relative, received_at).reject(err.to_string());
        let severity = match err.kind() {
            CvErrorKind::Validation => Severity::Warning,
            _ => Severity::Error,
        };
        self.audit(severity, relative, &format!("upload rejected: {}", err));
        self.save(&record);
        log_op_error!(
            "ingest",
            err,
            duration_ms = started.elapsed().as_millis() as u64,
            path = %relative
        );
        record
    }

    fn save(&self, record: &IngestionRecord) {
        if let Err(e) = self.coordinator.store().record_ingestion(record) {
            tracing::error!(error = %e, source_id = %record.source_id, "Failed to write ingestion record");
        }
    }

    fn audit(&self, severity: Severity, subject: &str, message: &str) {
        if let Err(e) = self
            .coordinator
            .store()
            .audit(AuditCategory::Ingestion, severity, subject, message)
        {
            tracing::error!(error = %e, "Failed to write audit event");
        }
    }
}

/// Remove a drop file; already gone is fine
async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove upload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_fields_from_well_formed_path() {
        assert_eq!(
            record_fields("zte/olt-1/startrun.dat"),
            ("zte".into(), "olt-1".into(), "startrun.dat".into())
        );
    }

    #[test]
    fn test_record_fields_from_short_or_deep_paths() {
        assert_eq!(
            record_fields("startrun.dat"),
            (String::new(), String::new(), "startrun.dat".into())
        );
        assert_eq!(
            record_fields("a/b/c/d.txt"),
            ("a/b".into(), "c".into(), "d.txt".into())
        );
    }

    #[tokio::test]
    async fn test_discard_tolerates_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gone");
        discard(&path).await;

        std::fs::write(&path, b"x").unwrap();
        discard(&path).await;
        assert!(!path.exists());
    }
}
