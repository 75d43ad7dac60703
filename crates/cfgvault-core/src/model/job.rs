use cfgvault_core_types::{DeviceId, JobId, SnapshotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CvErrorKind, Result, VaultError};

/// What caused a job to be dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Scheduled,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Scheduled => "scheduled",
            Trigger::Manual => "manual",
        }
    }
}

/// Non-terminal states, in the only order a job may visit them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Pending,
    Connecting,
    Collecting,
    Committing,
}

impl JobStage {
    /// The single stage that may follow this one
    pub fn next(&self) -> Option<JobStage> {
        match self {
            JobStage::Pending => Some(JobStage::Connecting),
            JobStage::Connecting => Some(JobStage::Collecting),
            JobStage::Collecting => Some(JobStage::Committing),
            JobStage::Committing => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Pending => "pending",
            JobStage::Connecting => "connecting",
            JobStage::Collecting => "collecting",
            JobStage::Committing => "committing",
        }
    }

    pub fn parse(s: &str) -> Option<JobStage> {
        match s {
            "pending" => Some(JobStage::Pending),
            "connecting" => Some(JobStage::Connecting),
            "collecting" => Some(JobStage::Collecting),
            "committing" => Some(JobStage::Committing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Connect,
    Collect,
    Timeout,
    Integrity,
    Persistence,
    ShutdownCancelled,
    /// Found open at startup after an unclean stop
    Interrupted,
    Internal,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Connect => "connect",
            FailureReason::Collect => "collect",
            FailureReason::Timeout => "timeout",
            FailureReason::Integrity => "integrity",
            FailureReason::Persistence => "persistence",
            FailureReason::ShutdownCancelled => "shutdown_cancelled",
            FailureReason::Interrupted => "interrupted",
            FailureReason::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<FailureReason> {
        match s {
            "connect" => Some(FailureReason::Connect),
            "collect" => Some(FailureReason::Collect),
            "timeout" => Some(FailureReason::Timeout),
            "integrity" => Some(FailureReason::Integrity),
            "persistence" => Some(FailureReason::Persistence),
            "shutdown_cancelled" => Some(FailureReason::ShutdownCancelled),
            "interrupted" => Some(FailureReason::Interrupted),
            "internal" => Some(FailureReason::Internal),
            _ => None,
        }
    }

    pub fn from_kind(kind: CvErrorKind) -> FailureReason {
        match kind {
            CvErrorKind::Connect => FailureReason::Connect,
            CvErrorKind::Collect => FailureReason::Collect,
            CvErrorKind::Timeout => FailureReason::Timeout,
            CvErrorKind::Integrity => FailureReason::Integrity,
            CvErrorKind::Cancelled => FailureReason::ShutdownCancelled,
            CvErrorKind::Io | CvErrorKind::Persistence | CvErrorKind::Serialization => {
                FailureReason::Persistence
            }
            _ => FailureReason::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Skipped,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed => "failed",
            JobOutcome::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<JobOutcome> {
        match s {
            "succeeded" => Some(JobOutcome::Succeeded),
            "failed" => Some(JobOutcome::Failed),
            "skipped" => Some(JobOutcome::Skipped),
            _ => None,
        }
    }
}

/// Job lifecycle
///
/// `Pending → Connecting → Collecting → Committing → Succeeded`, with
/// `Failed` reachable from any non-terminal state and `Skipped` only from
/// `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Active(JobStage),
    Succeeded,
    Failed {
        stage: JobStage,
        reason: FailureReason,
    },
    Skipped,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Active(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobState::Active(stage) => stage.as_str(),
            JobState::Succeeded => "succeeded",
            JobState::Failed { .. } => "failed",
            JobState::Skipped => "skipped",
        }
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        match self {
            JobState::Active(_) => None,
            JobState::Succeeded => Some(JobOutcome::Succeeded),
            JobState::Failed { .. } => Some(JobOutcome::Failed),
            JobState::Skipped => Some(JobOutcome::Skipped),
        }
    }
}

/// One collection attempt against one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionJob {
    pub id: JobId,
    pub device_id: DeviceId,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: JobState,
    /// Error code of the failure, if any
    pub error_code: Option<String>,
    pub error_detail: Option<String>,
    pub snapshot_id: Option<SnapshotId>,
}

impl CollectionJob {
    pub fn pending(device_id: DeviceId, trigger: Trigger, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            device_id,
            trigger,
            started_at: now,
            finished_at: None,
            state: JobState::Active(JobStage::Pending),
            error_code: None,
            error_detail: None,
            snapshot_id: None,
        }
    }

    fn illegal(&self, to: &str) -> VaultError {
        VaultError::IllegalTransition {
            job_id: self.id.to_string(),
            from: self.state.name().to_string(),
            to: to.to_string(),
        }
    }

    /// Move to the next stage; stages cannot be skipped
    ///
    /// # Errors
    ///
    /// `IllegalTransition` if `to` is not the immediate successor.
    pub fn advance(&mut self, to: JobStage) -> Result<()> {
        match self.state {
            JobState::Active(current) if current.next() == Some(to) => {
                self.state = JobState::Active(to);
                Ok(())
            }
            _ => Err(self.illegal(to.as_str())),
        }
    }

    /// # Errors
    ///
    /// `IllegalTransition` unless the job is `Committing`.
    pub fn succeed(&mut self, snapshot_id: SnapshotId, now: DateTime<Utc>) -> Result<()> {
        match self.state {
            JobState::Active(JobStage::Committing) => {
                self.state = JobState::Succeeded;
                self.snapshot_id = Some(snapshot_id);
                self.finished_at = Some(now);
                Ok(())
            }
            _ => Err(self.illegal("succeeded")),
        }
    }

    /// Record a failure in the current stage
    ///
    /// # Errors
    ///
    /// `IllegalTransition` if the job is already terminal.
    pub fn fail(
        &mut self,
        reason: FailureReason,
        code: &str,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self.state {
            JobState::Active(stage) => {
                self.state = JobState::Failed { stage, reason };
                self.error_code = Some(code.to_string());
                self.error_detail = Some(detail.into());
                self.finished_at = Some(now);
                Ok(())
            }
            _ => Err(self.illegal("failed")),
        }
    }

    /// # Errors
    ///
    /// `IllegalTransition` unless the job is still `Pending`.
    pub fn skip(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.state {
            JobState::Active(JobStage::Pending) => {
                self.state = JobState::Skipped;
                self.error_code = Some(CvErrorKind::AlreadyRunning.code().to_string());
                self.error_detail = Some("collection already running".to_string());
                self.finished_at = Some(now);
                Ok(())
            }
            _ => Err(self.illegal("skipped")),
        }
    }
}
