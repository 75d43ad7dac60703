use cfgvault_core_types::{DeviceId, IngestionId, SnapshotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, VaultError};

const MAX_SOURCE_ID_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionState {
    Pending,
    Accepted,
    Rejected,
    Incomplete,
}

impl IngestionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionState::Pending => "pending",
            IngestionState::Accepted => "accepted",
            IngestionState::Rejected => "rejected",
            IngestionState::Incomplete => "incomplete",
        }
    }

    pub fn parse(s: &str) -> Option<IngestionState> {
        match s {
            "pending" => Some(IngestionState::Pending),
            "accepted" => Some(IngestionState::Accepted),
            "rejected" => Some(IngestionState::Rejected),
            "incomplete" => Some(IngestionState::Incomplete),
            _ => None,
        }
    }
}

/// `source-group/source-id/file-name` as seen by the upload listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePath {
    pub group: String,
    pub source_id: String,
    pub file_name: String,
}

/// Allowed characters: `[A-Za-z0-9._-]`, 1 to 64 of them, and not `.`/`..`
pub fn is_valid_source_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SOURCE_ID_LEN
        && id != "."
        && id != ".."
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

impl SourcePath {
    /// Split an upload path relative to the ingestion root
    ///
    /// # Errors
    ///
    /// `InvalidSource` unless the path has exactly three components and the
    /// middle one is a valid source id.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |reason: &str| VaultError::InvalidSource {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = path
            .split(['/', '\\'])
            .filter(|p| !p.is_empty())
            .collect();
        let [group, source_id, file_name] = parts.as_slice() else {
            return Err(invalid("expected group/source-id/file-name"));
        };

        if !is_valid_source_id(source_id) {
            return Err(invalid("source id must match [A-Za-z0-9._-]{1,64}"));
        }
        if *group == "." || *group == ".." || *file_name == "." || *file_name == ".." {
            return Err(invalid("relative path components are not allowed"));
        }

        Ok(Self {
            group: (*group).to_string(),
            source_id: (*source_id).to_string(),
            file_name: (*file_name).to_string(),
        })
    }

    /// Push-only sources are archived under their source id
    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(self.source_id.clone())
    }

    pub fn relative(&self) -> String {
        format!("{}/{}/{}", self.group, self.source_id, self.file_name)
    }
}

/// Acceptance rules for uploads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionRules {
    pub group: String,
    pub expected_file_name: String,
}

impl IngestionRules {
    /// # Errors
    ///
    /// `InvalidSource` for a foreign group, `UnexpectedFileName` for any name
    /// other than the expected one (compared exactly, case-sensitive).
    pub fn validate(&self, path: &SourcePath) -> Result<()> {
        if path.group != self.group {
            return Err(VaultError::InvalidSource {
                path: path.relative(),
                reason: format!("group must be '{}'", self.group),
            });
        }
        if path.file_name != self.expected_file_name {
            return Err(VaultError::UnexpectedFileName {
                file_name: path.file_name.clone(),
                expected: self.expected_file_name.clone(),
            });
        }
        Ok(())
    }
}

/// Outcome of one upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRecord {
    pub id: IngestionId,
    pub group: String,
    pub source_id: String,
    pub file_name: String,
    pub expected_name: String,
    pub received_at: DateTime<Utc>,
    pub state: IngestionState,
    pub detail: Option<String>,
    pub snapshot_id: Option<SnapshotId>,
}

impl IngestionRecord {
    pub fn pending(
        group: impl Into<String>,
        source_id: impl Into<String>,
        file_name: impl Into<String>,
        expected_name: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: IngestionId::new(),
            group: group.into(),
            source_id: source_id.into(),
            file_name: file_name.into(),
            expected_name: expected_name.into(),
            received_at,
            state: IngestionState::Pending,
            detail: None,
            snapshot_id: None,
        }
    }

    pub fn accept(mut self, snapshot_id: SnapshotId) -> Self {
        self.state = IngestionState::Accepted;
        self.snapshot_id = Some(snapshot_id);
        self
    }

    pub fn reject(mut self, detail: impl Into<String>) -> Self {
        self.state = IngestionState::Rejected;
        self.detail = Some(detail.into());
        self
    }

    pub fn incomplete(mut self, detail: impl Into<String>) -> Self {
        self.state = IngestionState::Incomplete;
        self.detail = Some(detail.into());
        self
    }
}
