use cfgvault_core_types::{DeviceId, SnapshotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::sha256_hex;

/// Raw configuration bytes exactly as collected or uploaded
///
/// Never normalized: the stored object must be byte-identical to this.
#[derive(Clone, PartialEq, Eq)]
pub struct RawConfig(Vec<u8>);

impl RawConfig {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn checksum(&self) -> String {
        sha256_hex(&self.0)
    }

    /// Lossy text view, for display only
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

// Configuration text can be large; keep Debug output to a summary.
impl std::fmt::Debug for RawConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawConfig({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for RawConfig {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<String> for RawConfig {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&str> for RawConfig {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// Where a snapshot's content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotOrigin {
    Poll,
    Ingestion,
}

impl SnapshotOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotOrigin::Poll => "poll",
            SnapshotOrigin::Ingestion => "ingestion",
        }
    }

    pub fn parse(s: &str) -> Option<SnapshotOrigin> {
        match s {
            "poll" => Some(SnapshotOrigin::Poll),
            "ingestion" => Some(SnapshotOrigin::Ingestion),
            _ => None,
        }
    }
}

/// Metadata of one immutable stored configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub device_id: DeviceId,
    /// Per-device, contiguous from 1
    pub sequence: u64,
    pub collected_at: DateTime<Utc>,
    pub committed_at: DateTime<Utc>,
    pub checksum: String,
    pub size_bytes: u64,
    /// Same checksum as the device's previous snapshot
    pub duplicate: bool,
    pub origin: SnapshotOrigin,
    /// Object location relative to the store root
    pub object_key: String,
}
