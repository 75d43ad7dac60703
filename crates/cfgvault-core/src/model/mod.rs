pub mod cadence;
pub mod device;
pub mod ingestion;
pub mod job;
pub mod snapshot;
pub mod vendor;

pub use cadence::{Cadence, CadenceKind, MonthDay, WeekdaySet};
pub use device::Device;
pub use ingestion::{IngestionRecord, IngestionRules, IngestionState, SourcePath};
pub use job::{CollectionJob, FailureReason, JobOutcome, JobStage, JobState, Trigger};
pub use snapshot::{RawConfig, Snapshot, SnapshotOrigin};
pub use vendor::{PrivilegeMode, Transport, VendorProfile, VendorVariant, PAGER_PATTERN};
