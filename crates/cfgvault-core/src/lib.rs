//! cfgvault Core - domain model and shared facilities
//!
//! This crate provides the pieces every other cfgvault crate builds on:
//! - Device, vendor variant and cadence models (closed vendor enumeration)
//! - The CollectionJob state machine
//! - Snapshot and ingestion record models
//! - The canonical error facility (`CvError`, `CvErrorKind`, `VaultError`)
//! - The structured logging facility and its macros

pub mod catalog;
pub mod checksum;
pub mod errors;
pub mod logging_facility;
pub mod model;

/// Re-exported so the logging macros resolve schema constants through `$crate`
pub use cfgvault_core_types as types;

pub use catalog::DeviceCatalog;
pub use errors::{CvError, CvErrorKind, Result, VaultError};
pub use model::{
    Cadence, CadenceKind, CollectionJob, Device, FailureReason, IngestionRecord, IngestionRules,
    IngestionState, JobOutcome, JobStage, JobState, MonthDay, PrivilegeMode, RawConfig, Snapshot,
    SnapshotOrigin, SourcePath, Transport, Trigger, VendorProfile, VendorVariant, WeekdaySet,
};
