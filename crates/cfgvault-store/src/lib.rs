//! cfgvault Store - append-only snapshot archive
//!
//! Provides:
//! - SQLite index with embedded, checksummed migrations
//! - Object store holding one immutable file per snapshot
//! - Snapshot commit (sequence + duplicate detection) and verified reads
//! - Job ledger, ingestion records, device catalog reader and audit trail
//! - Queued collection requests for the running engine

pub mod audit;
pub mod catalog;
pub mod db;
pub mod errors;
pub mod ingestion;
pub mod jobs;
pub mod migrations;
pub mod objects;
pub mod requests;
pub mod snapshot;
pub mod store;
mod time;

pub use audit::{AuditCategory, AuditEvent, Severity};
pub use catalog::SqliteDeviceCatalog;
pub use errors::Result;
pub use requests::CollectionRequest;
pub use snapshot::DeviceSummary;
pub use store::SnapshotStore;
