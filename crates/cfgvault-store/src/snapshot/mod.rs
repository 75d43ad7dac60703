//! Snapshot index
//!
//! Row-level operations on the `snapshots` table. The commit sequence that
//! ties the object store and the index together lives in `SnapshotStore`.

pub mod persist;
pub mod query;

pub use persist::{head_position, insert_snapshot, HeadPosition};
pub use query::{
    device_summaries, fetch_snapshot, head_snapshot, list_snapshots, DeviceSummary,
};
