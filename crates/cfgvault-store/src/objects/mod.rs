//! Object store
//!
//! One immutable file per snapshot, keyed by (device, sequence):
//! `objects/<shard>/<device-digest>/<sequence>.cfg`. Files are written
//! atomically and made read-only. The index, not the directory tree, decides
//! which objects exist.

mod atomic;
mod fs_objects;
mod keying;

pub use fs_objects::ObjectStore;
pub use keying::object_key;
