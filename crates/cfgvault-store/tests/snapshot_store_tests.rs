#![allow(clippy::unwrap_used, clippy::expect_used)]

// Integration tests for the snapshot store: sequencing, duplicate flagging,
// verified reads and crash leftovers.

use cfgvault_core::errors::CvErrorKind;
use cfgvault_core::{RawConfig, SnapshotOrigin};
use cfgvault_core_types::DeviceId;
use cfgvault_store::{AuditCategory, SnapshotStore};
use chrono::Utc;
use std::fs;
use tempfile::TempDir;

fn setup() -> (SnapshotStore, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let store = SnapshotStore::open(dir.path()).expect("open store");
    (store, dir)
}

fn make_writable(path: &std::path::Path) {
    let mut perms = fs::metadata(path).unwrap().permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    fs::set_permissions(path, perms).unwrap();
}

#[test]
fn test_identical_content_is_stored_and_flagged_duplicate() {
    // Given: a device with one snapshot
    let (store, _dir) = setup();
    let device = DeviceId::new("OLT-CORE-01");
    let content = RawConfig::from("sysname OLT-CORE-01\n");
    let first = store
        .commit(&device, &content, Utc::now(), SnapshotOrigin::Poll)
        .unwrap();

    // When: the same bytes are committed again
    let second = store
        .commit(&device, &content, Utc::now(), SnapshotOrigin::Poll)
        .unwrap();

    // Then: both are kept, the later one flagged
    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(second.sequence, 2);
    assert_eq!(first.checksum, second.checksum);
    assert_ne!(first.object_key, second.object_key);
    assert_eq!(store.list(&device).unwrap().len(), 2);
}

#[test]
fn test_changed_content_clears_duplicate_flag() {
    let (store, _dir) = setup();
    let device = DeviceId::new("sw-1");

    store
        .commit(&device, &RawConfig::from("v1"), Utc::now(), SnapshotOrigin::Poll)
        .unwrap();
    let changed = store
        .commit(&device, &RawConfig::from("v2"), Utc::now(), SnapshotOrigin::Poll)
        .unwrap();
    let back_to_v1 = store
        .commit(&device, &RawConfig::from("v1"), Utc::now(), SnapshotOrigin::Poll)
        .unwrap();

    // Duplicate compares with the immediately previous snapshot only
    assert!(!changed.duplicate);
    assert!(!back_to_v1.duplicate);
}

#[test]
fn test_read_returns_exact_bytes() {
    let (store, _dir) = setup();
    let device = DeviceId::new("rtr-crlf");
    let raw = RawConfig::new(b"line one\r\nline two\r\n\x00binary tail".to_vec());

    let snap = store
        .commit(&device, &raw, Utc::now(), SnapshotOrigin::Ingestion)
        .unwrap();
    let back = store.read(&snap.id).unwrap();

    assert_eq!(back, raw);
    assert_eq!(back.checksum(), snap.checksum);
    assert_eq!(snap.origin, SnapshotOrigin::Ingestion);
}

#[test]
fn test_corrupted_object_fails_with_integrity_and_is_audited() {
    // Given: a committed snapshot
    let (store, _dir) = setup();
    let device = DeviceId::new("sw-corrupt");
    let snap = store
        .commit(&device, &RawConfig::from("hostname sw\n"), Utc::now(), SnapshotOrigin::Poll)
        .unwrap();
    assert!(store.verify(&snap.id).is_ok());

    // When: its object is altered on disk
    let path = store.objects().path_of(&snap.object_key);
    make_writable(&path);
    fs::write(&path, b"hostname evil\n").unwrap();

    // Then: reads fail with Integrity and an audit event exists
    let err = store.read(&snap.id).unwrap_err();
    assert_eq!(err.kind(), CvErrorKind::Integrity);
    assert_eq!(err.entity_id(), Some(snap.id.as_str()));

    let events = store
        .audit_events(Some(AuditCategory::Integrity), 10)
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].subject, snap.id.as_str());
}

#[test]
fn test_missing_object_fails_with_integrity() {
    let (store, _dir) = setup();
    let device = DeviceId::new("sw-missing");
    let snap = store
        .commit(&device, &RawConfig::from("x"), Utc::now(), SnapshotOrigin::Poll)
        .unwrap();

    let path = store.objects().path_of(&snap.object_key);
    make_writable(&path);
    fs::remove_file(&path).unwrap();

    let err = store.verify(&snap.id).unwrap_err();
    assert_eq!(err.kind(), CvErrorKind::Integrity);
}

#[test]
fn test_orphan_object_does_not_shift_sequence() {
    // Given: an object written by a commit that crashed before indexing
    let (store, _dir) = setup();
    let device = DeviceId::new("sw-orphan");
    store
        .objects()
        .put(&cfgvault_store::objects::object_key(&device, 1), b"orphan")
        .unwrap();

    // When: the next real commit happens
    let snap = store
        .commit(&device, &RawConfig::from("real"), Utc::now(), SnapshotOrigin::Poll)
        .unwrap();

    // Then: the index decides; the orphan is replaced
    assert_eq!(snap.sequence, 1);
    assert_eq!(store.read(&snap.id).unwrap(), RawConfig::from("real"));
}

#[test]
fn test_store_reopens_with_existing_history() {
    let dir = TempDir::new().unwrap();
    let device = DeviceId::new("rtr-persist");
    {
        let store = SnapshotStore::open(dir.path()).unwrap();
        store
            .commit(&device, &RawConfig::from("one"), Utc::now(), SnapshotOrigin::Poll)
            .unwrap();
    }

    let store = SnapshotStore::open(dir.path()).unwrap();
    let next = store
        .commit(&device, &RawConfig::from("one"), Utc::now(), SnapshotOrigin::Poll)
        .unwrap();
    assert_eq!(next.sequence, 2);
    assert!(next.duplicate);
}

#[test]
fn test_parallel_commits_for_different_devices() {
    let (store, _dir) = setup();
    let store = std::sync::Arc::new(store);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            std::thread::spawn(move || {
                let device = DeviceId::new(format!("dev-{}", i));
                for n in 0..5 {
                    store
                        .commit(
                            &device,
                            &RawConfig::from(format!("cfg {}", n)),
                            Utc::now(),
                            SnapshotOrigin::Poll,
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let summaries = store.device_summaries().unwrap();
    assert_eq!(summaries.len(), 8);
    assert!(summaries.iter().all(|s| s.head_sequence == 5));
}
