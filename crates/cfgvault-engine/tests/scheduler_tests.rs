#![allow(clippy::unwrap_used, clippy::expect_used)]

// Collection scheduler: due checks, ordering, invalid catalog rows and the
// daily OLT scenario.

mod common;

use cfgvault_core::catalog::CatalogEntry;
use cfgvault_core::errors::CvErrorKind;
use cfgvault_core::{
    Cadence, CollectionJob, Device, DeviceCatalog, JobStage, JobState, RawConfig,
    SnapshotOrigin, Transport, Trigger, VaultError, VendorVariant,
};
use cfgvault_core_types::DeviceId;
use cfgvault_engine::{Dispatch, Scheduler};
use cfgvault_store::SnapshotStore;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use common::{device, harness, Script};
use mockall::mock;
use std::sync::Arc;
use tokio::sync::Notify;

mock! {
    pub Catalog {}
    impl DeviceCatalog for Catalog {
        fn devices(&self) -> cfgvault_core::Result<Vec<CatalogEntry>>;
    }
}

fn catalog_of(entries: Vec<CatalogEntry>) -> Arc<dyn DeviceCatalog> {
    let mut catalog = MockCatalog::new();
    catalog
        .expect_devices()
        .returning(move || Ok(entries.clone()));
    Arc::new(catalog)
}

fn daily(at: &str) -> Cadence {
    Cadence::parse("daily", at).unwrap()
}

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

/// Record a succeeded job started at `at`, backed by a real snapshot
fn seed_success(store: &SnapshotStore, id: &str, content: &str, at: DateTime<Utc>) {
    let device_id = DeviceId::new(id);
    let snapshot = store
        .commit(&device_id, &RawConfig::from(content), at, SnapshotOrigin::Poll)
        .unwrap();
    let mut job = CollectionJob::pending(device_id, Trigger::Scheduled, at);
    store.insert_job(&job).unwrap();
    for stage in [JobStage::Connecting, JobStage::Collecting, JobStage::Committing] {
        job.advance(stage).unwrap();
    }
    job.succeed(snapshot.id, at + ChronoDuration::seconds(5)).unwrap();
    store.update_job(&job).unwrap();
}

#[tokio::test]
async fn test_daily_device_last_collected_25h_ago_is_collected_once() {
    // Given: OLT-CORE-01, daily at 02:00, last success 25h before the tick
    let h = harness();
    let now = noon();
    seed_success(&h.store, "OLT-CORE-01", "sysname OLT-CORE-01\n", now - ChronoDuration::hours(25));
    h.adapter
        .script("OLT-CORE-01", Script::Output(b"sysname OLT-CORE-01\n".to_vec()));
    let olt = device("OLT-CORE-01").with_cadence(daily("02:00"));
    let scheduler = Scheduler::new(catalog_of(vec![Ok(olt)]), Arc::clone(&h.coordinator));

    // When: the next tick runs
    let mut report = scheduler.tick(now).unwrap();

    // Then: one job ran Pending → Succeeded and produced one snapshot
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.jobs.len(), 1);
    let job = report.jobs.pop().unwrap().await.unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.trigger, Trigger::Scheduled);

    let head = h.store.head(&DeviceId::new("OLT-CORE-01")).unwrap().unwrap();
    assert_eq!(head.sequence, 2);
    assert_eq!(Some(head.id), job.snapshot_id);
    // Same bytes as the previous snapshot
    assert!(head.duplicate);
}

#[tokio::test]
async fn test_changed_content_is_not_flagged_duplicate() {
    // Given: a due device whose configuration changed
    let h = harness();
    let now = noon();
    seed_success(&h.store, "sw-1", "hostname old\n", now - ChronoDuration::hours(30));
    h.adapter.script("sw-1", Script::Output(b"hostname new\n".to_vec()));
    let scheduler = Scheduler::new(
        catalog_of(vec![Ok(device("sw-1").with_cadence(daily("02:00")))]),
        Arc::clone(&h.coordinator),
    );

    // When
    let mut report = scheduler.tick(now).unwrap();
    report.jobs.pop().unwrap().await.unwrap();

    // Then
    let head = h.store.head(&DeviceId::new("sw-1")).unwrap().unwrap();
    assert!(!head.duplicate);
}

#[tokio::test]
async fn test_recently_collected_device_is_not_due() {
    // Given: a success after today's 02:00 slot
    let h = harness();
    let now = noon();
    seed_success(&h.store, "sw-2", "x\n", now - ChronoDuration::hours(9));
    let scheduler = Scheduler::new(
        catalog_of(vec![Ok(device("sw-2").with_cadence(daily("02:00")))]),
        Arc::clone(&h.coordinator),
    );

    // When
    let report = scheduler.tick(now).unwrap();

    // Then
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.not_due, 1);
    assert_eq!(h.adapter.opened(), 0);
}

#[tokio::test]
async fn test_never_collected_device_waits_for_time_of_day() {
    // Given: a device that was never collected, slot at 18:00
    let h = harness();
    let scheduler = Scheduler::new(
        catalog_of(vec![Ok(device("new-1").with_cadence(daily("18:00")))]),
        Arc::clone(&h.coordinator),
    );

    // When: ticking at noon, then in the evening
    let early = scheduler.tick(noon()).unwrap();
    let mut late = scheduler.tick(noon() + ChronoDuration::hours(7)).unwrap();

    // Then
    assert_eq!(early.not_due, 1);
    assert_eq!(late.dispatched, 1);
    late.jobs.pop().unwrap().await.unwrap();
}

#[tokio::test]
async fn test_due_devices_dispatched_in_id_order() {
    // Given: three due devices listed out of order
    let h = harness();
    let cadence = daily("00:00");
    let entries = ["c-3", "a-1", "b-2"]
        .into_iter()
        .map(|id| Ok(device(id).with_cadence(cadence)))
        .collect();
    let scheduler = Scheduler::new(catalog_of(entries), Arc::clone(&h.coordinator));

    // When
    let report = scheduler.tick(noon()).unwrap();

    // Then: handles come back in device-id order
    let mut order = Vec::new();
    for handle in report.jobs {
        order.push(handle.await.unwrap().device_id.to_string());
    }
    assert_eq!(order, vec!["a-1", "b-2", "c-3"]);
}

#[tokio::test]
async fn test_invalid_and_disabled_records_are_skipped() {
    // Given: an unparseable row, a transport the vendor lacks, a disabled
    // device, a device without cadence and one good device
    let h = harness();
    let cadence = daily("00:00");
    let entries: Vec<CatalogEntry> = vec![
        Err(VaultError::UnknownVendor {
            vendor: "acme".into(),
        }),
        Ok(Device::new("rtr-1", VendorVariant::Juniper, "192.0.2.1", "lab")
            .with_transport(Transport::Telnet)
            .with_cadence(cadence)),
        Ok(device("off-1").with_cadence(cadence).with_enabled(false)),
        Ok(device("manual-only")),
        Ok(device("good-1").with_cadence(cadence)),
    ];
    let scheduler = Scheduler::new(catalog_of(entries), Arc::clone(&h.coordinator));

    // When
    let mut report = scheduler.tick(noon()).unwrap();

    // Then: the bad rows are counted, the good device still runs
    assert_eq!(report.invalid, 2);
    assert_eq!(report.dispatched, 1);
    let job = report.jobs.pop().unwrap().await.unwrap();
    assert_eq!(job.device_id, DeviceId::new("good-1"));
}

#[tokio::test]
async fn test_busy_device_is_deferred_not_queued() {
    // Given: a due device with a manual collection still running
    let h = harness();
    let release = Arc::new(Notify::new());
    h.adapter
        .script("olt-2", Script::Gated(Arc::clone(&release), b"cfg\n".to_vec()));
    let olt = device("olt-2").with_cadence(daily("00:00"));
    let scheduler = Scheduler::new(catalog_of(vec![Ok(olt)]), Arc::clone(&h.coordinator));
    let manual = scheduler.trigger_manual(&DeviceId::new("olt-2")).unwrap();

    // When
    let report = scheduler.tick(noon()).unwrap();

    // Then
    assert_eq!(report.deferred, 1);
    assert_eq!(report.dispatched, 0);
    release.notify_one();
    let Dispatch::Started(handle) = manual else {
        panic!("manual trigger should start");
    };
    assert_eq!(handle.await.unwrap().trigger, Trigger::Manual);
}

#[tokio::test]
async fn test_failed_job_is_due_again_next_tick() {
    // Given: a due device that refuses connections
    let h = harness();
    h.adapter.script("down-1", Script::RefuseConnect);
    let scheduler = Scheduler::new(
        catalog_of(vec![Ok(device("down-1").with_cadence(daily("00:00")))]),
        Arc::clone(&h.coordinator),
    );

    // When: two ticks run
    let mut first = scheduler.tick(noon()).unwrap();
    first.jobs.pop().unwrap().await.unwrap();
    let mut second = scheduler
        .tick(noon() + ChronoDuration::minutes(1))
        .unwrap();

    // Then: the device is dispatched again
    assert_eq!(second.dispatched, 1);
    second.jobs.pop().unwrap().await.unwrap();
}

#[test]
fn test_manual_trigger_for_unknown_device_is_not_found() {
    let h = harness();
    let scheduler = Scheduler::new(catalog_of(vec![]), Arc::clone(&h.coordinator));

    let err = scheduler
        .trigger_manual(&DeviceId::new("ghost"))
        .err()
        .unwrap();
    assert_eq!(err.kind(), CvErrorKind::NotFound);
}

#[test]
fn test_unreadable_catalog_fails_the_tick() {
    let h = harness();
    let mut catalog = MockCatalog::new();
    catalog.expect_devices().returning(|| {
        Err(VaultError::CatalogUnavailable {
            reason: "database locked".into(),
        })
    });
    let scheduler = Scheduler::new(Arc::new(catalog), Arc::clone(&h.coordinator));

    let err = scheduler.tick(noon()).unwrap_err();
    assert_eq!(err.kind(), CvErrorKind::Persistence);
}

#[tokio::test]
async fn test_queued_request_collects_device_without_cadence() {
    // Given: a device with no cadence and a queued request for it
    let h = harness();
    let scheduler = Scheduler::new(
        catalog_of(vec![Ok(device("rtr-1"))]),
        Arc::clone(&h.coordinator),
    );
    h.store
        .request_collection(Some(&DeviceId::new("rtr-1")))
        .unwrap();

    // When
    let mut report = scheduler.tick(noon()).unwrap();

    // Then: one manual job, and the request is consumed
    assert_eq!(report.requested, 1);
    assert_eq!(report.dispatched, 0);
    let job = report.jobs.pop().unwrap().await.unwrap();
    assert_eq!(job.trigger, Trigger::Manual);
    assert_eq!(job.state, JobState::Succeeded);
    assert!(h.store.pending_collection_requests().unwrap().is_empty());

    let again = scheduler.tick(noon() + ChronoDuration::minutes(1)).unwrap();
    assert_eq!(again.requested, 0);
    assert!(again.jobs.is_empty());
}

#[tokio::test]
async fn test_request_for_all_devices_skips_disabled_and_does_not_double_dispatch() {
    // Given: one due device, one not on a cadence, one disabled; "all" queued
    let h = harness();
    let mut disabled = device("c-off").with_cadence(daily("00:00"));
    disabled.enabled = false;
    let scheduler = Scheduler::new(
        catalog_of(vec![
            Ok(device("a-due").with_cadence(daily("00:00"))),
            Ok(device("b-idle")),
            Ok(disabled),
        ]),
        Arc::clone(&h.coordinator),
    );
    h.store.request_collection(None).unwrap();

    // When
    let report = scheduler.tick(noon()).unwrap();

    // Then: the two enabled devices run once each, as manual jobs
    assert_eq!(report.requested, 2);
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.deferred, 0);
    for handle in report.jobs {
        assert_eq!(handle.await.unwrap().trigger, Trigger::Manual);
    }
    assert_eq!(h.store.jobs_for_device(&DeviceId::new("a-due"), 10).unwrap().len(), 1);
    assert!(h.store.jobs_for_device(&DeviceId::new("c-off"), 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_request_for_unknown_device_is_counted_and_dropped() {
    let h = harness();
    let scheduler = Scheduler::new(catalog_of(vec![]), Arc::clone(&h.coordinator));
    h.store
        .request_collection(Some(&DeviceId::new("ghost")))
        .unwrap();

    let report = scheduler.tick(noon()).unwrap();

    assert_eq!(report.unmatched_requests, 1);
    assert!(h.store.pending_collection_requests().unwrap().is_empty());
}
