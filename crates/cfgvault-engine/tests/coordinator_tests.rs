#![allow(clippy::unwrap_used, clippy::expect_used)]

// Job coordinator: per-device exclusion, stage ledger, timeouts and
// shutdown cancellation.

mod common;

use cfgvault_core::{FailureReason, JobStage, JobState, RawConfig, SnapshotOrigin, Trigger};
use cfgvault_core_types::DeviceId;
use cfgvault_engine::{CoordinatorSettings, Dispatch};
use chrono::Utc;
use common::{device, harness, harness_with, settings, Script};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn started(dispatch: Dispatch) -> tokio::task::JoinHandle<cfgvault_core::CollectionJob> {
    match dispatch {
        Dispatch::Started(handle) => handle,
        Dispatch::AlreadyRunning(job) => panic!("expected a started job, got {:?}", job),
    }
}

#[tokio::test]
async fn test_successful_job_walks_every_stage_and_commits() {
    // Given: a reachable device
    let h = harness();

    // When: a job is dispatched and awaited
    let job = started(h.coordinator.dispatch(device("sw-1"), Trigger::Manual).unwrap())
        .await
        .unwrap();

    // Then: it succeeded with a snapshot and the ledger agrees
    assert_eq!(job.state, JobState::Succeeded);
    let snapshot_id = job.snapshot_id.clone().unwrap();
    let snapshot = h.store.get(&snapshot_id).unwrap();
    assert_eq!(snapshot.sequence, 1);
    assert_eq!(snapshot.origin, SnapshotOrigin::Poll);
    let recorded = h.store.job(&job.id).unwrap();
    assert_eq!(recorded.state, JobState::Succeeded);
    assert_eq!(recorded.snapshot_id, job.snapshot_id);
    assert_eq!(h.adapter.closed(), 1);
    assert!(!h.coordinator.locks().is_locked(&DeviceId::new("sw-1")));
}

#[tokio::test]
async fn test_second_dispatch_for_busy_device_is_skipped() {
    // Given: a collection held open on the device
    let h = harness();
    let release = Arc::new(Notify::new());
    h.adapter
        .script("olt-1", Script::Gated(Arc::clone(&release), b"cfg\n".to_vec()));
    let first = started(h.coordinator.dispatch(device("olt-1"), Trigger::Scheduled).unwrap());

    // When: a second dispatch arrives
    let second = h.coordinator.dispatch(device("olt-1"), Trigger::Manual).unwrap();

    // Then: it is rejected and recorded as a closed skipped job
    let Dispatch::AlreadyRunning(skipped) = second else {
        panic!("second dispatch should be rejected");
    };
    assert_eq!(skipped.state, JobState::Skipped);
    assert_eq!(skipped.error_code.as_deref(), Some("ERR_ALREADY_RUNNING"));
    assert!(skipped.finished_at.is_some());

    release.notify_one();
    let job = first.await.unwrap();
    assert_eq!(job.state, JobState::Succeeded);

    let jobs = h.store.jobs_for_device(&DeviceId::new("olt-1"), 10).unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.state.is_terminal()));
    assert_eq!(h.adapter.opened(), 1);
}

#[tokio::test]
async fn test_other_devices_are_not_blocked() {
    // Given: one device held open
    let h = harness();
    let release = Arc::new(Notify::new());
    h.adapter
        .script("a", Script::Gated(Arc::clone(&release), b"a\n".to_vec()));
    let held = started(h.coordinator.dispatch(device("a"), Trigger::Manual).unwrap());

    // When: another device is dispatched
    let other = started(h.coordinator.dispatch(device("b"), Trigger::Manual).unwrap())
        .await
        .unwrap();

    // Then: it completes while the first is still running
    assert_eq!(other.state, JobState::Succeeded);
    assert!(h.coordinator.locks().is_locked(&DeviceId::new("a")));

    release.notify_one();
    held.await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_records_stage_and_releases_lock() {
    // Given: a device refusing connections
    let h = harness();
    h.adapter.script("rtr-1", Script::RefuseConnect);

    // When
    let job = started(h.coordinator.dispatch(device("rtr-1"), Trigger::Manual).unwrap())
        .await
        .unwrap();

    // Then
    assert_eq!(
        job.state,
        JobState::Failed {
            stage: JobStage::Connecting,
            reason: FailureReason::Connect
        }
    );
    assert_eq!(job.error_code.as_deref(), Some("ERR_CONNECT"));
    assert!(job.snapshot_id.is_none());
    assert!(h.store.head(&DeviceId::new("rtr-1")).unwrap().is_none());
    assert!(!h.coordinator.locks().is_locked(&DeviceId::new("rtr-1")));

    // And: the device can be collected again straight away
    h.adapter.script("rtr-1", Script::Output(b"ok\n".to_vec()));
    let retry = started(h.coordinator.dispatch(device("rtr-1"), Trigger::Manual).unwrap())
        .await
        .unwrap();
    assert_eq!(retry.state, JobState::Succeeded);
}

#[tokio::test]
async fn test_collect_timeout_fails_job_and_closes_session() {
    // Given: a short collect bound and a device that never answers
    let h = harness_with(CoordinatorSettings {
        collect_timeout: Duration::from_millis(100),
        ..settings()
    });
    h.adapter.script("slow", Script::HangCollect);

    // When
    let job = started(h.coordinator.dispatch(device("slow"), Trigger::Scheduled).unwrap())
        .await
        .unwrap();

    // Then: failed in Collecting with a timeout, session force-closed
    assert_eq!(
        job.state,
        JobState::Failed {
            stage: JobStage::Collecting,
            reason: FailureReason::Timeout
        }
    );
    assert_eq!(job.error_code.as_deref(), Some("ERR_TIMEOUT"));
    assert_eq!(h.adapter.closed(), 1);
    assert!(!h.coordinator.locks().is_locked(&DeviceId::new("slow")));
}

#[tokio::test]
async fn test_shutdown_cancels_before_next_stage() {
    // Given: shutdown already requested
    let h = harness();
    h.shutdown.send(true).unwrap();

    // When
    let job = started(h.coordinator.dispatch(device("sw-9"), Trigger::Scheduled).unwrap())
        .await
        .unwrap();

    // Then: nothing was opened and the job records the cancellation
    assert_eq!(
        job.state,
        JobState::Failed {
            stage: JobStage::Pending,
            reason: FailureReason::ShutdownCancelled
        }
    );
    assert_eq!(h.adapter.opened(), 0);
    assert!(h.coordinator.wait_idle(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_ingested_commit_waits_for_running_collection() {
    // Given: a poll in flight for the device
    let h = harness();
    let release = Arc::new(Notify::new());
    h.adapter
        .script("olt-7", Script::Gated(Arc::clone(&release), b"polled\n".to_vec()));
    let poll = started(h.coordinator.dispatch(device("olt-7"), Trigger::Scheduled).unwrap());

    // When: an ingested file for the same device is committed
    let coordinator = Arc::clone(&h.coordinator);
    let ingest = tokio::spawn(async move {
        coordinator
            .commit_ingested(&DeviceId::new("olt-7"), RawConfig::from("pushed\n"), Utc::now())
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Then: it waits for the lock instead of failing
    assert!(!ingest.is_finished());
    release.notify_one();
    poll.await.unwrap();
    let pushed = ingest.await.unwrap().unwrap();

    let history = h.store.list(&DeviceId::new("olt-7")).unwrap();
    let sequences: Vec<u64> = history.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(history[0].origin, SnapshotOrigin::Poll);
    assert_eq!(pushed.origin, SnapshotOrigin::Ingestion);
    assert_eq!(pushed.sequence, 2);
}

#[tokio::test]
async fn test_wait_idle_reports_jobs_still_running() {
    // Given: a job that never finishes
    let h = harness();
    h.adapter.script("stuck", Script::HangCollect);
    let _handle = started(h.coordinator.dispatch(device("stuck"), Trigger::Manual).unwrap());

    // When / Then
    assert!(!h.coordinator.wait_idle(Duration::from_millis(100)).await);
    assert_eq!(h.coordinator.active_jobs(), 1);
}
