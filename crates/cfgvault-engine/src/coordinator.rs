//! Job coordinator
//!
//! Owns per-device execution state. A device has at most one in-flight
//! collection: scheduled dispatches for a busy device are recorded as skipped
//! jobs, ingestion commits wait for the lock instead. Every stage transition
//! is written to the job ledger before the stage starts.

use crate::adapter::{DeviceAdapter, Phase, Session};
use cfgvault_core::errors::{CvError, CvErrorKind};
use cfgvault_core::{
    log_op_end, log_op_error, log_op_start, CollectionJob, Device, FailureReason, JobStage,
    RawConfig, Snapshot, SnapshotOrigin, Trigger, VaultError,
};
use cfgvault_core_types::DeviceId;
use cfgvault_store::SnapshotStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify, OwnedMutexGuard, Semaphore};
use tokio::task::JoinHandle;

/// Upper bound on tearing a session down after a timeout
const CLOSE_GRACE: Duration = Duration::from_secs(5);

type Slot = Arc<tokio::sync::Mutex<()>>;
type SlotMap = Arc<Mutex<HashMap<DeviceId, Slot>>>;

/// Device id → lock slot, behind one coordination point
///
/// A slot lives only while a lease or a waiter refers to it, so ids seen
/// once (ingestion sources, retired devices) do not accumulate.
#[derive(Debug, Clone, Default)]
pub struct DeviceLocks {
    slots: SlotMap,
}

/// Exclusive right to work on one device; released on drop
#[derive(Debug)]
pub struct DeviceLease {
    device_id: DeviceId,
    guard: Option<OwnedMutexGuard<()>>,
    slot: Slot,
    slots: SlotMap,
}

impl DeviceLease {
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        // Release before pruning so a new slot never coexists with a held one.
        drop(self.guard.take());
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only handed out under the map lock: the map entry plus
        // ours means nobody else holds or waits on this slot.
        let idle = slots
            .get(&self.device_id)
            .is_some_and(|s| Arc::ptr_eq(s, &self.slot) && Arc::strong_count(s) == 2);
        if idle {
            slots.remove(&self.device_id);
        }
    }
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, device_id: &DeviceId) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(device_id.clone()).or_default().clone()
    }

    fn lease(&self, device_id: &DeviceId, slot: Slot, guard: OwnedMutexGuard<()>) -> DeviceLease {
        DeviceLease {
            device_id: device_id.clone(),
            guard: Some(guard),
            slot,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Take the lock if it is free
    pub fn try_acquire(&self, device_id: &DeviceId) -> Option<DeviceLease> {
        let slot = self.slot(device_id);
        let guard = Arc::clone(&slot).try_lock_owned().ok()?;
        Some(self.lease(device_id, slot, guard))
    }

    /// Wait for the lock
    pub async fn acquire(&self, device_id: &DeviceId) -> DeviceLease {
        let slot = self.slot(device_id);
        let guard = Arc::clone(&slot).lock_owned().await;
        self.lease(device_id, slot, guard)
    }

    pub fn is_locked(&self, device_id: &DeviceId) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(device_id)
            .is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Number of devices with a live slot
    pub fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub max_concurrent_jobs: usize,
    pub connect_timeout: Duration,
    pub collect_timeout: Duration,
}

/// Result of asking for a collection
#[derive(Debug)]
pub enum Dispatch {
    /// The job runs in the background; the handle yields the closed job
    Started(JoinHandle<CollectionJob>),
    /// The device was busy; the closed `skipped` job is returned
    AlreadyRunning(CollectionJob),
}

/// Counts running jobs so shutdown can wait for them
#[derive(Debug, Default)]
struct ActiveJobs {
    count: AtomicUsize,
    idle: Notify,
}

struct ActiveGuard(Arc<ActiveJobs>);

impl ActiveGuard {
    fn enter(jobs: &Arc<ActiveJobs>) -> Self {
        jobs.count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(jobs))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

pub struct JobCoordinator {
    store: Arc<SnapshotStore>,
    adapter: Arc<dyn DeviceAdapter>,
    locks: DeviceLocks,
    permits: Arc<Semaphore>,
    settings: CoordinatorSettings,
    shutdown: watch::Receiver<bool>,
    active: Arc<ActiveJobs>,
}

impl JobCoordinator {
    pub fn new(
        store: Arc<SnapshotStore>,
        adapter: Arc<dyn DeviceAdapter>,
        settings: CoordinatorSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            adapter,
            locks: DeviceLocks::new(),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_jobs)),
            settings,
            shutdown,
            active: Arc::new(ActiveJobs::default()),
        })
    }

    pub fn locks(&self) -> &DeviceLocks {
        &self.locks
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Number of dispatched jobs not yet closed
    pub fn active_jobs(&self) -> usize {
        self.active.count.load(Ordering::SeqCst)
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Start a collection for `device`, or record a skipped job if one is
    /// already in flight
    ///
    /// # Errors
    ///
    /// Ledger write failures. A database-level open-job conflict surfaces as
    /// `AlreadyRunning`.
    pub fn dispatch(self: &Arc<Self>, device: Device, trigger: Trigger) -> Result<Dispatch, CvError> {
        let now = Utc::now();
        let mut job = CollectionJob::pending(device.id.clone(), trigger, now);

        let Some(lease) = self.locks.try_acquire(&device.id) else {
            job.skip(now)?;
            self.store.insert_job(&job)?;
            tracing::info!(
                device_id = %device.id,
                job_id = %job.id,
                trigger = trigger.as_str(),
                "Collection already running; dispatch skipped"
            );
            return Ok(Dispatch::AlreadyRunning(job));
        };

        self.store.insert_job(&job)?;

        let guard = ActiveGuard::enter(&self.active);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            this.execute(job, device, lease).await
        });
        Ok(Dispatch::Started(handle))
    }

    async fn execute(&self, mut job: CollectionJob, device: Device, lease: DeviceLease) -> CollectionJob {
        let started = Instant::now();
        log_op_start!(
            "collect_job",
            device_id = %device.id,
            job_id = %job.id,
            trigger = job.trigger.as_str()
        );

        let result = self.drive(&mut job, &device).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(snapshot) => {
                if let Err(e) = job.succeed(snapshot.id.clone(), Utc::now()) {
                    tracing::error!(job_id = %job.id, error = %e, "Job could not be closed");
                }
                self.persist(&job);
                log_op_end!(
                    "collect_job",
                    duration_ms = duration_ms,
                    device_id = %device.id,
                    job_id = %job.id,
                    snapshot_id = %snapshot.id,
                    sequence = snapshot.sequence,
                    duplicate = snapshot.duplicate
                );
            }
            Err(err) => {
                let reason = FailureReason::from_kind(err.kind());
                if let Err(e) = job.fail(reason, err.code(), err.to_string(), Utc::now()) {
                    tracing::error!(job_id = %job.id, error = %e, "Job could not be closed");
                }
                self.persist(&job);
                log_op_error!(
                    "collect_job",
                    err,
                    duration_ms = duration_ms,
                    device_id = %device.id,
                    job_id = %job.id,
                    stage = job.state.name()
                );
            }
        }

        drop(lease);
        job
    }

    /// Pending → Connecting → Collecting → Committing
    async fn drive(&self, job: &mut CollectionJob, device: &Device) -> Result<Snapshot, CvError> {
        let _permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| cancelled(&device.id))?
            }
            _ = shutdown_requested(self.shutdown.clone()) => return Err(cancelled(&device.id)),
        };

        self.transition(job, JobStage::Connecting)?;
        let session = match tokio::time::timeout(self.settings.connect_timeout, self.adapter.open(device)).await {
            Err(_) => {
                return Err(VaultError::DeviceUnreachable {
                    device_id: device.id.to_string(),
                    reason: format!(
                        "connect timed out after {}",
                        humantime::format_duration(self.settings.connect_timeout)
                    ),
                }
                .into())
            }
            Ok(Err(e)) => return Err(e.into_vault_error(&device.id, Phase::Open).into()),
            Ok(Ok(session)) => session,
        };

        let (content, collected_at) = self.collect_and_close(job, device, session).await?;

        self.transition(job, JobStage::Committing)?;
        self.commit_blocking(device.id.clone(), content, collected_at, SnapshotOrigin::Poll)
            .await
    }

    async fn collect_and_close(
        &self,
        job: &mut CollectionJob,
        device: &Device,
        mut session: Box<dyn Session>,
    ) -> Result<(RawConfig, DateTime<Utc>), CvError> {
        if let Err(e) = self.transition(job, JobStage::Collecting) {
            close_session(session).await;
            return Err(e);
        }

        let started = Instant::now();
        let collected_at = Utc::now();
        let result = tokio::time::timeout(self.settings.collect_timeout, session.collect()).await;
        close_session(session).await;

        match result {
            Err(_) => Err(VaultError::CollectTimeout {
                device_id: device.id.to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
            .into()),
            Ok(Err(e)) => Err(e.into_vault_error(&device.id, Phase::Collect).into()),
            Ok(Ok(content)) => Ok((content, collected_at)),
        }
    }

    /// Refuses to enter a new stage once shutdown has been requested
    fn transition(&self, job: &mut CollectionJob, to: JobStage) -> Result<(), CvError> {
        if self.shutting_down() {
            return Err(cancelled(&job.device_id));
        }
        job.advance(to)?;
        self.store.update_job(job)?;
        Ok(())
    }

    fn persist(&self, job: &CollectionJob) {
        if let Err(e) = self.store.update_job(job) {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record job outcome");
        }
    }

    async fn commit_blocking(
        &self,
        device_id: DeviceId,
        content: RawConfig,
        collected_at: DateTime<Utc>,
        origin: SnapshotOrigin,
    ) -> Result<Snapshot, CvError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.commit(&device_id, &content, collected_at, origin))
            .await
            .map_err(|e| {
                CvError::new(CvErrorKind::Internal)
                    .with_op("commit")
                    .with_message(format!("commit task failed: {}", e))
            })?
    }

    /// Commit an ingested file under the device lock, waiting for any
    /// collection in flight on the same device
    ///
    /// # Errors
    ///
    /// Store failures from the commit.
    pub async fn commit_ingested(
        &self,
        device_id: &DeviceId,
        content: RawConfig,
        received_at: DateTime<Utc>,
    ) -> Result<Snapshot, CvError> {
        let lease = self.locks.acquire(device_id).await;
        let result = self
            .commit_blocking(device_id.clone(), content, received_at, SnapshotOrigin::Ingestion)
            .await;
        drop(lease);
        result
    }

    /// Wait until no job is running, at most `grace`
    ///
    /// Returns false if jobs were still running when the grace period ended.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.active.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.active_jobs() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, wait).await.is_ok()
    }
}

fn cancelled(device_id: &DeviceId) -> CvError {
    VaultError::ShutdownCancelled {
        device_id: device_id.to_string(),
    }
    .into()
}

async fn close_session(session: Box<dyn Session>) {
    if tokio::time::timeout(CLOSE_GRACE, session.close()).await.is_err() {
        tracing::warn!("Session close timed out; connection dropped");
    }
}

/// Resolves once `true` is published; never resolves if the sender is gone
pub(crate) async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
