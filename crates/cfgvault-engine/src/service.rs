//! Engine lifecycle
//!
//! Builds the runtime from configuration, runs scheduler, coordinator and
//! ingestion until the shutdown signal resolves, then drains.

use crate::adapter::{AdapterSettings, CliAdapter, DeviceAdapter};
use crate::config::EngineConfig;
use crate::coordinator::{CoordinatorSettings, JobCoordinator};
use crate::ingestion::ftp::staged_uploads;
use crate::ingestion::{FtpListener, FtpSettings, IngestionPipeline};
use crate::scheduler::Scheduler;
use cfgvault_core::errors::CvError;
use cfgvault_core::{DeviceCatalog, IngestionRules};
use cfgvault_store::errors::io_error;
use cfgvault_store::{SnapshotStore, SqliteDeviceCatalog};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const INGESTION_QUEUE: usize = 64;

pub struct Engine {
    config: EngineConfig,
    store: Arc<SnapshotStore>,
    catalog: Arc<dyn DeviceCatalog>,
    adapter: Arc<dyn DeviceAdapter>,
}

impl Engine {
    /// Open the store and catalog and load credentials
    ///
    /// # Errors
    ///
    /// Store, catalog or credential file failures.
    pub fn build(config: EngineConfig) -> Result<Self, CvError> {
        let store = SnapshotStore::open(&config.storage.root)?;
        let catalog = SqliteDeviceCatalog::open(config.catalog_path())?;
        let credentials = config.credentials.load()?;
        tracing::info!(
            credentials = credentials.len(),
            root = %config.storage.root.display(),
            "Engine components loaded"
        );

        let adapter = CliAdapter::new(
            Arc::new(credentials),
            AdapterSettings {
                max_output_bytes: config.engine.max_output_bytes,
                inactivity_timeout: config.engine.per_device_collect_timeout,
            },
        );
        Ok(Self::with_parts(
            config,
            Arc::new(store),
            Arc::new(catalog),
            Arc::new(adapter),
        ))
    }

    pub fn with_parts(
        config: EngineConfig,
        store: Arc<SnapshotStore>,
        catalog: Arc<dyn DeviceCatalog>,
        adapter: Arc<dyn DeviceAdapter>,
    ) -> Self {
        Self {
            config,
            store,
            catalog,
            adapter,
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Run until `shutdown_signal` resolves
    ///
    /// Jobs left open by a previous process are closed as interrupted before
    /// anything is scheduled. On shutdown no new stage starts; running jobs
    /// get `engine.shutdown_grace` to finish.
    ///
    /// # Errors
    ///
    /// Startup failures only: reaping the job ledger or binding the
    /// ingestion listener.
    pub async fn run<F>(self, shutdown_signal: F) -> Result<(), CvError>
    where
        F: Future<Output = ()>,
    {
        self.store.reap_interrupted_jobs(Utc::now())?;

        let engine = &self.config.engine;
        let (stop_tx, stop_rx) = watch::channel(false);
        let coordinator = JobCoordinator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.adapter),
            CoordinatorSettings {
                max_concurrent_jobs: engine.max_concurrent_jobs,
                connect_timeout: engine.connect_timeout,
                collect_timeout: engine.per_device_collect_timeout,
            },
            stop_rx.clone(),
        );

        let mut background: Vec<JoinHandle<()>> = Vec::new();
        if self.config.ingestion.enabled {
            background.extend(self.start_ingestion(&coordinator, stop_rx.clone()).await?);
        }

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&self.catalog),
            Arc::clone(&coordinator),
        ));
        let scheduler_task = tokio::spawn(scheduler.run(engine.poll_tick_interval, stop_rx));

        tracing::info!(
            max_concurrent_jobs = engine.max_concurrent_jobs,
            ingestion = self.config.ingestion.enabled,
            "Engine started"
        );
        shutdown_signal.await;

        tracing::info!("Engine stopping");
        let _ = stop_tx.send(true);
        if let Err(e) = scheduler_task.await {
            tracing::error!(error = %e, "Scheduler task failed");
        }

        let grace = engine.shutdown_grace;
        if !coordinator.wait_idle(grace).await {
            tracing::warn!(
                running = coordinator.active_jobs(),
                "Jobs still running after shutdown grace; they will be reaped on next start"
            );
        }
        for task in background {
            if tokio::time::timeout(grace, task).await.is_err() {
                tracing::warn!("Ingestion task did not stop within shutdown grace");
            }
        }
        tracing::info!("Engine stopped");
        Ok(())
    }

    async fn start_ingestion(
        &self,
        coordinator: &Arc<JobCoordinator>,
        stop: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>, CvError> {
        let section = &self.config.ingestion;
        let addr = section.bind_addr()?;
        let (events_tx, events_rx) = mpsc::channel(INGESTION_QUEUE);

        let listener = FtpListener::bind(addr, FtpSettings::from_config(section), events_tx, stop)
            .await
            .map_err(|e| io_error("bind_ingestion", e))?;
        let pipeline = IngestionPipeline::new(
            Arc::clone(coordinator),
            IngestionRules {
                group: section.source_group.clone(),
                expected_file_name: section.expected_file_name.clone(),
            },
        );
        let staged = staged_uploads(&section.root);
        if !staged.is_empty() {
            tracing::warn!(count = staged.len(), "Archiving uploads staged before the last stop");
        }
        for event in staged {
            pipeline.handle(event).await;
        }

        Ok(vec![
            tokio::spawn(pipeline.run(events_rx)),
            tokio::spawn(listener.serve()),
        ])
    }
}
