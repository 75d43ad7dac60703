//! Collection scheduler
//!
//! One deterministic loop: at every poll tick read the catalog, serve queued
//! collection requests, then decide which devices are due and hand them to
//! the coordinator in device-id order. Failed jobs are not retried within a
//! tick; the next tick sees them due again.

use crate::coordinator::{shutdown_requested, Dispatch, JobCoordinator};
use cfgvault_core::errors::CvError;
use cfgvault_core::{log_op_end, log_op_error, log_op_start};
use cfgvault_core::{CollectionJob, Device, DeviceCatalog, Trigger, VaultError};
use cfgvault_core_types::DeviceId;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What one tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub dispatched: usize,
    /// Due, but a collection was already in flight
    pub deferred: usize,
    pub not_due: usize,
    /// Catalog rows that failed to parse or validate
    pub invalid: usize,
    /// Devices whose due check could not be evaluated
    pub errors: usize,
    /// Manual collections started from queued requests
    pub requested: usize,
    /// Queued requests naming a device the catalog does not know
    pub unmatched_requests: usize,
    pub jobs: Vec<JoinHandle<CollectionJob>>,
}

pub struct Scheduler {
    catalog: Arc<dyn DeviceCatalog>,
    coordinator: Arc<JobCoordinator>,
}

impl Scheduler {
    pub fn new(catalog: Arc<dyn DeviceCatalog>, coordinator: Arc<JobCoordinator>) -> Self {
        Self {
            catalog,
            coordinator,
        }
    }

    /// Valid, enabled devices in id order; everything else is counted
    fn load_devices(&self, report: &mut TickReport) -> Result<Vec<Device>, CvError> {
        let mut devices = Vec::new();
        for entry in self.catalog.devices()? {
            match entry.and_then(|device| device.validate().map(|()| device)) {
                Ok(device) => devices.push(device),
                Err(e) => {
                    report.invalid += 1;
                    tracing::warn!(error = %e, "Skipping invalid device record");
                }
            }
        }
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(devices)
    }

    /// Evaluate every device once against `now`
    ///
    /// # Errors
    ///
    /// Only if the catalog cannot be read at all; per-device problems are
    /// counted in the report.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, CvError> {
        let started = Instant::now();
        log_op_start!("scheduler_tick");

        let mut report = TickReport::default();
        let devices = match self.load_devices(&mut report) {
            Ok(devices) => devices,
            Err(e) => {
                log_op_error!(
                    "scheduler_tick",
                    e.clone(),
                    duration_ms = started.elapsed().as_millis() as u64
                );
                return Err(e);
            }
        };

        let requested = self.serve_requests(&devices, now, &mut report);

        for device in devices {
            if requested.contains(&device.id) {
                continue;
            }
            let Some(cadence) = device.cadence.as_ref().filter(|_| device.enabled) else {
                continue;
            };

            let last_success = match self.coordinator.store().last_success(&device.id) {
                Ok(last) => last,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(device_id = %device.id, error = %e, "Due check failed");
                    continue;
                }
            };
            if !cadence.is_due(last_success, now) {
                report.not_due += 1;
                continue;
            }

            let device_id = device.id.clone();
            match self.coordinator.dispatch(device, Trigger::Scheduled) {
                Ok(Dispatch::Started(handle)) => {
                    report.dispatched += 1;
                    report.jobs.push(handle);
                }
                Ok(Dispatch::AlreadyRunning(_)) => report.deferred += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(device_id = %device_id, error = %e, "Dispatch failed");
                }
            }
        }

        log_op_end!(
            "scheduler_tick",
            duration_ms = started.elapsed().as_millis() as u64,
            dispatched = report.dispatched,
            deferred = report.deferred,
            requested = report.requested,
            not_due = report.not_due,
            invalid = report.invalid
        );
        Ok(report)
    }

    /// Claim queued requests and start a manual collection for each device
    ///
    /// Returns the ids handled, so the due check does not dispatch them twice.
    fn serve_requests(
        &self,
        devices: &[Device],
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> BTreeSet<DeviceId> {
        let mut handled = BTreeSet::new();
        let requests = match self.coordinator.store().claim_collection_requests(now) {
            Ok(requests) => requests,
            Err(e) => {
                tracing::error!(error = %e, "Cannot read collection requests");
                return handled;
            }
        };

        for request in requests {
            let targets: Vec<&Device> = match &request.device_id {
                Some(id) => devices.iter().filter(|d| &d.id == id).collect(),
                None => devices.iter().filter(|d| d.enabled).collect(),
            };
            if targets.is_empty() {
                if let Some(id) = &request.device_id {
                    report.unmatched_requests += 1;
                    tracing::warn!(
                        request_id = request.request_id,
                        device_id = %id,
                        "Collection request for unknown device"
                    );
                }
                continue;
            }
            for device in targets {
                if !handled.insert(device.id.clone()) {
                    continue;
                }
                tracing::info!(
                    request_id = request.request_id,
                    device_id = %device.id,
                    "Serving collection request"
                );
                match self.dispatch_manual(device.clone()) {
                    Ok(Dispatch::Started(handle)) => {
                        report.requested += 1;
                        report.jobs.push(handle);
                    }
                    Ok(Dispatch::AlreadyRunning(_)) => report.deferred += 1,
                    Err(e) => {
                        report.errors += 1;
                        tracing::error!(device_id = %device.id, error = %e, "Dispatch failed");
                    }
                }
            }
        }
        handled
    }

    fn dispatch_manual(&self, device: Device) -> Result<Dispatch, CvError> {
        self.coordinator.dispatch(device, Trigger::Manual)
    }

    /// Collect one device now, regardless of cadence
    ///
    /// # Errors
    ///
    /// `NotFound` if the catalog has no valid record for the device.
    pub fn trigger_manual(&self, device_id: &DeviceId) -> Result<Dispatch, CvError> {
        let mut ignored = TickReport::default();
        let device = self
            .load_devices(&mut ignored)?
            .into_iter()
            .find(|d| &d.id == device_id)
            .ok_or_else(|| VaultError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;
        self.dispatch_manual(device)
    }

    /// Tick every `period` until shutdown is requested
    pub async fn run(self: Arc<Self>, period: Duration, shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            period = %humantime::format_duration(period),
            "Scheduler started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_requested(shutdown.clone()) => break,
            }
            // Errors were logged by `tick`; the next tick retries.
            let _ = self.tick(Utc::now());
        }
        tracing::info!("Scheduler stopped");
    }
}
