#![allow(dead_code)]

use async_trait::async_trait;
use cfgvault_core::{Device, RawConfig, VendorVariant};
use cfgvault_core_types::DeviceId;
use cfgvault_engine::adapter::{AdapterError, DeviceAdapter, Session};
use cfgvault_engine::{CoordinatorSettings, JobCoordinator};
use cfgvault_store::SnapshotStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{watch, Notify};

/// What the fake device does when collected
#[derive(Clone)]
pub enum Script {
    Output(Vec<u8>),
    RefuseConnect,
    HangCollect,
    /// Wait for the notify, then return the output
    Gated(Arc<Notify>, Vec<u8>),
}

/// Scripted in-memory device adapter
#[derive(Default)]
pub struct FakeAdapter {
    scripts: Mutex<HashMap<DeviceId, Script>>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl FakeAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, device: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(DeviceId::new(device), script);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeSession {
    script: Script,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl Session for FakeSession {
    async fn collect(&mut self) -> Result<RawConfig, AdapterError> {
        match &self.script {
            Script::Output(bytes) => Ok(RawConfig::new(bytes.clone())),
            Script::HangCollect => {
                std::future::pending::<()>().await;
                Err(AdapterError::Closed)
            }
            Script::Gated(release, bytes) => {
                release.notified().await;
                Ok(RawConfig::new(bytes.clone()))
            }
            Script::RefuseConnect => Err(AdapterError::Closed),
        }
    }

    async fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceAdapter for FakeAdapter {
    async fn open(&self, device: &Device) -> Result<Box<dyn Session>, AdapterError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&device.id)
            .cloned()
            .unwrap_or_else(|| Script::Output(format!("hostname {}\n", device.id).into_bytes()));
        if let Script::RefuseConnect = script {
            return Err(AdapterError::Connect("connection refused".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            script,
            closed: Arc::clone(&self.closed),
        }))
    }
}

pub fn settings() -> CoordinatorSettings {
    CoordinatorSettings {
        max_concurrent_jobs: 4,
        connect_timeout: Duration::from_secs(2),
        collect_timeout: Duration::from_secs(2),
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<SnapshotStore>,
    pub adapter: Arc<FakeAdapter>,
    pub coordinator: Arc<JobCoordinator>,
    pub shutdown: watch::Sender<bool>,
}

pub fn harness_with(settings: CoordinatorSettings) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let store = Arc::new(SnapshotStore::open(dir.path().join("archive")).expect("open store"));
    let adapter = FakeAdapter::new();
    let (shutdown, rx) = watch::channel(false);
    let coordinator = JobCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&adapter) as Arc<dyn DeviceAdapter>,
        settings,
        rx,
    );
    Harness {
        dir,
        store,
        adapter,
        coordinator,
        shutdown,
    }
}

pub fn harness() -> Harness {
    harness_with(settings())
}

pub fn device(id: &str) -> Device {
    Device::new(id, VendorVariant::Cisco, "192.0.2.10", "lab")
}
