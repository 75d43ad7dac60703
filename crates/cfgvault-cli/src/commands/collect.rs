//! Queue collections for the running engine

use super::GlobalArgs;
use cfgvault_core_types::DeviceId;
use cfgvault_store::SnapshotStore;
use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct CollectArgs {
    /// Archive root; defaults to `storage.root` from the configuration
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Device to collect
    #[arg(required_unless_present_any = ["all", "pending"], conflicts_with_all = ["all", "pending"])]
    pub device: Option<String>,

    /// Collect every enabled device
    #[arg(long, conflicts_with = "pending")]
    pub all: bool,

    /// List requests the engine has not picked up yet
    #[arg(long)]
    pub pending: bool,
}

pub fn execute(global: &GlobalArgs, args: CollectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let root = match args.root {
        Some(root) => root,
        None => global.load_config()?.storage.root,
    };
    if !root.is_dir() {
        return Err(format!("no archive at {}", root.display()).into());
    }
    let store = SnapshotStore::open(&root)?;

    if args.pending {
        let pending = store.pending_collection_requests()?;
        if pending.is_empty() {
            println!("No pending collection requests");
        }
        for request in pending {
            let target = request
                .device_id
                .as_ref()
                .map_or_else(|| "all devices".to_string(), ToString::to_string);
            println!(
                "#{}  {}  requested {}",
                request.request_id,
                target,
                request.requested_at.to_rfc3339()
            );
        }
        return Ok(());
    }

    let device_id = args.device.map(DeviceId::new);
    let request_id = store.request_collection(device_id.as_ref())?;
    let target = device_id.map_or_else(|| "all devices".to_string(), |d| d.to_string());
    println!(
        "Queued collection request #{} for {}; the engine serves it on its next tick",
        request_id, target
    );
    Ok(())
}
