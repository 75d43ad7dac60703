//! Snapshot archive commands

use super::GlobalArgs;
use cfgvault_core::Snapshot;
use cfgvault_core_types::{DeviceId, SnapshotId};
use cfgvault_store::SnapshotStore;
use clap::{Args, Subcommand};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// Archive root; defaults to `storage.root` from the configuration
    #[arg(long)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: SnapshotCommand,
}

#[derive(Debug, Subcommand)]
pub enum SnapshotCommand {
    /// List a device's snapshots in sequence order
    List(ListArgs),
    /// Print a snapshot's content after verifying its checksum
    Show(ShowArgs),
    /// Summarise every device with snapshots
    Devices,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    pub device: String,

    /// Only snapshots with a greater sequence number
    #[arg(long, default_value_t = 0)]
    pub after: u64,

    #[arg(long)]
    pub limit: Option<u32>,

    /// One JSON object per line
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    pub snapshot_id: String,

    /// Print metadata instead of content
    #[arg(long)]
    pub meta: bool,
}

pub fn execute(global: &GlobalArgs, args: SnapshotArgs) -> Result<(), Box<dyn std::error::Error>> {
    let root = match args.root {
        Some(root) => root,
        None => global.load_config()?.storage.root,
    };
    if !root.is_dir() {
        return Err(format!("no archive at {}", root.display()).into());
    }
    let store = SnapshotStore::open(&root)?;

    match args.command {
        SnapshotCommand::List(list) => execute_list(&store, list),
        SnapshotCommand::Show(show) => execute_show(&store, show),
        SnapshotCommand::Devices => execute_devices(&store),
    }
}

fn execute_list(store: &SnapshotStore, args: ListArgs) -> Result<(), Box<dyn std::error::Error>> {
    let device_id = DeviceId::new(args.device);
    let snapshots = store.list_after(&device_id, args.after, args.limit)?;

    if args.json {
        for snapshot in &snapshots {
            println!("{}", serde_json::to_string(snapshot)?);
        }
        return Ok(());
    }

    if snapshots.is_empty() {
        println!("No snapshots for {}", device_id);
        return Ok(());
    }
    println!(
        "{:>5}  {:<36}  {:<25}  {:<9}  {:>9}  dup",
        "seq", "snapshot_id", "collected_at", "origin", "bytes"
    );
    for s in &snapshots {
        println!(
            "{:>5}  {:<36}  {:<25}  {:<9}  {:>9}  {}",
            s.sequence,
            s.id,
            s.collected_at.to_rfc3339(),
            s.origin.as_str(),
            s.size_bytes,
            if s.duplicate { "yes" } else { "no" }
        );
    }
    Ok(())
}

fn execute_show(store: &SnapshotStore, args: ShowArgs) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot_id = SnapshotId::from_string(args.snapshot_id);

    if args.meta {
        let snapshot = store.verify(&snapshot_id)?;
        print_meta(&snapshot);
        return Ok(());
    }

    let content = store.read(&snapshot_id)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(content.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn print_meta(s: &Snapshot) {
    println!("snapshot_id: {}", s.id);
    println!("device_id: {}", s.device_id);
    println!("sequence: {}", s.sequence);
    println!("collected_at: {}", s.collected_at.to_rfc3339());
    println!("committed_at: {}", s.committed_at.to_rfc3339());
    println!("origin: {}", s.origin.as_str());
    println!("checksum: {}", s.checksum);
    println!("size_bytes: {}", s.size_bytes);
    println!("duplicate: {}", s.duplicate);
    println!("verified: ok");
}

fn execute_devices(store: &SnapshotStore) -> Result<(), Box<dyn std::error::Error>> {
    let summaries = store.device_summaries()?;
    if summaries.is_empty() {
        println!("No snapshots archived");
        return Ok(());
    }
    for d in summaries {
        println!(
            "{}  snapshots={}  head={}  last={}",
            d.device_id,
            d.snapshot_count,
            d.head_sequence,
            d.last_committed_at.to_rfc3339()
        );
    }
    Ok(())
}
