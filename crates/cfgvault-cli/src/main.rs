//! cfgvault CLI
//!
//! Runs the collection engine, queues manual collections and reads the
//! snapshot archive

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "cfgvault")]
#[command(about = "cfgvault - Network device configuration backup", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "CFGVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Logging profile: development, production or test
    #[arg(long, global = true, env = "CFGVAULT_LOG_PROFILE")]
    log_profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the scheduler, job coordinator and ingestion listener
    Serve,
    /// Read archived snapshots
    Snapshot(commands::snapshot::SnapshotArgs),
    /// Queue an immediate collection for the running engine
    Collect(commands::collect::CollectArgs),
    /// Seal secrets and check the credentials file
    #[command(subcommand)]
    Credentials(commands::credentials::CredentialsCommand),
}

fn main() {
    let cli = Cli::parse();
    let global = commands::GlobalArgs {
        config: cli.config,
        log_profile: cli.log_profile,
    };

    let result = match cli.command {
        Commands::Serve => commands::serve::execute(&global),
        Commands::Snapshot(args) => commands::snapshot::execute(&global, args),
        Commands::Collect(args) => commands::collect::execute(&global, args),
        Commands::Credentials(command) => commands::credentials::execute(&global, command),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
