//! Credentials file helpers

use super::GlobalArgs;
use clap::Subcommand;
use std::io::{BufRead, Write};

#[derive(Debug, Subcommand)]
pub enum CredentialsCommand {
    /// Seal a secret read from stdin into an `enc:v1:` value
    Encrypt,
    /// Load the configured credentials file and list its entries
    Check,
}

pub fn execute(
    global: &GlobalArgs,
    command: CredentialsCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = global.load_config()?;
    let section = &config.credentials;

    match command {
        CredentialsCommand::Encrypt => {
            let key = section.master_key()?.ok_or_else(|| {
                format!("{} is not set; export the master key first", section.master_key_env)
            })?;
            let mut secret = String::new();
            std::io::stdin().lock().read_line(&mut secret)?;
            let secret = secret.trim_end_matches(['\r', '\n']);
            if secret.is_empty() {
                return Err("no secret on stdin".into());
            }
            let token = key.seal(secret)?;
            writeln!(std::io::stdout().lock(), "{}", token)?;
        }
        CredentialsCommand::Check => {
            let store = section.load()?;
            println!("{}: {} credential(s)", section.file.display(), store.len());
            for name in store.names() {
                println!("  {}", name);
            }
        }
    }
    Ok(())
}
