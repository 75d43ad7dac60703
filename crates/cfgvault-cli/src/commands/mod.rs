pub mod collect;
pub mod credentials;
pub mod serve;
pub mod snapshot;

use cfgvault_engine::EngineConfig;
use std::path::PathBuf;

/// Flags shared by every subcommand
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub log_profile: Option<String>,
}

impl GlobalArgs {
    /// Configuration file plus environment, with the CLI log profile applied
    pub fn load_config(&self) -> Result<EngineConfig, Box<dyn std::error::Error>> {
        let mut config = EngineConfig::load(self.config.as_deref())?;
        if let Some(profile) = &self.log_profile {
            config.logging.profile = profile.clone();
        }
        Ok(config)
    }
}
