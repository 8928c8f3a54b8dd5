use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::config::SutureSimConfig;

pub struct ConfigCommand {
    pub write: Option<PathBuf>,
}

impl ConfigCommand {
    pub fn new(write: Option<PathBuf>) -> Self {
        Self { write }
    }

    pub fn execute(&self, config: &SutureSimConfig) -> Result<()> {
        match &self.write {
            Some(path) => {
                config
                    .save_to_file(path)
                    .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
                println!("✅ Configuration written to {}", path.display());
            }
            None => print!("{}", config.to_toml()?),
        }
        Ok(())
    }
}
