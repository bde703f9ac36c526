//! `streamwatch init`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use streamwatch_core::config;

/// Write a template config unless one already exists.
#[derive(Args, Debug)]
pub struct InitArgs {}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let existed = config::config_path_at(&home).exists();
        let (path, _) = config::init_at(&home).context("failed to write template config")?;

        if existed {
            println!("Config already exists at {}", path.display());
            return Ok(());
        }
        println!("{} Wrote template config to {}", "✓".green(), path.display());
        println!("  Fill in the credentials and channel ids, then run `streamwatch check`.");
        Ok(())
    }
}
