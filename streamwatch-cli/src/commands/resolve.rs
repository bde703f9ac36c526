//! `streamwatch resolve <name>`

use anyhow::{Context, Result};
use clap::Args;

use streamwatch_daemon::request_resolve;

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Broadcaster login, display name or numeric id.
    pub name: String,
}

impl ResolveArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let resolved = request_resolve(&home, &self.name)
            .with_context(|| format!("could not resolve '{}'", self.name))?;
        println!("{}", resolved["owner_id"].as_str().unwrap_or_default());
        Ok(())
    }
}
