//! `deploydb check`: config, database connectivity and ledger schema.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use deploydb_sync::SyncOrchestrator;

use super::{home_dir, load_config};

#[derive(Args, Debug)]
pub struct CheckArgs {}

impl CheckArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let home = home_dir()?;
        let config = load_config(&home, config_path)?;
        let remote = config
            .ssh_url
            .clone()
            .or_else(|| config.https_url.clone())
            .unwrap_or_default();
        println!("{} config valid", "✓".green());
        println!("  repository: {remote} ({})", config.target_branch);
        println!("  checkout:   {}", config.checkout_path().display());

        let database = config.db_creds.default_db.clone();
        let orchestrator = SyncOrchestrator::from_config(config);
        orchestrator
            .check()
            .with_context(|| format!("cannot reach bookkeeping database '{database}'"))?;
        println!("{} database '{database}' reachable, ledger ready", "✓".green());
        Ok(())
    }
}
