//! `deploydb diff`: pull, then preview the scripts the next pass would run.
//! Nothing is executed or recorded.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use deploydb_sync::{PassMode, SyncOrchestrator};

use super::{home_dir, load_config, short_sha};
use super::sync::print_report;

/// Arguments for `deploydb diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {}

impl DiffArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let home = home_dir()?;
        let config = load_config(&home, config_path)?;

        let report = SyncOrchestrator::from_config(config)
            .run_pass(PassMode::DryRun)
            .context("failed to compute pending changes")?;

        if report.previous_commit.is_none() {
            println!(
                "No deployment recorded yet. The next `deploydb sync` records {} as the baseline without executing anything.",
                short_sha(&report.commit_id)
            );
            return Ok(());
        }
        if report.changes_detected && report.outcomes.is_empty() {
            println!("No deployable scripts changed.");
            return Ok(());
        }
        print_report(&report, PassMode::DryRun);
        Ok(())
    }
}
