//! `deploydb status`: pointer, checkout head and pending scripts.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use deploydb_core::{ChangedFile, LedgerEntry};
use deploydb_sync::{DeployStatus, SyncOrchestrator};

use super::{home_dir, load_config, short_sha};

/// Arguments for `deploydb status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusJson {
    branch: String,
    #[serde(flatten)]
    status: DeployStatus,
    last_failures: Vec<LedgerEntry>,
}

#[derive(Tabled)]
struct PendingRow {
    #[tabled(rename = "#")]
    order: usize,
    #[tabled(rename = "database")]
    database: String,
    #[tabled(rename = "type")]
    object_type: String,
    #[tabled(rename = "object")]
    object: String,
}

impl StatusArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let home = home_dir()?;
        let config = load_config(&home, config_path)?;
        let branch = config.target_branch.clone();
        let orchestrator = SyncOrchestrator::from_config(config);

        let status = orchestrator
            .status()
            .context("failed to read deployment status")?;
        let last_failures = match status.pointer.as_deref() {
            Some(pointer) => orchestrator
                .ledger()
                .failures_for(pointer)
                .context("failed to read the execution ledger")?,
            None => Vec::new(),
        };

        if self.json {
            let payload = StatusJson {
                branch,
                status,
                last_failures,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_status(&branch, &status, &last_failures);
        Ok(())
    }
}

fn print_status(branch: &str, status: &DeployStatus, last_failures: &[LedgerEntry]) {
    println!("deploydb v{} | branch {branch}", env!("CARGO_PKG_VERSION"));
    println!(
        "  deployed: {}",
        status
            .pointer
            .as_deref()
            .map(short_sha)
            .unwrap_or("never")
    );
    println!(
        "  checkout: {}",
        status
            .checkout_head
            .as_deref()
            .map(short_sha)
            .unwrap_or("not cloned")
    );
    if !last_failures.is_empty() {
        println!(
            "  {} at the deployed commit",
            format!("{} failed script(s)", last_failures.len()).red()
        );
    }

    if status.pending.is_empty() {
        println!("{} nothing pending", "✓".green());
        return;
    }

    println!("{} pending script(s):", status.pending.len());
    let rows: Vec<PendingRow> = status
        .pending
        .iter()
        .enumerate()
        .map(|(i, file)| pending_row(i + 1, file))
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("Run 'deploydb sync' to deploy them.");
}

fn pending_row(order: usize, file: &ChangedFile) -> PendingRow {
    PendingRow {
        order,
        database: file.database.clone(),
        object_type: file.object_type.to_string(),
        object: file.object_name.clone(),
    }
}
