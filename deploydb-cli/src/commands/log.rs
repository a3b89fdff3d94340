//! `deploydb log`: audit listing of the execution ledger.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use deploydb_core::LedgerEntry;
use deploydb_sync::{LedgerQuery, SyncOrchestrator};

use super::{home_dir, load_config, short_sha};

/// Arguments for `deploydb log`.
#[derive(Args, Debug)]
pub struct LogArgs {
    /// Only entries for this commit (full id).
    #[arg(long)]
    pub commit: Option<String>,

    /// Only failed executions.
    #[arg(long)]
    pub failed: bool,

    /// Number of newest entries to show; 0 shows everything.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct LogRow {
    #[tabled(rename = "when")]
    when: String,
    #[tabled(rename = "commit")]
    commit: String,
    #[tabled(rename = "file")]
    file: String,
    #[tabled(rename = "result")]
    result: String,
    #[tabled(rename = "error")]
    error: String,
}

impl LogArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let home = home_dir()?;
        let config = load_config(&home, config_path)?;
        let orchestrator = SyncOrchestrator::from_config(config);
        let ledger = orchestrator.ledger();
        ledger
            .ensure_schema()
            .context("failed to prepare the execution ledger")?;

        let query = LedgerQuery {
            commit: self.commit,
            failed_only: self.failed,
            limit: (self.limit > 0).then_some(self.limit),
        };
        let entries = ledger
            .entries(&query)
            .context("failed to read the execution ledger")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&entries).context("failed to serialize ledger JSON")?
            );
            return Ok(());
        }

        if entries.is_empty() {
            println!("No ledger entries.");
            return Ok(());
        }

        let rows: Vec<LogRow> = entries.iter().map(log_row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn log_row(entry: &LedgerEntry) -> LogRow {
    LogRow {
        when: entry
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        commit: short_sha(&entry.commit_id).to_string(),
        file: entry.file_path.clone(),
        result: if entry.failed {
            "failed".red().to_string()
        } else {
            "ok".green().to_string()
        },
        error: entry
            .error
            .as_deref()
            .and_then(|e| e.lines().next())
            .unwrap_or_default()
            .to_string(),
    }
}
