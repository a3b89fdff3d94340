//! `deploydb sync`: run one deployment pass in the foreground.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use deploydb_core::{OutcomeStatus, PassReport};
use deploydb_sync::{PassMode, SyncOrchestrator};

use super::{home_dir, load_config, short_sha};

/// Arguments for `deploydb sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Report what would run without executing or recording anything.
    #[arg(long, conflicts_with = "baseline")]
    pub dry_run: bool,

    /// Record the current head as deployed without executing any script.
    #[arg(long)]
    pub baseline: bool,

    /// Emit the pass report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    fn mode(&self) -> PassMode {
        if self.dry_run {
            PassMode::DryRun
        } else if self.baseline {
            PassMode::Baseline
        } else {
            PassMode::Execute
        }
    }

    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let home = home_dir()?;
        let config = load_config(&home, config_path)?;
        let mode = self.mode();

        let report = SyncOrchestrator::from_config(config)
            .run_pass(mode)
            .context("deployment pass failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize pass report")?
            );
        } else {
            print_report(&report, mode);
        }

        if report.had_failures {
            bail!(
                "{} script(s) failed at {}; see `deploydb log --failed`",
                report.failures.len(),
                short_sha(&report.commit_id)
            );
        }
        Ok(())
    }
}

pub(crate) fn print_report(report: &PassReport, mode: PassMode) {
    let prefix = match mode {
        PassMode::DryRun => "[dry-run] ",
        PassMode::Baseline => "[baseline] ",
        PassMode::Execute => "",
    };

    if !report.changes_detected {
        println!(
            "{prefix}✓ up to date at {}",
            short_sha(&report.commit_id)
        );
        return;
    }

    let from = report
        .previous_commit
        .as_deref()
        .map(short_sha)
        .unwrap_or("(first run)");
    println!("{prefix}{from} → {}", short_sha(&report.commit_id));

    for outcome in &report.outcomes {
        println!("  {} {}", outcome_label(&outcome.status), outcome.path);
        if let OutcomeStatus::Failed { message } = &outcome.status {
            let first = message.lines().next().unwrap_or_default();
            println!("      {}", first.red());
        }
    }

    let executed = report.count(|s| matches!(s, OutcomeStatus::Executed | OutcomeStatus::Planned));
    let skipped = report.count(|s| {
        matches!(
            s,
            OutcomeStatus::AlreadyExecuted | OutcomeStatus::Rejected { .. } | OutcomeStatus::Missing
        )
    });
    let verb = if mode == PassMode::DryRun {
        "planned"
    } else {
        "executed"
    };
    println!(
        "{prefix}{executed} {verb}, {skipped} skipped, {} failed{}",
        report.failures.len(),
        if report.pointer_advanced {
            ", pointer advanced"
        } else {
            ""
        }
    );
}

pub(crate) fn outcome_label(status: &OutcomeStatus) -> String {
    match status {
        OutcomeStatus::Executed => "EXECUTED".green().bold().to_string(),
        OutcomeStatus::Planned => "PLANNED ".cyan().bold().to_string(),
        OutcomeStatus::AlreadyExecuted => "DONE    ".bright_black().to_string(),
        OutcomeStatus::Rejected { .. } => "SKIPPED ".yellow().to_string(),
        OutcomeStatus::Missing => "MISSING ".yellow().to_string(),
        OutcomeStatus::Failed { .. } => "FAILED  ".red().bold().to_string(),
    }
}
