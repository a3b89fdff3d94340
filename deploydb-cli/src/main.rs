//! deploydb: deploy SQL scripts from git, once per commit, in dependency order.
//!
//! # Usage
//!
//! ```text
//! deploydb init [--https-url <url> | --ssh-url <url>] [--branch <name>] [--server <dir>]
//! deploydb check
//! deploydb sync [--dry-run | --baseline] [--json]
//! deploydb diff
//! deploydb status [--json]
//! deploydb log [--commit <sha>] [--failed] [--limit <n>] [--json]
//! deploydb daemon start|stop|status|sync
//! ```
//!
//! Every command except `init` reads `~/.deploydb/config.yaml`, or the file
//! given with `--config`.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    check::CheckArgs, daemon::DaemonCommand, diff::DiffArgs, init::InitArgs, log::LogArgs,
    status::StatusArgs, sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "deploydb",
    version,
    about = "Deploy changed SQL scripts from a git branch into their databases",
    long_about = None,
)]
struct Cli {
    /// Config file to use instead of ~/.deploydb/config.yaml.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter config to ~/.deploydb/config.yaml.
    Init(InitArgs),

    /// Verify the config and the database connection; create the ledger tables.
    Check(CheckArgs),

    /// Pull, detect changed scripts and deploy them once.
    Sync(SyncArgs),

    /// Pull and preview the scripts the next pass would run.
    Diff(DiffArgs),

    /// Show the deployment pointer, checkout head and pending scripts.
    Status(StatusArgs),

    /// List execution ledger entries.
    Log(LogArgs),

    /// Run or control the polling daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    deploydb_daemon::init_tracing();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Check(args) => args.run(config),
        Commands::Sync(args) => args.run(config),
        Commands::Diff(args) => args.run(config),
        Commands::Status(args) => args.run(config),
        Commands::Log(args) => args.run(config),
        Commands::Daemon { command } => commands::daemon::run(command, config),
    }
}
