//! `deploydb daemon`: foreground polling loop and its control socket.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use deploydb_daemon::paths::socket_path;
use deploydb_daemon::{
    request_status, request_stop, request_sync, start_blocking, start_blocking_with_config,
    DaemonError, LoopExit,
};
use deploydb_sync::PassMode;

use super::{home_dir, load_config};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the polling loop in the foreground.
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Ask a running daemon to run a pass now.
    Sync(DaemonSyncArgs),
}

#[derive(Args, Debug)]
pub struct DaemonSyncArgs {
    /// Report what would run without executing anything.
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(command: DaemonCommand, config_path: Option<&Path>) -> Result<()> {
    let home = home_dir()?;

    match command {
        DaemonCommand::Start => {
            let exit = match config_path {
                Some(_) => {
                    let config = load_config(&home, config_path)?;
                    start_blocking_with_config(&home, config)
                }
                None => start_blocking(&home),
            }
            .context("daemon exited with error")?;

            if let LoopExit::RetryLimitReached {
                failures,
                last_error,
            } = exit
            {
                bail!("daemon gave up after {failures} consecutive failed passes: {last_error}");
            }
            println!("daemon stopped");
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let payload = serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Sync(args) => {
            let mode = if args.dry_run {
                PassMode::DryRun
            } else {
                PassMode::Execute
            };
            let report = request_sync(&home, mode).context("daemon pass failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render pass report")?
            );
        }
    }

    Ok(())
}
