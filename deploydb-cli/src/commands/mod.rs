//! Subcommands, plus the config lookup they share.

pub mod check;
pub mod daemon;
pub mod diff;
pub mod init;
pub mod log;
pub mod status;
pub mod sync;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use deploydb_core::{config, Config};

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// `--config <path>` when given, `<home>/.deploydb/config.yaml` otherwise.
pub(crate) fn load_config(home: &Path, explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => config::load_from(path)
            .with_context(|| format!("failed to load config from '{}'", path.display())),
        None => config::load_at(home).context("failed to load config; run `deploydb init` first"),
    }
}

/// First ten characters of a commit id.
pub(crate) fn short_sha(sha: &str) -> &str {
    sha.get(..10).unwrap_or(sha)
}
