//! `deploydb init [--https-url <url> | --ssh-url <url>] [--branch <name>] [--server <dir>]`

use anyhow::{Context, Result};
use clap::Args;

use deploydb_core::config;

use super::home_dir;

/// Write a starter config, or update fields of an existing one.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// HTTPS clone URL of the script repository.
    #[arg(long, conflicts_with = "ssh_url")]
    pub https_url: Option<String>,

    /// SSH clone URL; takes precedence over HTTPS when both end up configured.
    #[arg(long)]
    pub ssh_url: Option<String>,

    /// Branch to track.
    #[arg(long)]
    pub branch: Option<String>,

    /// Directory holding one SQLite file per target database.
    #[arg(long, value_name = "DIR")]
    pub server: Option<String>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let (mut config, created) =
            config::scaffold_at(&home).context("failed to scaffold config")?;

        let mut updated = false;
        if let Some(url) = self.https_url {
            config.https_url = Some(url);
            config.ssh_url = None;
            updated = true;
        }
        if let Some(url) = self.ssh_url {
            config.ssh_url = Some(url);
            updated = true;
        }
        if let Some(branch) = self.branch {
            config.target_branch = branch;
            updated = true;
        }
        if let Some(server) = self.server {
            config.db_creds.server = server;
            updated = true;
        }

        let path = if updated {
            config.validate().context("refusing to save an invalid config")?;
            config::save_at(&home, &config).context("failed to save config")?
        } else {
            config::config_path_at(&home)
        };

        if created {
            println!("✓ Wrote config to {}", path.display());
        } else if updated {
            println!("✓ Updated config at {}", path.display());
        } else {
            println!("Config already exists at {}", path.display());
        }
        println!("  Edit it, then run `deploydb check`.");
        Ok(())
    }
}
