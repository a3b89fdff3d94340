//! YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.deploydb/
//!   config.yaml   (mode 0600, holds database credentials)
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::source::RemoteAuth;

// ---------------------------------------------------------------------------
// 1. Model
// ---------------------------------------------------------------------------

/// Database credentials. `default_db` hosts the execution ledger.
///
/// With the bundled SQLite backend `server` is the directory that holds one
/// `<database>.db` file per database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbCreds {
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_bookkeeping_db")]
    pub default_db: String,
    /// Connect-time timeout handed to the driver.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Unattended polling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Further attempts allowed after the first raised failure before the
    /// loop gives up.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_retry: default_max_retry(),
        }
    }
}

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Local checkout of the tracked branch.
    pub local_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_url: Option<String>,
    /// Private key used when cloning over SSH. `~/` is expanded.
    #[serde(default = "default_ssh_key")]
    pub ssh_key: PathBuf,
    pub target_branch: String,
    pub db_creds: DbCreds,
    #[serde(default)]
    pub poll: PollSettings,
}

fn default_bookkeeping_db() -> String {
    "deploydb".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_interval_secs() -> u64 {
    60
}

fn default_max_retry() -> u32 {
    5
}

fn default_ssh_key() -> PathBuf {
    PathBuf::from("~/.ssh/id_rsa")
}

impl Config {
    /// Check the values the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssh_url.is_none() && self.https_url.is_none() {
            return Err(ConfigError::Invalid(
                "no repository configured; set `ssh_url` or `https_url`".to_string(),
            ));
        }
        if self.target_branch.trim().is_empty() {
            return Err(ConfigError::Invalid("`target_branch` is empty".to_string()));
        }
        if self.local_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("`local_path` is empty".to_string()));
        }
        if self.db_creds.default_db.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "`db_creds.default_db` is empty".to_string(),
            ));
        }
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "`poll.interval_secs` must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Remote to clone from. SSH wins when both URLs are set.
    pub fn remote(&self) -> Option<RemoteAuth> {
        if let Some(url) = &self.ssh_url {
            return Some(RemoteAuth::Ssh {
                url: url.clone(),
                key: expand_home(&self.ssh_key),
            });
        }
        self.https_url
            .as_ref()
            .map(|url| RemoteAuth::Https { url: url.clone() })
    }

    /// Checkout path with `~/` expanded.
    pub fn checkout_path(&self) -> PathBuf {
        expand_home(&self.local_path)
    }
}

/// Expand a leading `~/` using the current home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

// ---------------------------------------------------------------------------
// 2. Paths
// ---------------------------------------------------------------------------

/// `<home>/.deploydb/`
pub fn config_dir_at(home: &Path) -> PathBuf {
    home.join(".deploydb")
}

/// `<home>/.deploydb/config.yaml`, pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    config_dir_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load and validate a config file at an explicit path.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let config: Config = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// Load `<home>/.deploydb/config.yaml`.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    load_from(&config_path_at(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 4. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `config` to `<home>/.deploydb/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<PathBuf, ConfigError> {
    let dir = config_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(config: &Config) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// 5. Scaffold
// ---------------------------------------------------------------------------

/// Template written by `deploydb init`.
pub fn template(home: &Path) -> Config {
    let root = config_dir_at(home);
    Config {
        local_path: root.join("checkout"),
        https_url: Some("https://example.com/org/database-scripts.git".to_string()),
        ssh_url: None,
        ssh_key: default_ssh_key(),
        target_branch: "main".to_string(),
        db_creds: DbCreds {
            server: root.join("databases").display().to_string(),
            user: None,
            password: None,
            default_db: default_bookkeeping_db(),
            timeout_secs: default_timeout_secs(),
        },
        poll: PollSettings::default(),
    }
}

/// Write the template config unless one already exists.
///
/// Idempotent: returns the existing config (unvalidated) if present.
pub fn scaffold_at(home: &Path) -> Result<(Config, bool), ConfigError> {
    let path = config_path_at(home);
    if path.exists() {
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let existing = serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::Parse { path, source: e })?;
        return Ok((existing, false));
    }
    let config = template(home);
    save_at(home, &config)?;
    Ok((config, true))
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
