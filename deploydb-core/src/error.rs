//! Error types for deploydb-core.

use std::path::PathBuf;

use thiserror::Error;

/// A repository path had the deployable shape but named an object-type
/// folder outside the fixed execution order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("unknown object type '{object_type}' in '{path}'; expected one of: {expected}")]
    UnknownObjectType {
        path: String,
        object_type: String,
        expected: &'static str,
    },
}

/// All errors that can arise from configuration handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.deploydb/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}; run `deploydb init` first")]
    NotFound { path: PathBuf },

    /// The file parsed but holds values the engine cannot run with.
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

/// Errors surfaced by a [`crate::Database`] implementation.
///
/// `Database` is a structured error reported by the engine itself (bad SQL,
/// constraint violation, missing object); its message is what gets written to
/// the ledger. `Unexpected` covers everything else and carries a full
/// diagnostic trace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    #[error("cannot connect to database '{database}': {message}")]
    Connect { database: String, message: String },

    #[error("{message}")]
    Database { message: String },

    #[error("unexpected database failure: {trace}")]
    Unexpected { trace: String },
}

impl DbError {
    /// Text recorded in the execution ledger for a failed attempt.
    pub fn ledger_message(&self) -> String {
        match self {
            DbError::Connect { .. } => self.to_string(),
            DbError::Database { message } => message.clone(),
            DbError::Unexpected { trace } => trace.clone(),
        }
    }
}

/// Errors surfaced by a [`crate::SourceControl`] implementation.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("no repository configured; set `ssh_url` or `https_url`")]
    NoRemote,

    #[error("unexpected output from `{command}`: {detail}")]
    Output { command: String, detail: String },
}
