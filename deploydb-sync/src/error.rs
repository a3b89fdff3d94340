//! Error types for deploydb-sync.

use std::path::PathBuf;

use thiserror::Error;

use deploydb_core::{ConfigError, DbError, SourceError};
use deploydb_detector::DetectError;

/// Errors that abort a deployment pass.
///
/// Per-file script failures never show up here; they are recorded in the
/// ledger and reported in the pass report.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Clone, pull or revision lookup failed.
    #[error("source control error: {0}")]
    Source(#[from] SourceError),

    /// Diff or classification failed.
    #[error(transparent)]
    Detect(#[from] DetectError),

    /// A target database or the bookkeeping database could not be reached
    /// or written.
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    /// Whether the failure is a connectivity problem (git remote or database)
    /// rather than a content problem in the repository.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            SyncError::Source(_) => true,
            SyncError::Detect(DetectError::Source(_)) => true,
            SyncError::Database(DbError::Connect { .. }) => true,
            SyncError::Database(_) => false,
            SyncError::Detect(_) | SyncError::Config(_) | SyncError::Io { .. } => false,
        }
    }
}

/// A policy rule could not reach a verdict.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("rule '{rule}' could not inspect {path}: {source}")]
    Lookup {
        rule: &'static str,
        path: String,
        #[source]
        source: DbError,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failures_are_infrastructure() {
        let err = SyncError::from(DbError::Connect {
            database: "SalesDB".to_string(),
            message: "unable to open database file".to_string(),
        });
        assert!(err.is_infrastructure());
    }

    #[test]
    fn classification_errors_are_not_infrastructure() {
        let err = SyncError::from(DetectError::Classify(
            deploydb_core::ClassifyError::UnknownObjectType {
                path: "db/Sequences/s.sql".to_string(),
                object_type: "Sequences".to_string(),
                expected: "Tables",
            },
        ));
        assert!(!err.is_infrastructure());
        assert!(err.to_string().contains("Sequences"));
    }
}
