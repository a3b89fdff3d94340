//! deploydb core library: domain types, path classification, configuration,
//! and the capability traits the deployment engine consumes.
//!
//! - [`types`]: object types, changed files, ledger entries, pass reports
//! - [`config`]: YAML configuration load / save / validate
//! - [`database`]: abstract database capability
//! - [`source`]: abstract source-control capability
//! - [`error`]: error enums shared across the workspace

pub mod config;
pub mod database;
pub mod error;
pub mod source;
pub mod types;

pub use config::{Config, DbCreds, PollSettings};
pub use database::{Database, Row, Session, SqlValue};
pub use error::{ClassifyError, ConfigError, DbError, SourceError};
pub use source::{ChangeKind, DiffEntry, RemoteAuth, SourceControl};
pub use types::{
    classify, ChangedFile, FileFailure, FileOutcome, LedgerEntry, ObjectType, OutcomeStatus,
    PassReport,
};
