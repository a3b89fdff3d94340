//! Domain types for the deployment engine.
//!
//! Repository paths are kept as `/`-separated `String`s: they are ledger keys
//! and must compare identically on every platform. Filesystem locations are
//! built by joining them onto the checkout `PathBuf`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;

// ---------------------------------------------------------------------------
// Object types
// ---------------------------------------------------------------------------

/// Kind of database object a script folder holds.
///
/// Declaration order is execution order: a `Tables` script runs after the
/// `Types` it depends on and before the `Views` that read from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectType {
    Types,
    Tables,
    DDLs,
    Functions,
    Views,
    StoredProcedures,
    Triggers,
    DMLs,
}

const EXPECTED_FOLDERS: &str =
    "Types, Tables, DDLs, Functions, Views, StoredProcedures, Triggers, DMLs";

impl ObjectType {
    /// All object types in execution order.
    pub fn all() -> &'static [ObjectType] {
        &[
            ObjectType::Types,
            ObjectType::Tables,
            ObjectType::DDLs,
            ObjectType::Functions,
            ObjectType::Views,
            ObjectType::StoredProcedures,
            ObjectType::Triggers,
            ObjectType::DMLs,
        ]
    }

    /// Position in the execution order; lower runs first.
    pub fn priority(self) -> usize {
        self as usize
    }

    /// Folder name used in the repository layout.
    pub fn folder(self) -> &'static str {
        match self {
            ObjectType::Types => "Types",
            ObjectType::Tables => "Tables",
            ObjectType::DDLs => "DDLs",
            ObjectType::Functions => "Functions",
            ObjectType::Views => "Views",
            ObjectType::StoredProcedures => "StoredProcedures",
            ObjectType::Triggers => "Triggers",
            ObjectType::DMLs => "DMLs",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Types" => Ok(ObjectType::Types),
            "Tables" => Ok(ObjectType::Tables),
            "DDLs" => Ok(ObjectType::DDLs),
            "Functions" => Ok(ObjectType::Functions),
            "Views" => Ok(ObjectType::Views),
            // The script generator writes the hyphenated folder name.
            "StoredProcedures" | "Stored-Procedures" => Ok(ObjectType::StoredProcedures),
            "Triggers" => Ok(ObjectType::Triggers),
            "DMLs" => Ok(ObjectType::DMLs),
            other => Err(format!(
                "unknown object type '{other}'; expected: {EXPECTED_FOLDERS}"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// ChangedFile
// ---------------------------------------------------------------------------

/// A deployable script, derived from its repository-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangedFile {
    /// Leading server/project folder, when the repository uses one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Target database name.
    pub database: String,
    pub object_type: ObjectType,
    /// File stem, usually schema-qualified (`dbo.Customers`).
    pub object_name: String,
    /// Repository-relative path; the ledger key.
    pub path: String,
}

impl ChangedFile {
    pub fn priority(&self) -> usize {
        self.object_type.priority()
    }

    pub fn is_dml(&self) -> bool {
        self.object_type == ObjectType::DMLs
    }

    /// Object name without its schema qualifier (`dbo.Customers` → `Customers`).
    pub fn unqualified_name(&self) -> &str {
        self.object_name
            .rsplit_once('.')
            .map(|(_, name)| name)
            .unwrap_or(&self.object_name)
    }
}

impl fmt::Display for ChangedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Classify a repository-relative path.
///
/// Accepted shapes:
///
/// ```text
/// <database>/<object-type>/<object-name>.sql
/// <server>/<database>/<object-type>/<object-name>.sql
/// ```
///
/// Returns `Ok(None)` for anything else (READMEs, folder markers, scripts at
/// the wrong depth) and `Err` when the object-type folder is not one of the
/// known kinds.
pub fn classify(path: &str) -> Result<Option<ChangedFile>, ClassifyError> {
    let normalized = path.replace('\\', "/");
    if !normalized.to_ascii_lowercase().ends_with(".sql") {
        return Ok(None);
    }

    let segments: Vec<&str> = normalized.split('/').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Ok(None);
    }

    let (server, database, folder, file_name) = match segments.as_slice() {
        [database, folder, file_name] => (None, *database, *folder, *file_name),
        [server, database, folder, file_name] => {
            (Some((*server).to_string()), *database, *folder, *file_name)
        }
        _ => return Ok(None),
    };

    let object_name = &file_name[..file_name.len() - ".sql".len()];
    if object_name.is_empty() {
        return Ok(None);
    }

    let object_type =
        ObjectType::from_str(folder).map_err(|_| ClassifyError::UnknownObjectType {
            path: normalized.clone(),
            object_type: folder.to_string(),
            expected: EXPECTED_FOLDERS,
        })?;

    Ok(Some(ChangedFile {
        server,
        database: database.to_string(),
        object_type,
        object_name: object_name.to_string(),
        path: normalized,
    }))
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// One execution attempt recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub row_id: i64,
    pub created_at: DateTime<Utc>,
    pub commit_id: String,
    pub file_path: String,
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Pass report
// ---------------------------------------------------------------------------

/// A file that failed during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub message: String,
}

/// What happened to one changed file during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Executed,
    /// A successful ledger entry already exists for this commit.
    AlreadyExecuted,
    /// A policy rule refused the file. Not a failure.
    Rejected { rule: String },
    /// The file disappeared from the checkout before it could run.
    Missing,
    Failed { message: String },
    /// Dry run: the file would be executed.
    Planned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: String,
    pub object_type: ObjectType,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

/// Result of one deployment pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// Head revision the pass deployed.
    pub commit_id: String,
    /// Pointer the pass started from (`None` on a first run).
    pub previous_commit: Option<String>,
    pub changes_detected: bool,
    pub had_failures: bool,
    pub failures: Vec<FileFailure>,
    pub outcomes: Vec<FileOutcome>,
    pub pointer_advanced: bool,
}

impl PassReport {
    pub fn count(&self, pred: impl Fn(&OutcomeStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
