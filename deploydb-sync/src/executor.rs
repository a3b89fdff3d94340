//! Single-file execution against the target database.

use std::path::Path;

use deploydb_core::{ChangedFile, Database, DbError};

use crate::error::{io_err, SyncError};
use crate::ledger::Ledger;

/// Prepended to `DMLs` scripts so row-count chatter does not reach the
/// driver (the SQLite counterpart of `SET NOCOUNT ON`).
pub const DML_PRELUDE: &str = "PRAGMA count_changes = OFF;\n";

/// How one file ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Executed,
    /// The ledger already holds a successful attempt at this commit.
    AlreadyExecuted,
    /// The script or its file failed; the message is what the ledger holds.
    Failed { message: String },
}

/// Runs scripts from a checkout and records every attempt.
pub struct Executor<'a> {
    db: &'a dyn Database,
    ledger: &'a Ledger<'a>,
    checkout: &'a Path,
}

impl<'a> Executor<'a> {
    pub fn new(db: &'a dyn Database, ledger: &'a Ledger<'a>, checkout: &'a Path) -> Self {
        Self {
            db,
            ledger,
            checkout,
        }
    }

    /// Execute `file` as part of deploying `commit`.
    ///
    /// Script failures are returned as [`ExecutionOutcome::Failed`] after the
    /// ledger entry is written, as are targets the driver refuses by name.
    /// `Err` means the target or bookkeeping database could not be reached
    /// and the pass cannot continue.
    pub fn execute(
        &self,
        file: &ChangedFile,
        commit: &str,
    ) -> Result<ExecutionOutcome, SyncError> {
        if self.ledger.is_executed(commit, &file.path)? {
            tracing::info!("already executed at {commit}: {}", file.path);
            return Ok(ExecutionOutcome::AlreadyExecuted);
        }

        let script = match self.read_script(file) {
            Ok(script) => script,
            Err(err) => return self.fail(file, commit, format!("{err}\n{err:?}")),
        };

        let mut session = match self.db.connect(&file.database) {
            Ok(session) => session,
            Err(err @ DbError::Connect { .. }) => return Err(err.into()),
            Err(err) => return self.fail(file, commit, err.ledger_message()),
        };
        tracing::info!("executing {} on {}", file.path, file.database);
        match session.execute_batch(&script) {
            Ok(()) => {
                self.ledger.record(commit, &file.path, false, None)?;
                Ok(ExecutionOutcome::Executed)
            }
            Err(err) => self.fail(file, commit, err.ledger_message()),
        }
    }

    fn read_script(&self, file: &ChangedFile) -> Result<String, SyncError> {
        let path = self.checkout.join(&file.path);
        let body = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        if file.is_dml() {
            return Ok(format!("{DML_PRELUDE}{body}"));
        }
        Ok(body)
    }

    fn fail(
        &self,
        file: &ChangedFile,
        commit: &str,
        message: String,
    ) -> Result<ExecutionOutcome, SyncError> {
        tracing::error!("{} failed: {message}", file.path);
        self.ledger
            .record(commit, &file.path, true, Some(&message))?;
        Ok(ExecutionOutcome::Failed { message })
    }
}
