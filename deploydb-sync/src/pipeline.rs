//! Shared deployment pass used by the CLI and the daemon.
//!
//! A pass moves through `Idle → Pulling → Diffing → Executing → Recording →
//! Idle`. Only raised errors (connectivity, classification) abort it, and an
//! unreachable target aborts it whether the executor or a policy lookup hit
//! it first. Script failures are collected into the [`PassReport`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use deploydb_core::{
    ChangedFile, Config, Database, DbError, FileFailure, FileOutcome, OutcomeStatus,
    PassReport, SourceControl, SourceError, SqlValue,
};
use deploydb_detector::{detect, GitCli};

use crate::error::{PolicyError, SyncError};
use crate::executor::{ExecutionOutcome, Executor};
use crate::ledger::Ledger;
use crate::policy::{Admission, CatalogLookup, PolicyEngine};
use crate::sqlite::SqliteDatabase;

/// What a pass is allowed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassMode {
    /// Execute admitted files, write the ledger, move the pointer.
    #[default]
    Execute,
    /// Pull and report what would run. No script is executed, nothing is
    /// recorded and no target database is created.
    DryRun,
    /// Record the head as deployed without executing anything.
    Baseline,
}

/// Orchestrator state, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Pulling,
    Diffing,
    Executing,
    Recording,
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassState::Idle => "idle",
            PassState::Pulling => "pulling",
            PassState::Diffing => "diffing",
            PassState::Executing => "executing",
            PassState::Recording => "recording",
        };
        f.write_str(name)
    }
}

/// Snapshot for `deploydb status`. Does not pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployStatus {
    pub pointer: Option<String>,
    /// `None` when the checkout has not been cloned yet.
    pub checkout_head: Option<String>,
    /// Files between the pointer and the checkout head.
    pub pending: Vec<ChangedFile>,
}

/// Drives deployment passes for one configuration.
pub struct SyncOrchestrator {
    config: Config,
    source: Arc<dyn SourceControl>,
    db: Arc<dyn Database>,
    policy: PolicyEngine,
}

impl SyncOrchestrator {
    pub fn new(config: Config, source: Arc<dyn SourceControl>, db: Arc<dyn Database>) -> Self {
        Self {
            config,
            source,
            db,
            policy: PolicyEngine::default(),
        }
    }

    /// Git CLI + bundled SQLite, as configured.
    pub fn from_config(config: Config) -> Self {
        let db = SqliteDatabase::from_creds(&config.db_creds);
        Self::new(config, Arc::new(GitCli::new()), Arc::new(db))
    }

    pub fn with_policy(mut self, policy: PolicyEngine) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn checkout(&self) -> PathBuf {
        self.config.checkout_path()
    }

    pub fn ledger(&self) -> Ledger<'_> {
        Ledger::new(self.db.as_ref(), self.config.db_creds.default_db.as_str())
    }

    /// Startup connectivity check: `SELECT 1` on the bookkeeping database,
    /// then create the ledger schema.
    pub fn check(&self) -> Result<(), SyncError> {
        let ledger = self.ledger();
        let mut session = self.db.connect(ledger.database())?;
        let rows = session.query("SELECT 1", &[])?;
        if rows.first().and_then(|r| r.first()) != Some(&SqlValue::Integer(1)) {
            return Err(SyncError::Database(DbError::Unexpected {
                trace: "SELECT 1 returned no row".to_string(),
            }));
        }
        ledger.ensure_schema()?;
        tracing::info!("database connection verified ({})", ledger.database());
        Ok(())
    }

    /// Pointer, checkout head and pending files, without pulling.
    pub fn status(&self) -> Result<DeployStatus, SyncError> {
        let ledger = self.ledger();
        ledger.ensure_schema()?;
        let pointer = ledger.pointer()?;
        let checkout = self.checkout();
        if !checkout.join(".git").exists() {
            return Ok(DeployStatus {
                pointer,
                checkout_head: None,
                pending: Vec::new(),
            });
        }
        let head = self.source.head_revision(&checkout)?;
        let pending = detect(self.source.as_ref(), &checkout, pointer.as_deref(), &head)?;
        Ok(DeployStatus {
            pointer,
            checkout_head: Some(head),
            pending,
        })
    }

    /// Run one pass.
    pub fn run_pass(&self, mode: PassMode) -> Result<PassReport, SyncError> {
        let result = self.run_pass_inner(mode);
        transition(PassState::Idle);
        result
    }

    fn run_pass_inner(&self, mode: PassMode) -> Result<PassReport, SyncError> {
        let checkout = self.checkout();
        let branch = self.config.target_branch.as_str();
        let ledger = self.ledger();
        ledger.ensure_schema()?;

        transition(PassState::Pulling);
        if !checkout.join(".git").exists() {
            let remote = self.config.remote().ok_or(SourceError::NoRemote)?;
            tracing::info!("initial clone of branch {branch}");
            self.source.ensure_cloned(&remote, branch, &checkout)?;
        }
        self.source.pull(&checkout, branch)?;

        transition(PassState::Diffing);
        let previous = ledger.pointer()?;
        let head = self.source.head_revision(&checkout)?;
        let changes_detected = previous.as_deref() != Some(head.as_str());
        let changes = match mode {
            PassMode::Baseline => Vec::new(),
            PassMode::Execute | PassMode::DryRun => {
                detect(self.source.as_ref(), &checkout, previous.as_deref(), &head)?
            }
        };
        if changes_detected {
            tracing::info!(
                "changes detected: {} -> {head} ({} file(s))",
                previous.as_deref().unwrap_or("<none>"),
                changes.len()
            );
        } else {
            tracing::info!("no new commits on {branch}");
        }

        transition(PassState::Executing);
        let mut outcomes = Vec::with_capacity(changes.len());
        let mut failures = Vec::new();
        let executor = Executor::new(self.db.as_ref(), &ledger, &checkout);
        let mut lookup = CatalogLookup::new(self.db.as_ref());

        for file in &changes {
            let status = if !checkout.join(&file.path).exists() {
                tracing::warn!("skipping {}: no longer in the checkout", file.path);
                OutcomeStatus::Missing
            } else {
                match self.policy.admit(file, &mut lookup) {
                    Ok(Admission::Rejected { rule, reason }) => {
                        tracing::info!("rejected {} by {rule}: {reason}", file.path);
                        OutcomeStatus::Rejected { rule }
                    }
                    Err(PolicyError::Lookup {
                        source: source @ DbError::Connect { .. },
                        ..
                    }) => return Err(SyncError::Database(source)),
                    Err(err) => {
                        let message = err.to_string();
                        tracing::error!("{message}");
                        if mode == PassMode::Execute {
                            ledger.record(&head, &file.path, true, Some(&message))?;
                        }
                        OutcomeStatus::Failed { message }
                    }
                    Ok(Admission::Admitted) => self.admitted(&executor, &ledger, file, &head, mode)?,
                }
            };

            if let OutcomeStatus::Failed { message } = &status {
                failures.push(FileFailure {
                    path: file.path.clone(),
                    message: message.clone(),
                });
            }
            outcomes.push(FileOutcome {
                path: file.path.clone(),
                object_type: file.object_type,
                status,
            });
        }

        transition(PassState::Recording);
        let pointer_advanced = changes_detected && mode != PassMode::DryRun;
        if pointer_advanced {
            ledger.set_pointer(&head)?;
        }
        if !failures.is_empty() {
            tracing::warn!("{} file(s) failed at {head}", failures.len());
        }

        Ok(PassReport {
            commit_id: head,
            previous_commit: previous,
            changes_detected,
            had_failures: !failures.is_empty(),
            failures,
            outcomes,
            pointer_advanced,
        })
    }

    fn admitted(
        &self,
        executor: &Executor<'_>,
        ledger: &Ledger<'_>,
        file: &ChangedFile,
        head: &str,
        mode: PassMode,
    ) -> Result<OutcomeStatus, SyncError> {
        match mode {
            PassMode::DryRun => {
                if ledger.is_executed(head, &file.path)? {
                    Ok(OutcomeStatus::AlreadyExecuted)
                } else {
                    Ok(OutcomeStatus::Planned)
                }
            }
            PassMode::Execute | PassMode::Baseline => {
                Ok(match executor.execute(file, head)? {
                    ExecutionOutcome::Executed => OutcomeStatus::Executed,
                    ExecutionOutcome::AlreadyExecuted => OutcomeStatus::AlreadyExecuted,
                    ExecutionOutcome::Failed { message } => OutcomeStatus::Failed { message },
                })
            }
        }
    }
}

fn transition(state: PassState) {
    tracing::debug!("pass state: {state}");
}
