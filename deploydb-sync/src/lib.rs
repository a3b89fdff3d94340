//! # deploydb-sync
//!
//! Execution ledger, policy engine, executor and the pass orchestrator.
//!
//! Build a [`SyncOrchestrator`] (usually with
//! [`SyncOrchestrator::from_config`]) and call
//! [`SyncOrchestrator::run_pass`] once per poll.

pub mod error;
pub mod executor;
pub mod ledger;
pub mod pipeline;
pub mod policy;
pub mod sqlite;

pub use error::{PolicyError, SyncError};
pub use executor::{ExecutionOutcome, Executor, DML_PRELUDE};
pub use ledger::{Ledger, LedgerQuery, CREATE_LEDGER_SQL};
pub use pipeline::{DeployStatus, PassMode, PassState, SyncOrchestrator};
pub use policy::{
    object_exists_in, Admission, CatalogLookup, ExistingTableRule, ObjectLookup, PolicyEngine,
    PolicyRule,
};
pub use sqlite::SqliteDatabase;
