//! Execution ledger and deployment pointer.
//!
//! Both live in the bookkeeping database (`db_creds.default_db`):
//!
//! - `ExecutionLog`: one append-only row per execution attempt, keyed for
//!   lookup by `(CommitHexSHA, Folder)`;
//! - `Changelog`: one row per pointer move; the newest row is the pointer.
//!
//! Every call opens its own session, so a ledger write is durable as soon as
//! the call returns.

use chrono::{DateTime, NaiveDateTime, Utc};

use deploydb_core::{Database, DbError, LedgerEntry, Row, Session, SqlValue};

/// Schema for the ledger tables (SQLite). Safe to run repeatedly.
pub const CREATE_LEDGER_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ExecutionLog (
    RowId INTEGER PRIMARY KEY AUTOINCREMENT,
    CreatedAt TEXT NOT NULL,
    CommitHexSHA TEXT NOT NULL,
    Folder TEXT NOT NULL,
    IsFailed INTEGER NOT NULL DEFAULT 0,
    Error TEXT
);
CREATE INDEX IF NOT EXISTS IX_ExecutionLog_Commit_Folder
    ON ExecutionLog (CommitHexSHA, Folder);
CREATE TABLE IF NOT EXISTS Changelog (
    RowId INTEGER PRIMARY KEY AUTOINCREMENT,
    CommitHexSHA TEXT NOT NULL,
    CreatedAt TEXT NOT NULL
);
"#;

const DUPLICATE_CONTROL_SQL: &str =
    "SELECT 1 FROM ExecutionLog WHERE CommitHexSHA = ?1 AND Folder = ?2 AND IsFailed = 0 LIMIT 1";

const EXECUTION_LOG_INSERT_SQL: &str =
    "INSERT INTO ExecutionLog (CreatedAt, CommitHexSHA, Folder, IsFailed, Error) VALUES (?1, ?2, ?3, ?4, ?5)";

const CHANGELOG_INSERT_SQL: &str =
    "INSERT INTO Changelog (CommitHexSHA, CreatedAt) VALUES (?1, ?2)";

const LAST_CHANGELOG_SQL: &str =
    "SELECT CommitHexSHA FROM Changelog ORDER BY RowId DESC LIMIT 1";

/// Filter for [`Ledger::entries`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerQuery {
    pub commit: Option<String>,
    pub failed_only: bool,
    /// Newest entries first; `None` returns every match.
    pub limit: Option<usize>,
}

/// Ledger handle over the bookkeeping database.
pub struct Ledger<'a> {
    db: &'a dyn Database,
    database: String,
}

impl<'a> Ledger<'a> {
    pub fn new(db: &'a dyn Database, database: impl Into<String>) -> Self {
        Self {
            db,
            database: database.into(),
        }
    }

    /// Name of the bookkeeping database.
    pub fn database(&self) -> &str {
        &self.database
    }

    fn session(&self) -> Result<Box<dyn Session + 'a>, DbError> {
        self.db.connect(&self.database)
    }

    /// Create the ledger tables and index if they are missing.
    pub fn ensure_schema(&self) -> Result<(), DbError> {
        self.session()?.execute_batch(CREATE_LEDGER_SQL)
    }

    /// Whether a successful attempt of `path` at `commit` is recorded.
    /// Failed attempts do not count.
    pub fn is_executed(&self, commit: &str, path: &str) -> Result<bool, DbError> {
        let rows = self
            .session()?
            .query(DUPLICATE_CONTROL_SQL, &[commit.into(), path.into()])?;
        Ok(!rows.is_empty())
    }

    /// Append one attempt.
    pub fn record(
        &self,
        commit: &str,
        path: &str,
        failed: bool,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        self.session()?.execute(
            EXECUTION_LOG_INSERT_SQL,
            &[
                Utc::now().to_rfc3339().into(),
                commit.into(),
                path.into(),
                failed.into(),
                error.into(),
            ],
        )?;
        Ok(())
    }

    /// Last deployed revision, `None` before the first pass.
    pub fn pointer(&self) -> Result<Option<String>, DbError> {
        let rows = self.session()?.query(LAST_CHANGELOG_SQL, &[])?;
        match rows.into_iter().next() {
            None => Ok(None),
            Some(row) => text_column(&row, 0, "CommitHexSHA").map(Some),
        }
    }

    /// Move the pointer to `commit`.
    pub fn set_pointer(&self, commit: &str) -> Result<(), DbError> {
        self.session()?.execute(
            CHANGELOG_INSERT_SQL,
            &[commit.into(), Utc::now().to_rfc3339().into()],
        )?;
        tracing::info!("deployment pointer moved to {commit}");
        Ok(())
    }

    /// Ledger rows matching `query`, newest first.
    pub fn entries(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, DbError> {
        let mut sql = String::from(
            "SELECT RowId, CreatedAt, CommitHexSHA, Folder, IsFailed, Error FROM ExecutionLog",
        );
        let mut clauses = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();
        if let Some(commit) = &query.commit {
            params.push(commit.as_str().into());
            clauses.push(format!("CommitHexSHA = ?{}", params.len()));
        }
        if query.failed_only {
            clauses.push("IsFailed = 1".to_string());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY RowId DESC");
        if let Some(limit) = query.limit {
            params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
            sql.push_str(&format!(" LIMIT ?{}", params.len()));
        }

        let rows = self.session()?.query(&sql, &params)?;
        rows.iter().map(entry_from_row).collect()
    }

    /// The newest `limit` attempts.
    pub fn recent(&self, limit: usize) -> Result<Vec<LedgerEntry>, DbError> {
        self.entries(&LedgerQuery {
            limit: Some(limit),
            ..LedgerQuery::default()
        })
    }

    /// Every failed attempt recorded for `commit`.
    pub fn failures_for(&self, commit: &str) -> Result<Vec<LedgerEntry>, DbError> {
        self.entries(&LedgerQuery {
            commit: Some(commit.to_string()),
            failed_only: true,
            limit: None,
        })
    }
}

fn entry_from_row(row: &Row) -> Result<LedgerEntry, DbError> {
    let row_id = row
        .first()
        .and_then(SqlValue::as_i64)
        .ok_or_else(|| malformed("RowId"))?;
    let created_at = parse_timestamp(&text_column(row, 1, "CreatedAt")?)?;
    let failed = row
        .get(4)
        .and_then(SqlValue::as_i64)
        .ok_or_else(|| malformed("IsFailed"))?
        != 0;
    let error = match row.get(5) {
        Some(SqlValue::Text(s)) => Some(s.clone()),
        _ => None,
    };

    Ok(LedgerEntry {
        row_id,
        created_at,
        commit_id: text_column(row, 2, "CommitHexSHA")?,
        file_path: text_column(row, 3, "Folder")?,
        failed,
        error,
    })
}

fn text_column(row: &Row, idx: usize, column: &str) -> Result<String, DbError> {
    row.get(idx)
        .and_then(SqlValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| malformed(column))
}

/// RFC 3339 as written by [`Ledger::record`], or SQLite's `datetime('now')`
/// format for rows inserted by hand.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|ts| ts.and_utc())
        .map_err(|_| DbError::Database {
            message: format!("unreadable ledger timestamp '{raw}'"),
        })
}

fn malformed(column: &str) -> DbError {
    DbError::Database {
        message: format!("ledger column {column} is missing or has the wrong type"),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::sqlite::SqliteDatabase;

    fn ledger_in(dir: &TempDir) -> (SqliteDatabase, String) {
        (SqliteDatabase::new(dir.path()), "deploydb".to_string())
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (db, name) = ledger_in(&dir);
        let ledger = Ledger::new(&db, name);
        ledger.ensure_schema().unwrap();
        ledger.ensure_schema().unwrap();
        assert_eq!(ledger.pointer().unwrap(), None);
    }

    #[test]
    fn pointer_is_the_latest_changelog_row() {
        let dir = TempDir::new().unwrap();
        let (db, name) = ledger_in(&dir);
        let ledger = Ledger::new(&db, name);
        ledger.ensure_schema().unwrap();

        ledger.set_pointer("aaa").unwrap();
        ledger.set_pointer("bbb").unwrap();
        assert_eq!(ledger.pointer().unwrap().as_deref(), Some("bbb"));

        // Moving back is a new row, not an update.
        ledger.set_pointer("aaa").unwrap();
        assert_eq!(ledger.pointer().unwrap().as_deref(), Some("aaa"));
    }

    #[test]
    fn failed_attempts_do_not_count_as_executed() {
        let dir = TempDir::new().unwrap();
        let (db, name) = ledger_in(&dir);
        let ledger = Ledger::new(&db, name);
        ledger.ensure_schema().unwrap();

        ledger
            .record("c1", "db/Tables/t.sql", true, Some("boom"))
            .unwrap();
        assert!(!ledger.is_executed("c1", "db/Tables/t.sql").unwrap());

        ledger.record("c1", "db/Tables/t.sql", false, None).unwrap();
        assert!(ledger.is_executed("c1", "db/Tables/t.sql").unwrap());
        assert!(!ledger.is_executed("c2", "db/Tables/t.sql").unwrap());
    }

    #[test]
    fn entries_filter_and_order_newest_first() {
        let dir = TempDir::new().unwrap();
        let (db, name) = ledger_in(&dir);
        let ledger = Ledger::new(&db, name);
        ledger.ensure_schema().unwrap();

        ledger.record("c1", "db/Tables/a.sql", false, None).unwrap();
        ledger
            .record("c1", "db/Views/v.sql", true, Some("no such table: a"))
            .unwrap();
        ledger.record("c2", "db/DMLs/seed.sql", false, None).unwrap();

        let recent = ledger.recent(2).unwrap();
        let paths: Vec<&str> = recent.iter().map(|e| e.file_path.as_str()).collect();
        assert_eq!(paths, vec!["db/DMLs/seed.sql", "db/Views/v.sql"]);
        assert!(recent[0].row_id > recent[1].row_id);

        let failures = ledger.failures_for("c1").unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].failed);
        assert_eq!(failures[0].error.as_deref(), Some("no such table: a"));
        assert!(ledger.failures_for("c2").unwrap().is_empty());

        let all_c1 = ledger
            .entries(&LedgerQuery {
                commit: Some("c1".to_string()),
                ..LedgerQuery::default()
            })
            .unwrap();
        assert_eq!(all_c1.len(), 2);
    }

    #[test]
    fn hand_inserted_rows_with_sqlite_timestamps_are_readable() {
        let dir = TempDir::new().unwrap();
        let (db, name) = ledger_in(&dir);
        let ledger = Ledger::new(&db, name.as_str());
        ledger.ensure_schema().unwrap();

        db.connect(&name)
            .unwrap()
            .execute_batch(
                "INSERT INTO ExecutionLog (CreatedAt, CommitHexSHA, Folder, IsFailed) \
                 VALUES (datetime('now'), 'c9', 'db/Tables/x.sql', 0);",
            )
            .unwrap();
        let entries = ledger.recent(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].commit_id, "c9");
        assert_eq!(entries[0].error, None);
    }

    #[test]
    fn missing_schema_is_a_database_error() {
        let dir = TempDir::new().unwrap();
        let (db, name) = ledger_in(&dir);
        let ledger = Ledger::new(&db, name);
        let err = ledger.pointer().unwrap_err();
        assert!(matches!(err, DbError::Database { .. }), "got {err:?}");
    }
}
