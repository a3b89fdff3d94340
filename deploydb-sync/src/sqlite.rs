//! Bundled SQLite backend.
//!
//! Every named database is a file `<root>/<name>.db`. Opening a name that
//! does not exist yet creates it, the same way a fresh server database would
//! be provisioned by hand before its first script runs. Lookups go through
//! `connect_existing`, which opens read-only and never creates a file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};

use deploydb_core::{Database, DbCreds, DbError, Row, Session, SqlValue};

/// [`Database`] over a directory of SQLite files.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    root: PathBuf,
    busy_timeout: Duration,
}

impl SqliteDatabase {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            busy_timeout: Duration::from_secs(30),
        }
    }

    /// Backend for `db_creds`: `server` is the directory, `timeout_secs`
    /// the busy timeout. `user` / `password` are not used by SQLite.
    pub fn from_creds(creds: &DbCreds) -> Self {
        let root = deploydb_core::config::expand_home(Path::new(&creds.server));
        Self::new(root).with_busy_timeout(Duration::from_secs(creds.timeout_secs))
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `database`. Names must be plain identifiers so they can
    /// never escape `root`.
    ///
    /// A bad name comes from the repository layout, not from the server, so
    /// it is a [`DbError::Database`] and fails only the scripts under it.
    pub fn database_path(&self, database: &str) -> Result<PathBuf, DbError> {
        let valid = !database.is_empty()
            && !database.starts_with('.')
            && database
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(DbError::Database {
                message: format!(
                    "invalid database name '{database}': use letters, digits, '_', '-' or '.'"
                ),
            });
        }
        Ok(self.root.join(format!("{database}.db")))
    }

    fn open(&self, database: &str, path: &Path, flags: OpenFlags) -> Result<Connection, DbError> {
        let connect_err = |message: String| DbError::Connect {
            database: database.to_string(),
            message,
        };
        let conn = Connection::open_with_flags(path, flags).map_err(|e| connect_err(e.to_string()))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| connect_err(e.to_string()))?;
        tracing::debug!("opened {}", path.display());
        Ok(conn)
    }
}

impl Database for SqliteDatabase {
    fn connect(&self, database: &str) -> Result<Box<dyn Session + '_>, DbError> {
        let path = self.database_path(database)?;
        std::fs::create_dir_all(&self.root).map_err(|e| DbError::Connect {
            database: database.to_string(),
            message: format!("{}: {e}", self.root.display()),
        })?;
        let conn = self.open(database, &path, OpenFlags::default())?;
        Ok(Box::new(SqliteSession { conn }))
    }

    fn connect_existing(&self, database: &str) -> Result<Option<Box<dyn Session + '_>>, DbError> {
        let path = self.database_path(database)?;
        if !path.exists() {
            return Ok(None);
        }
        let conn = self.open(database, &path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Some(Box::new(SqliteSession { conn })))
    }
}

struct SqliteSession {
    conn: Connection,
}

impl Session for SqliteSession {
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        let mut stmt = self.conn.prepare(sql).map_err(map_err)?;
        let columns = stmt.column_count();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_value)))
            .map_err(map_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_err)? {
            let mut values = Vec::with_capacity(columns);
            for idx in 0..columns {
                let value: Value = row.get(idx).map_err(map_err)?;
                values.push(from_value(value));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let changed = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_value)))
            .map_err(map_err)?;
        Ok(changed as u64)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), DbError> {
        self.conn.execute_batch(sql).map_err(map_err)
    }
}

/// Engine-reported failures keep SQLite's own message; anything else is
/// unexpected and carries the full error chain.
fn map_err(err: rusqlite::Error) -> DbError {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => DbError::Database {
            message: message.unwrap_or_else(|| code.to_string()),
        },
        other => DbError::Unexpected {
            trace: format!("{other}\n{other:?}"),
        },
    }
}

fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Real(r) => Value::Real(*r),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Blob(b) => Value::Blob(b.clone()),
    }
}

fn from_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(i),
        Value::Real(r) => SqlValue::Real(r),
        Value::Text(s) => SqlValue::Text(s),
        Value::Blob(b) => SqlValue::Blob(b),
    }
}
