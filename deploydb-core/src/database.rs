//! Database capability consumed by the deployment engine.
//!
//! Drivers implement [`Database`] (open a session scoped to one database) and
//! [`Session`] (run statements). The engine never builds connection strings
//! or speaks a wire protocol itself.

use std::fmt;

use crate::error::DbError;

/// A bound parameter or fetched column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Integer(i) => write!(f, "{i}"),
            SqlValue::Real(r) => write!(f, "{r}"),
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Integer(i)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Integer(i64::from(b))
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One fetched row, columns in select-list order.
pub type Row = Vec<SqlValue>;

/// A connection scoped to a single database. Dropping it closes the
/// connection.
pub trait Session {
    /// Run one statement and fetch every row it returns.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError>;

    /// Run one statement that returns no rows; yields the affected row count.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError>;

    /// Run a multi-statement script without parameters.
    fn execute_batch(&mut self, sql: &str) -> Result<(), DbError>;
}

/// Opens sessions against named databases on one server.
pub trait Database: Send + Sync {
    /// Connect to `database`. Failures are connectivity failures
    /// ([`DbError::Connect`]).
    fn connect(&self, database: &str) -> Result<Box<dyn Session + '_>, DbError>;

    /// Connect only if `database` already exists; `Ok(None)` otherwise.
    /// Used for read-only lookups that must not provision anything.
    fn connect_existing(&self, database: &str) -> Result<Option<Box<dyn Session + '_>>, DbError> {
        self.connect(database).map(Some)
    }
}
