//! Store layer: a thin statement/session abstraction over SQLite.
//!
//! The store's unique and foreign-key constraint enforcement is the single
//! source of truth for conflict detection; every engine unit of work runs
//! inside one transaction obtained from a connection created here.

pub mod database;
pub mod images;
pub mod rows;
pub mod runs;

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

pub use database::Database;

/// Errors surfaced by the store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored configuration failed to compile: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("corrupt stored payload: {0}")]
    Corrupt(String),

    #[error("run constraints name unknown table {0:?}")]
    UnknownRunTable(String),

    #[error("run constraints name unknown field {field:?} on table {table}")]
    UnknownRunField { table: String, field: String },

    #[error("run constraint value {value:?} for {table}.{field} is not a valid {ty}")]
    InvalidRunValue {
        table: String,
        field: String,
        value: String,
        ty: &'static str,
    },

    /// A data-integrity invariant broke: never resolved silently.
    #[error("consistency fault: {0}")]
    ConsistencyFault(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Open a connection with foreign-key enforcement on.
pub fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(conn)
}

/// Parse a datetime string from the database, defaulting to Unix epoch on
/// error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
