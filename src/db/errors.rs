//! # Database Errors
//!
//! Error types for the session capability.

use std::time::Duration;

use thiserror::Error;

/// Result type for session operations
pub type DbResult<T> = Result<T, DbError>;

/// Session and pool errors
#[derive(Debug, Error)]
pub enum DbError {
    /// Driver-level failure
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Scratch database directory could not be created
    #[error("database storage error: {0}")]
    Io(#[from] std::io::Error),

    /// Statement rejected by a non-SQLite session implementation
    #[error("statement failed: {0}")]
    Statement(String),

    /// No session became available in time
    #[error("no session available within {0:?}")]
    PoolTimeout(Duration),

    /// Column value cannot be represented as JSON
    #[error("unsupported column value: {0}")]
    Unsupported(String),

    /// Session used after release
    #[error("session already released")]
    Closed,
}

impl DbError {
    pub fn code(&self) -> &'static str {
        match self {
            DbError::Sqlite(_) => "SQLITE_ERROR",
            DbError::Io(_) => "STORAGE_ERROR",
            DbError::Statement(_) => "STATEMENT_FAILED",
            DbError::PoolTimeout(_) => "POOL_TIMEOUT",
            DbError::Unsupported(_) => "UNSUPPORTED_VALUE",
            DbError::Closed => "SESSION_CLOSED",
        }
    }

    /// Write rejected by a UNIQUE/PRIMARY KEY/NOT NULL/CHECK constraint
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
