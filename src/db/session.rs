//! # Session Capability
//!
//! `execute SQL, return rows` plus transaction control, checked out from a pool.

use serde_json::{Map, Value};
use tracing::warn;

use super::errors::{DbError, DbResult};

/// One result row, column name to JSON value
pub type Row = Map<String, Value>;

/// A checked-out database session
pub trait Session: Send {
    /// Run a statement returning rows
    fn query(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>>;

    /// Run a statement, returning the number of affected rows
    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<usize>;

    fn begin(&mut self) -> DbResult<()>;

    fn commit(&mut self) -> DbResult<()>;

    fn rollback(&mut self) -> DbResult<()>;
}

/// Pool usage counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Sessions handed out since the pool was created
    pub total_checkouts: u64,
    /// Sessions currently checked out
    pub in_use: usize,
}

/// Source of sessions.
///
/// Dropping the returned session releases it back to the pool on every exit
/// path, including early returns and panics unwinding through the caller.
pub trait SessionPool: Send + Sync {
    fn checkout(&self) -> DbResult<Box<dyn Session + '_>>;

    fn stats(&self) -> PoolStats;
}

/// Run `f` inside a transaction on `session`.
///
/// Commits when `f` succeeds; rolls back when `f` or the commit fails.
pub fn in_transaction<T, E, F>(session: &mut dyn Session, f: F) -> Result<T, E>
where
    E: From<DbError>,
    F: FnOnce(&mut dyn Session) -> Result<T, E>,
{
    session.begin()?;

    let outcome = f(&mut *session);
    let outcome = match outcome {
        Ok(value) => session.commit().map(|_| value).map_err(E::from),
        Err(e) => Err(e),
    };

    if outcome.is_err() {
        if let Err(rollback_err) = session.rollback() {
            warn!(error = %rollback_err, "rollback failed");
        }
    }

    outcome
}
