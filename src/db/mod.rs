//! Database session capability
//!
//! The schema engine never talks to a driver directly. It checks out a
//! [`Session`] from an injected [`SessionPool`] for the duration of one
//! operation; the session is returned to the pool when dropped.

mod errors;
mod session;
mod sqlite;

pub use errors::{DbError, DbResult};
pub use session::{in_transaction, PoolStats, Row, Session, SessionPool};
pub use sqlite::SqlitePool;
