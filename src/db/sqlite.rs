//! # SQLite Session Pool
//!
//! Bounded pool of `rusqlite` connections, one per slot. Every connection
//! runs in WAL mode with a busy timeout, so readers never block on a writer
//! and concurrent writers queue on SQLite's file lock instead of failing.
//!
//! Without a configured path the pool owns a scratch database file in a
//! private temporary directory, removed when the pool drops.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use tempfile::TempDir;
use tracing::debug;

use super::errors::{DbError, DbResult};
use super::session::{PoolStats, Row, Session, SessionPool};
use crate::config::Config;

/// File name of the scratch database inside its temporary directory
const SCRATCH_FILE: &str = "recordbase.sqlite";

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

/// SQLite-backed [`SessionPool`]
pub struct SqlitePool {
    path: PathBuf,
    max_size: usize,
    timeout: Duration,
    state: Mutex<PoolState>,
    available: Condvar,
    checkouts: AtomicU64,
    // Declared last: connections close before the directory is removed
    _scratch: Option<TempDir>,
}

impl SqlitePool {
    /// Pool over a database file
    pub fn open(path: impl AsRef<Path>, max_size: usize, timeout: Duration) -> DbResult<Self> {
        Self::build(path.as_ref().to_path_buf(), None, max_size, timeout)
    }

    /// Pool over a private scratch database that lives as long as the pool
    pub fn temporary(max_size: usize, timeout: Duration) -> DbResult<Self> {
        let dir = tempfile::Builder::new().prefix("recordbase-").tempdir()?;
        let path = dir.path().join(SCRATCH_FILE);
        Self::build(path, Some(dir), max_size, timeout)
    }

    /// Pool described by `config`: the configured file, or a scratch database
    pub fn from_config(config: &Config) -> DbResult<Self> {
        match &config.database_path {
            Some(path) => Self::open(path, config.pool_size, config.checkout_timeout()),
            None => Self::temporary(config.pool_size, config.checkout_timeout()),
        }
    }

    /// Path of the underlying database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn build(
        path: PathBuf,
        scratch: Option<TempDir>,
        max_size: usize,
        timeout: Duration,
    ) -> DbResult<Self> {
        let pool = Self {
            path,
            max_size: max_size.max(1),
            timeout,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            available: Condvar::new(),
            checkouts: AtomicU64::new(0),
            _scratch: scratch,
        };
        // Fail fast on an unusable path
        let conn = pool.connect()?;
        pool.release(conn, true);
        Ok(pool)
    }

    fn connect(&self) -> DbResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %self.path.display(), journal_mode = %mode, "connection opened");
        Ok(conn)
    }

    /// Return a connection; `fresh` marks one opened outside the slot count
    fn release(&self, conn: Connection, fresh: bool) {
        if !conn.is_autocommit() {
            // Abandoned transaction: never leak it into the next checkout
            let _ = conn.execute_batch("ROLLBACK");
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if fresh {
            state.open += 1;
        }
        state.idle.push(conn);
        drop(state);
        self.available.notify_one();
    }
}

impl SessionPool for SqlitePool {
    fn checkout(&self) -> DbResult<Box<dyn Session + '_>> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let conn = loop {
            if let Some(conn) = state.idle.pop() {
                break conn;
            }
            if state.open < self.max_size {
                let conn = self.connect()?;
                state.open += 1;
                break conn;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DbError::PoolTimeout(self.timeout));
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        };
        drop(state);

        let n = self.checkouts.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(checkout = n, "session checked out");
        Ok(Box::new(SqliteSession {
            pool: self,
            conn: Some(conn),
        }))
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        PoolStats {
            total_checkouts: self.checkouts.load(Ordering::Relaxed),
            in_use: state.open - state.idle.len(),
        }
    }
}

struct SqliteSession<'a> {
    pool: &'a SqlitePool,
    conn: Option<Connection>,
}

impl SqliteSession<'_> {
    fn conn(&self) -> DbResult<&Connection> {
        self.conn.as_ref().ok_or(DbError::Closed)
    }
}

impl Drop for SqliteSession<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, false);
        }
    }
}

impl Session for SqliteSession<'_> {
    fn query(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query(params_from_iter(params.iter().map(json_to_sql)))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = Row::new();
            for (i, name) in names.iter().enumerate() {
                let value: SqlValue = row.get(i)?;
                map.insert(name.clone(), sql_to_json(value)?);
            }
            out.push(map);
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(sql, params_from_iter(params.iter().map(json_to_sql)))?)
    }

    fn begin(&mut self) -> DbResult<()> {
        Ok(self.conn()?.execute_batch("BEGIN IMMEDIATE")?)
    }

    fn commit(&mut self) -> DbResult<()> {
        Ok(self.conn()?.execute_batch("COMMIT")?)
    }

    fn rollback(&mut self) -> DbResult<()> {
        Ok(self.conn()?.execute_batch("ROLLBACK")?)
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn sql_to_json(value: SqlValue) -> DbResult<Value> {
    match value {
        SqlValue::Null => Ok(Value::Null),
        SqlValue::Integer(i) => Ok(Value::from(i)),
        SqlValue::Real(f) => Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        SqlValue::Text(s) => Ok(Value::String(s)),
        SqlValue::Blob(_) => Err(DbError::Unsupported("blob".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn scratch_pool() -> SqlitePool {
        SqlitePool::temporary(2, Duration::from_millis(200)).unwrap()
    }

    #[test]
    fn test_query_round_trip() {
        let pool = scratch_pool();
        let mut session = pool.checkout().unwrap();
        session
            .execute("CREATE TABLE t (id TEXT, n INTEGER, x REAL)", &[])
            .unwrap();
        let affected = session
            .execute(
                "INSERT INTO t VALUES (?1, ?2, ?3)",
                &[json!("a"), json!(7), json!(1.5)],
            )
            .unwrap();
        assert_eq!(affected, 1);

        let rows = session.query("SELECT * FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "a");
        assert_eq!(rows[0]["n"], 7);
        assert_eq!(rows[0]["x"], 1.5);
    }

    #[test]
    fn test_sessions_share_scratch_database() {
        let pool = scratch_pool();
        {
            let mut session = pool.checkout().unwrap();
            session.execute("CREATE TABLE t (id TEXT)", &[]).unwrap();
        }
        let mut session = pool.checkout().unwrap();
        assert!(session.query("SELECT * FROM t", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_release_on_drop() {
        let pool = scratch_pool();
        {
            let _a = pool.checkout().unwrap();
            let _b = pool.checkout().unwrap();
            assert_eq!(pool.stats().in_use, 2);
            assert!(matches!(pool.checkout(), Err(DbError::PoolTimeout(_))));
        }
        assert_eq!(pool.stats().in_use, 0);
        assert_eq!(pool.stats().total_checkouts, 2);
    }

    #[test]
    fn test_abandoned_transaction_rolled_back() {
        let pool = SqlitePool::temporary(1, Duration::from_millis(200)).unwrap();
        {
            let mut session = pool.checkout().unwrap();
            session.execute("CREATE TABLE t (id TEXT)", &[]).unwrap();
            session.begin().unwrap();
            session
                .execute("INSERT INTO t VALUES (?1)", &[json!("x")])
                .unwrap();
        }
        let mut session = pool.checkout().unwrap();
        assert!(session.query("SELECT * FROM t", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_from_config() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_database(dir.path().join("cfg.sqlite"));
        let pool = SqlitePool::from_config(&config).unwrap();
        assert!(pool.checkout().is_ok());
        assert!(dir.path().join("cfg.sqlite").exists());
    }

    #[test]
    fn test_file_pool() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.sqlite");
        let pool = SqlitePool::open(&path, 2, Duration::from_secs(1)).unwrap();
        let mut session = pool.checkout().unwrap();
        session.execute("CREATE TABLE t (id TEXT)", &[]).unwrap();
        assert_eq!(pool.stats().in_use, 1);
        assert_eq!(pool.path(), path.as_path());
    }

    #[test]
    fn test_connections_use_wal() {
        let pool = scratch_pool();
        let mut session = pool.checkout().unwrap();
        let rows = session.query("PRAGMA journal_mode", &[]).unwrap();
        assert_eq!(rows[0]["journal_mode"], "wal");
    }

    #[test]
    fn test_scratch_file_removed_on_drop() {
        let pool = scratch_pool();
        let path = pool.path().to_path_buf();
        assert!(path.exists());
        drop(pool);
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }

    #[test]
    fn test_concurrent_writers_wait_for_lock() {
        let pool = SqlitePool::temporary(4, Duration::from_secs(5)).unwrap();
        {
            let mut session = pool.checkout().unwrap();
            session
                .execute("CREATE TABLE t (id INTEGER, worker INTEGER)", &[])
                .unwrap();
        }

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let pool = &pool;
                scope.spawn(move || {
                    for i in 0..25 {
                        let mut session = pool.checkout().unwrap();
                        session
                            .execute("INSERT INTO t VALUES (?1, ?2)", &[json!(i), json!(worker)])
                            .unwrap();
                        let rows = session
                            .query(
                                "SELECT COUNT(*) AS n FROM t WHERE worker = ?1",
                                &[json!(worker)],
                            )
                            .unwrap();
                        assert_eq!(rows[0]["n"], i + 1);
                    }
                });
            }
        });

        let mut session = pool.checkout().unwrap();
        let rows = session.query("SELECT COUNT(*) AS n FROM t", &[]).unwrap();
        assert_eq!(rows[0]["n"], 100);
    }
}
