//! Schema Repository Atomicity Tests
//!
//! A table definition is two writes: its DDL and its catalog row. These tests
//! inject failures into the session to check:
//! - A failed define leaves neither the table nor the catalog row behind
//! - A failed rename restores the name and moves uploaded files back
//! - Views follow a rename of the table they select from
//! - Committed definitions survive reopening the database

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use recordbase::db::{DbError, DbResult, PoolStats, Row, Session, SessionPool, SqlitePool};
use recordbase::schema::{Field, FieldType, SchemaError, SchemaRepository, Table};
use recordbase::Config;
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Failure Injection
// =============================================================================

/// Pool whose sessions fail on demand
struct FailingPool {
    inner: SqlitePool,
    fail_statement: Mutex<Option<String>>,
    fail_commit: AtomicBool,
}

impl FailingPool {
    fn new(inner: SqlitePool) -> Self {
        Self {
            inner,
            fail_statement: Mutex::new(None),
            fail_commit: AtomicBool::new(false),
        }
    }

    /// Fail any statement containing `fragment`
    fn fail_on(&self, fragment: &str) {
        *self.fail_statement.lock().unwrap() = Some(fragment.to_string());
    }

    fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    fn heal(&self) {
        *self.fail_statement.lock().unwrap() = None;
        self.fail_commits(false);
    }

    fn check(&self, sql: &str) -> DbResult<()> {
        match self.fail_statement.lock().unwrap().as_deref() {
            Some(fragment) if sql.contains(fragment) => {
                Err(DbError::Statement(format!("injected failure: {}", sql)))
            }
            _ => Ok(()),
        }
    }
}

struct FailingSession<'a> {
    inner: Box<dyn Session + 'a>,
    pool: &'a FailingPool,
}

impl Session for FailingSession<'_> {
    fn query(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        self.pool.check(sql)?;
        self.inner.query(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<usize> {
        self.pool.check(sql)?;
        self.inner.execute(sql, params)
    }

    fn begin(&mut self) -> DbResult<()> {
        self.inner.begin()
    }

    fn commit(&mut self) -> DbResult<()> {
        if self.pool.fail_commit.load(Ordering::SeqCst) {
            return Err(DbError::Statement("injected commit failure".into()));
        }
        self.inner.commit()
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.inner.rollback()
    }
}

impl SessionPool for FailingPool {
    fn checkout(&self) -> DbResult<Box<dyn Session + '_>> {
        Ok(Box::new(FailingSession {
            inner: self.inner.checkout()?,
            pool: self,
        }))
    }

    fn stats(&self) -> PoolStats {
        self.inner.stats()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn failing_repo(config: &Config) -> (Arc<FailingPool>, SchemaRepository) {
    let pool = Arc::new(FailingPool::new(
        SqlitePool::temporary(2, Duration::from_secs(1)).unwrap(),
    ));
    let repo = SchemaRepository::open(pool.clone(), config).unwrap();
    (pool, repo)
}

fn notes() -> Table {
    Table::plain(
        "notes",
        vec![Field::new("title", FieldType::Text).unwrap().required()],
    )
    .unwrap()
}

fn view_source(table: &Table) -> String {
    table.view_options().unwrap().source_sql.clone()
}

fn define_notes_with_view(repo: &SchemaRepository) {
    repo.define(notes()).unwrap();
    repo.define(Table::view("recent", "SELECT id, title FROM notes", vec![]).unwrap())
        .unwrap();
}

fn sqlite_objects(pool: &dyn SessionPool, name: &str) -> usize {
    let mut session = pool.checkout().unwrap();
    session
        .query(
            "SELECT name FROM sqlite_master WHERE name = ?1",
            &[json!(name)],
        )
        .unwrap()
        .len()
}

fn catalog_rows(pool: &dyn SessionPool) -> usize {
    let mut session = pool.checkout().unwrap();
    session.query("SELECT id FROM _tables", &[]).unwrap().len()
}

// =============================================================================
// Define Atomicity Tests
// =============================================================================

/// Catalog insert fails after the DDL ran: the DDL is rolled back too.
#[test]
fn test_define_rolls_back_ddl_when_catalog_write_fails() {
    let (pool, repo) = failing_repo(&Config::default());
    pool.fail_on("INSERT INTO _tables");

    let err = repo.define(notes()).unwrap_err();
    assert!(matches!(err, SchemaError::TransactionFailure(_)), "{:?}", err);
    assert_eq!(err.code(), "TRANSACTION_FAILURE");

    pool.heal();
    assert_eq!(sqlite_objects(pool.as_ref(), "notes"), 0);
    assert_eq!(catalog_rows(pool.as_ref()), 0);
    assert!(repo.list().is_empty());
    assert!(matches!(
        repo.lookup("notes"),
        Err(SchemaError::TableNotFound(_))
    ));
}

/// DDL fails: nothing reaches the catalog.
#[test]
fn test_define_ddl_failure_leaves_no_catalog_row() {
    let (pool, repo) = failing_repo(&Config::default());
    pool.fail_on("CREATE TABLE IF NOT EXISTS notes");

    assert!(repo.define(notes()).is_err());
    pool.heal();
    assert_eq!(catalog_rows(pool.as_ref()), 0);
    assert!(repo.list().is_empty());
}

/// Commit failure rolls back both writes.
#[test]
fn test_define_commit_failure() {
    let (pool, repo) = failing_repo(&Config::default());
    pool.fail_commits(true);

    assert!(repo.define(notes()).is_err());
    pool.heal();
    assert_eq!(sqlite_objects(pool.as_ref(), "notes"), 0);
    assert_eq!(catalog_rows(pool.as_ref()), 0);
}

/// After a failed define the same table can be defined again.
#[test]
fn test_define_retry_after_failure() {
    let (pool, repo) = failing_repo(&Config::default());
    pool.fail_on("INSERT INTO _tables");
    assert!(repo.define(notes()).is_err());

    pool.heal();
    let id = repo.define(notes()).unwrap();
    assert!(id.starts_with("tbl_"));
    assert_eq!(sqlite_objects(pool.as_ref(), "notes"), 1);
    assert_eq!(catalog_rows(pool.as_ref()), 1);
    assert_eq!(repo.lookup(&id).unwrap().name, "notes");
}

/// Failed auth-table define leaves no orphan unique index.
#[test]
fn test_auth_define_rolls_back_index() {
    let (pool, repo) = failing_repo(&Config::default());
    pool.fail_on("INSERT INTO _tables");

    assert!(repo.define(Table::auth("users", vec![]).unwrap()).is_err());
    pool.heal();
    assert_eq!(sqlite_objects(pool.as_ref(), "users"), 0);
    assert_eq!(sqlite_objects(pool.as_ref(), "idx_users_email"), 0);
}

// =============================================================================
// Rename Atomicity Tests
// =============================================================================

/// Catalog update fails: the old name still resolves everywhere.
#[test]
fn test_rename_rolls_back_on_catalog_failure() {
    let (pool, repo) = failing_repo(&Config::default());
    repo.define(notes()).unwrap();

    pool.fail_on("UPDATE _tables");
    let err = repo.rename("notes", "memos").unwrap_err();
    assert_eq!(err.code(), "TRANSACTION_FAILURE");

    pool.heal();
    assert_eq!(sqlite_objects(pool.as_ref(), "notes"), 1);
    assert_eq!(sqlite_objects(pool.as_ref(), "memos"), 0);
    assert!(repo.lookup("notes").is_ok());
    assert!(repo.lookup("memos").is_err());
}

/// The upload directory follows a committed rename.
#[test]
fn test_rename_moves_files() {
    let files = TempDir::new().unwrap();
    let config = Config {
        files_dir: Some(files.path().to_path_buf()),
        ..Config::default()
    };
    let (_pool, repo) = failing_repo(&config);
    repo.define(notes()).unwrap();

    fs::create_dir_all(files.path().join("notes")).unwrap();
    fs::write(files.path().join("notes").join("a.txt"), b"hello").unwrap();

    let renamed = repo.rename("notes", "memos").unwrap();
    assert_eq!(renamed.name, "memos");
    assert!(!files.path().join("notes").exists());
    assert_eq!(
        fs::read(files.path().join("memos").join("a.txt")).unwrap(),
        b"hello"
    );
    assert_eq!(repo.files_path(&renamed), Some(files.path().join("memos")));
}

/// Commit fails after the files were moved: they are moved back.
#[test]
fn test_rename_failure_moves_files_back() {
    let files = TempDir::new().unwrap();
    let config = Config {
        files_dir: Some(files.path().to_path_buf()),
        ..Config::default()
    };
    let (pool, repo) = failing_repo(&config);
    repo.define(notes()).unwrap();

    fs::create_dir_all(files.path().join("notes")).unwrap();
    fs::write(files.path().join("notes").join("a.txt"), b"hello").unwrap();

    pool.fail_commits(true);
    assert!(repo.rename("notes", "memos").is_err());
    pool.heal();

    assert!(files.path().join("notes").join("a.txt").exists());
    assert!(!files.path().join("memos").exists());
    assert_eq!(sqlite_objects(pool.as_ref(), "notes"), 1);
    assert_eq!(repo.lookup("notes").unwrap().name, "notes");
}

// =============================================================================
// Persistence Tests
// =============================================================================

/// Definitions, renames and rules survive reopening a file database.
#[test]
fn test_reopen_restores_catalog() {
    let dir = TempDir::new().unwrap();
    let config = Config::with_database(dir.path().join("data.db"));

    let id = {
        let pool = Arc::new(SqlitePool::from_config(&config).unwrap());
        let repo = SchemaRepository::open(pool, &config).unwrap();
        let id = repo.define(notes()).unwrap();
        repo.define(Table::view("recent", "SELECT id, title FROM notes", vec![]).unwrap())
            .unwrap();
        repo.rename("notes", "memos").unwrap();
        id
    };

    let pool = Arc::new(SqlitePool::from_config(&config).unwrap());
    let repo = SchemaRepository::open(pool, &config).unwrap();
    let names: Vec<String> = repo.list().iter().map(|t| t.name.clone()).collect();
    assert_eq!(names, vec!["memos".to_string(), "recent".to_string()]);
    assert_eq!(repo.lookup(&id).unwrap().name, "memos");
    let recent = repo.lookup("recent").unwrap();
    assert!(view_source(&recent).contains("memos"));
}

// =============================================================================
// Dependent View Tests
// =============================================================================

/// Renaming a table updates the stored query of views over it.
#[test]
fn test_table_rename_refreshes_view_source() {
    let (pool, repo) = failing_repo(&Config::default());
    define_notes_with_view(&repo);

    repo.rename("notes", "memos").unwrap();
    let source = view_source(&repo.lookup("recent").unwrap());
    assert!(source.contains("memos"), "{}", source);
    assert!(!source.contains("notes"), "{}", source);

    let mut session = pool.checkout().unwrap();
    let rows = session
        .query("SELECT schema FROM _tables WHERE name = 'recent'", &[])
        .unwrap();
    let stored: Value = serde_json::from_str(rows[0]["schema"].as_str().unwrap()).unwrap();
    assert_eq!(stored["sourceSQL"], json!(source));
}

/// A view renamed after its table was renamed still resolves.
#[test]
fn test_view_rename_after_table_rename() {
    let (pool, repo) = failing_repo(&Config::default());
    define_notes_with_view(&repo);
    {
        let mut session = pool.checkout().unwrap();
        session
            .execute(
                "INSERT INTO notes (id, created, updated, title) VALUES ('a', 'c', 'u', 'hi')",
                &[],
            )
            .unwrap();
    }

    repo.rename("notes", "memos").unwrap();
    repo.rename("recent", "latest").unwrap();

    let mut session = pool.checkout().unwrap();
    let rows = session.query("SELECT id, title FROM latest", &[]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["title"], "hi");
    assert_eq!(sqlite_objects(pool.as_ref(), "recent"), 0);
}

/// A failed table rename leaves view definitions untouched.
#[test]
fn test_failed_rename_keeps_view_source() {
    let (pool, repo) = failing_repo(&Config::default());
    define_notes_with_view(&repo);

    pool.fail_commits(true);
    assert!(repo.rename("notes", "memos").is_err());
    pool.heal();

    assert_eq!(
        view_source(&repo.lookup("recent").unwrap()),
        "SELECT id, title FROM notes"
    );
    let mut session = pool.checkout().unwrap();
    assert!(session.query("SELECT * FROM recent", &[]).unwrap().is_empty());
}

/// Dropping removes both the table and its catalog row.
#[test]
fn test_drop_table_removes_both() {
    let (pool, repo) = failing_repo(&Config::default());
    repo.define(notes()).unwrap();

    repo.drop_table("notes").unwrap();
    assert_eq!(sqlite_objects(pool.as_ref(), "notes"), 0);
    assert_eq!(catalog_rows(pool.as_ref()), 0);
    assert!(repo.lookup("notes").is_err());
}
