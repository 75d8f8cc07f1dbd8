//! # SQL Synthesizer
//!
//! Pure functions turning table definitions into DDL strings.

use std::sync::OnceLock;

use regex::Regex;

use super::table::{Table, TableKind};

/// Live view definitions as SQLite stores them
pub const LIVE_VIEWS: &str = "SELECT name, sql FROM sqlite_master WHERE type = 'view'";

/// `CREATE TABLE IF NOT EXISTS` for plain/auth tables, `CREATE VIEW IF NOT EXISTS` for views
pub fn create_table(table: &Table) -> String {
    match &table.kind {
        TableKind::View(view) => create_view(&table.name, &view.source_sql),
        TableKind::Plain | TableKind::Auth(_) => {
            let columns: Vec<String> = table.fields().iter().map(|f| f.to_column_ddl()).collect();
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({});",
                table.name,
                columns.join(", ")
            )
        }
    }
}

/// `CREATE VIEW IF NOT EXISTS <name> AS <sourceSQL>;`
pub fn create_view(name: &str, source_sql: &str) -> String {
    let source = source_sql.trim().trim_end_matches(';');
    format!("CREATE VIEW IF NOT EXISTS {} AS {};", name, source)
}

/// Query part of a stored `CREATE VIEW` statement.
///
/// SQLite rewrites view bodies when a referenced table is renamed; this
/// recovers the rewritten source so the catalog can follow it.
pub fn view_source(create_sql: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?is)^\s*CREATE\s+(?:TEMP\s+|TEMPORARY\s+)?VIEW\s+",
            r#"(?:IF\s+NOT\s+EXISTS\s+)?(?:"[^"]+"|\S+)\s+AS\s+(.+?)[\s;]*$"#,
        ))
        .expect("static pattern")
    });
    re.captures(create_sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Statements that must run after the table exists (auth unique index)
pub fn create_indexes(table: &Table) -> Vec<String> {
    match table.auth_options() {
        Some(auth) => vec![format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({});",
            unique_index_name(&table.name, &auth.username_field),
            table.name,
            auth.username_field
        )],
        None => Vec::new(),
    }
}

/// Full ordered DDL for defining a table
pub fn define_statements(table: &Table) -> Vec<String> {
    let mut statements = vec![create_table(table)];
    statements.extend(create_indexes(table));
    statements
}

/// Statements renaming `table` to `new_name`. Column DDL is untouched.
pub fn rename_statements(table: &Table, new_name: &str) -> Vec<String> {
    match &table.kind {
        TableKind::View(view) => vec![
            drop_statement(table),
            create_view(new_name, &view.source_sql),
        ],
        TableKind::Plain => vec![format!("ALTER TABLE {} RENAME TO {};", table.name, new_name)],
        TableKind::Auth(auth) => vec![
            format!(
                "DROP INDEX IF EXISTS {};",
                unique_index_name(&table.name, &auth.username_field)
            ),
            format!("ALTER TABLE {} RENAME TO {};", table.name, new_name),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({});",
                unique_index_name(new_name, &auth.username_field),
                new_name,
                auth.username_field
            ),
        ],
    }
}

/// `DROP TABLE`/`DROP VIEW`
pub fn drop_statement(table: &Table) -> String {
    if table.is_view() {
        format!("DROP VIEW IF EXISTS {};", table.name)
    } else {
        format!("DROP TABLE IF EXISTS {};", table.name)
    }
}

/// DDL of the catalog system table
pub fn create_catalog(catalog: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, name TEXT UNIQUE NOT NULL, \
         kind TEXT NOT NULL, schema JSON NOT NULL);",
        catalog
    )
}

fn unique_index_name(table: &str, column: &str) -> String {
    format!("idx_{}_{}", table, column)
}
