//! # Schema Repository
//!
//! Owns the live table definitions. Every definition is persisted twice:
//! as DDL (the table or view itself) and as a row in the catalog table
//! holding its document form. Both writes share one transaction.
//!
//! The in-memory cache is read-mostly. Writers hold the write lock for the
//! whole transaction so readers never observe an uncommitted definition.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::ddl;
use super::errors::{SchemaError, SchemaResult};
use super::field::validate_identifier;
use super::table::{Operation, Rule, Table};
use crate::config::Config;
use crate::db::{in_transaction, Session, SessionPool};
use crate::ids::generate_table_id;

/// Authoritative set of table definitions
pub struct SchemaRepository {
    pool: Arc<dyn SessionPool>,
    catalog: String,
    files_dir: Option<PathBuf>,
    tables: RwLock<Vec<Arc<Table>>>,
}

impl SchemaRepository {
    /// Create the catalog if absent and load every persisted definition
    pub fn open(pool: Arc<dyn SessionPool>, config: &Config) -> SchemaResult<Self> {
        validate_identifier("catalog table", &config.catalog_table)?;
        let catalog = config.catalog_table.clone();

        let tables = {
            let mut session = pool.checkout()?;
            session.execute(&ddl::create_catalog(&catalog), &[])?;
            load_catalog(session.as_mut(), &catalog)?
        };
        info!(catalog = %catalog, tables = tables.len(), "schema repository opened");

        Ok(Self {
            pool,
            catalog,
            files_dir: config.files_dir.clone(),
            tables: RwLock::new(tables),
        })
    }

    /// Session capability shared with the gateway
    pub fn pool(&self) -> &Arc<dyn SessionPool> {
        &self.pool
    }

    /// Persist a new table and return its id.
    ///
    /// The table's DDL and its catalog row commit together or not at all.
    pub fn define(&self, mut table: Table) -> SchemaResult<String> {
        table.validate()?;
        for warning in table.warnings() {
            warn!(table = %table.name, %warning, "configuration warning");
        }

        let mut tables = self.write();
        if find_by_name(&tables, &table.name).is_some() {
            return Err(SchemaError::DuplicateTable(table.name));
        }
        if table.id.is_empty() {
            table.id = generate_table_id();
        } else if tables.iter().any(|t| t.id == table.id) {
            return Err(SchemaError::DuplicateTable(table.id));
        }

        let document = serde_json::to_string(&table.to_document())?;
        let insert = format!(
            "INSERT INTO {} (id, name, kind, schema) VALUES (?1, ?2, ?3, ?4)",
            self.catalog
        );

        let mut session = self.pool.checkout()?;
        in_transaction(session.as_mut(), |s| -> SchemaResult<()> {
            for statement in ddl::define_statements(&table) {
                s.execute(&statement, &[])?;
            }
            s.execute(
                &insert,
                &[
                    json!(table.id),
                    json!(table.name),
                    json!(table.kind.as_str()),
                    json!(document),
                ],
            )?;
            Ok(())
        })
        .map_err(|e| rolled_back("define", &table.name, e))?;

        info!(table = %table.name, id = %table.id, kind = table.kind.as_str(), "table defined");
        let id = table.id.clone();
        tables.push(Arc::new(table));
        Ok(id)
    }

    /// Rename a table, relocating its upload directory if one exists
    pub fn rename(&self, name_or_id: &str, new_name: &str) -> SchemaResult<Arc<Table>> {
        validate_identifier("table", new_name)?;
        if new_name.starts_with('_') {
            return Err(SchemaError::validation(format!(
                "table name '{}' is reserved",
                new_name
            )));
        }

        let mut tables = self.write();
        let index = find(&tables, name_or_id)
            .ok_or_else(|| SchemaError::TableNotFound(name_or_id.to_string()))?;
        let current = Arc::clone(&tables[index]);
        if let Some(other) = find_by_name(&tables, new_name) {
            if other != index {
                return Err(SchemaError::DuplicateTable(new_name.to_string()));
            }
        }

        let mut renamed = (*current).clone();
        renamed.name = new_name.to_string();
        let document = serde_json::to_string(&renamed.to_document())?;
        let update = format!(
            "UPDATE {} SET name = ?1, schema = ?2 WHERE id = ?3",
            self.catalog
        );
        let relocation = self.relocation(&current.name, new_name);
        let mut moved = false;

        let mut session = self.pool.checkout()?;
        let outcome = in_transaction(session.as_mut(), |s| -> SchemaResult<Vec<(usize, Table)>> {
            for statement in ddl::rename_statements(&current, new_name) {
                s.execute(&statement, &[])?;
            }
            s.execute(
                &update,
                &[json!(renamed.name), json!(document), json!(renamed.id)],
            )?;
            let refreshed = if current.is_view() {
                Vec::new()
            } else {
                self.refresh_views(s, &tables)?
            };
            if let Some((from, to)) = &relocation {
                fs::rename(from, to).map_err(|e| {
                    SchemaError::TransactionFailure(format!(
                        "relocating {}: {}",
                        from.display(),
                        e
                    ))
                })?;
                moved = true;
            }
            Ok(refreshed)
        });

        let refreshed = match outcome {
            Ok(refreshed) => refreshed,
            Err(e) => {
                if moved {
                    if let Some((from, to)) = &relocation {
                        if let Err(io) = fs::rename(to, from) {
                            warn!(path = %to.display(), error = %io, "failed to move files back");
                        }
                    }
                }
                return Err(rolled_back("rename", &current.name, e));
            }
        };

        info!(
            table = %current.name,
            new_name = %new_name,
            files_moved = moved,
            views_refreshed = refreshed.len(),
            "table renamed"
        );
        for (view_index, view) in refreshed {
            tables[view_index] = Arc::new(view);
        }
        let renamed = Arc::new(renamed);
        tables[index] = Arc::clone(&renamed);
        Ok(renamed)
    }

    /// Re-read view bodies SQLite rewrote during a table rename and persist
    /// them to the catalog. Returns the updated definitions with their cache
    /// positions; the caller swaps them in after commit.
    fn refresh_views(
        &self,
        session: &mut dyn Session,
        tables: &[Arc<Table>],
    ) -> SchemaResult<Vec<(usize, Table)>> {
        let statement = format!("UPDATE {} SET schema = ?1 WHERE id = ?2", self.catalog);
        let mut refreshed = Vec::new();

        for row in session.query(ddl::LIVE_VIEWS, &[])? {
            let (Some(Value::String(name)), Some(Value::String(sql))) =
                (row.get("name"), row.get("sql"))
            else {
                continue;
            };
            let Some(view_index) = find_by_name(tables, name) else {
                continue;
            };
            let Some(source) = ddl::view_source(sql) else {
                warn!(view = %name, "unrecognized view definition left as is");
                continue;
            };
            let mut view = (*tables[view_index]).clone();
            let Some(options) = view.view_options_mut() else {
                continue;
            };
            if options.source_sql.trim().trim_end_matches(';') == source {
                continue;
            }
            options.source_sql = source;

            let document = serde_json::to_string(&view.to_document())?;
            session.execute(&statement, &[json!(document), json!(view.id)])?;
            debug!(view = %view.name, "view source refreshed");
            refreshed.push((view_index, view));
        }
        Ok(refreshed)
    }

    /// Resolve a table by id or name
    pub fn lookup(&self, name_or_id: &str) -> SchemaResult<Arc<Table>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        find(&tables, name_or_id)
            .map(|i| Arc::clone(&tables[i]))
            .ok_or_else(|| SchemaError::TableNotFound(name_or_id.to_string()))
    }

    /// All tables in creation order
    pub fn list(&self) -> Vec<Arc<Table>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop a table or view together with its catalog row
    pub fn drop_table(&self, name_or_id: &str) -> SchemaResult<Arc<Table>> {
        let mut tables = self.write();
        let index = find(&tables, name_or_id)
            .ok_or_else(|| SchemaError::TableNotFound(name_or_id.to_string()))?;
        let table = Arc::clone(&tables[index]);
        let delete = format!("DELETE FROM {} WHERE id = ?1", self.catalog);

        let mut session = self.pool.checkout()?;
        in_transaction(session.as_mut(), |s| -> SchemaResult<()> {
            s.execute(&ddl::drop_statement(&table), &[])?;
            s.execute(&delete, &[json!(table.id)])?;
            Ok(())
        })
        .map_err(|e| rolled_back("drop", &table.name, e))?;

        info!(table = %table.name, id = %table.id, "table dropped");
        tables.remove(index);
        Ok(table)
    }

    /// Replace the rule gating `op`. Returns the previous rule.
    pub fn set_rule(&self, name_or_id: &str, op: Operation, rule: Rule) -> SchemaResult<Rule> {
        let mut tables = self.write();
        let index = find(&tables, name_or_id)
            .ok_or_else(|| SchemaError::TableNotFound(name_or_id.to_string()))?;

        let mut updated = (*tables[index]).clone();
        let previous = std::mem::replace(updated.rules.get_mut(op), rule);
        let document = serde_json::to_string(&updated.to_document())?;
        let statement = format!("UPDATE {} SET schema = ?1 WHERE id = ?2", self.catalog);

        let mut session = self.pool.checkout()?;
        in_transaction(session.as_mut(), |s| -> SchemaResult<()> {
            s.execute(&statement, &[json!(document), json!(updated.id)])?;
            Ok(())
        })
        .map_err(|e| rolled_back("set_rule", &updated.name, e))?;

        debug!(table = %updated.name, operation = %op, "rule updated");
        tables[index] = Arc::new(updated);
        Ok(previous)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Table>>> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// `(from, to)` when the table has an upload directory to move
    fn relocation(&self, old: &str, new: &str) -> Option<(PathBuf, PathBuf)> {
        let root = self.files_dir.as_deref()?;
        let from = root.join(old);
        from.is_dir().then(|| (from, root.join(new)))
    }

    /// Upload directory of a table, whether or not it exists yet
    pub fn files_path(&self, table: &Table) -> Option<PathBuf> {
        self.files_dir.as_deref().map(|root: &Path| root.join(&table.name))
    }
}

fn load_catalog(session: &mut dyn Session, catalog: &str) -> SchemaResult<Vec<Arc<Table>>> {
    let rows = session.query(
        &format!("SELECT schema FROM {} ORDER BY rowid", catalog),
        &[],
    )?;
    rows.iter()
        .map(|row| {
            let document = match row.get("schema") {
                Some(Value::String(text)) => serde_json::from_str(text)?,
                Some(other) => other.clone(),
                None => Value::Null,
            };
            Table::from_document(&document).map(Arc::new)
        })
        .collect()
}

fn find(tables: &[Arc<Table>], name_or_id: &str) -> Option<usize> {
    tables
        .iter()
        .position(|t| t.id == name_or_id)
        .or_else(|| find_by_name(tables, name_or_id))
}

// SQLite identifiers are case-insensitive
fn find_by_name(tables: &[Arc<Table>], name: &str) -> Option<usize> {
    tables.iter().position(|t| t.name.eq_ignore_ascii_case(name))
}

fn rolled_back(action: &str, table: &str, err: SchemaError) -> SchemaError {
    warn!(action, table, error = %err, "transaction rolled back");
    match err {
        SchemaError::TransactionFailure(_) => err,
        other => SchemaError::TransactionFailure(other.to_string()),
    }
}
