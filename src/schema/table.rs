//! # Table Model
//!
//! A table is an ordered list of fields, five access rules and a kind.
//!
//! ## Kinds
//! - Plain: carries the `id`, `created`, `updated` system fields.
//! - Auth: Plain system fields plus `email`, `password`, `name`.
//! - View: no system fields, backed by a source query, read-only.
//!
//! Field order is column order. System fields always come first.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{SchemaError, SchemaResult, SchemaWarning};
use super::field::{validate_identifier, Field, FieldType};
use crate::ids::DEFAULT_ID_PATTERN;

/// Schema marker written into every table document
pub const SCHEMA_VERSION: u32 = 1;

/// Name of the primary key system field
pub const ID_FIELD: &str = "id";
/// Name of the creation timestamp system field
pub const CREATED_FIELD: &str = "created";
/// Name of the modification timestamp system field
pub const UPDATED_FIELD: &str = "updated";
/// Default auth username field
pub const EMAIL_FIELD: &str = "email";
/// Default auth password field
pub const PASSWORD_FIELD: &str = "password";
/// Auth display name field
pub const NAME_FIELD: &str = "name";

/// The five gated operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    List,
    Get,
    Add,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::List,
        Operation::Get,
        Operation::Add,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Get => "get",
            Operation::Add => "add",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Whether this operation writes
    pub fn is_write(&self) -> bool {
        matches!(self, Operation::Add | Operation::Update | Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An access rule: an expression plus an enabled flag
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rule {
    pub expression: String,
    pub enabled: bool,
}

impl Rule {
    /// Enabled rule with the given expression
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            enabled: true,
        }
    }

    /// Disabled rule (never evaluated)
    pub fn disabled() -> Self {
        Self::default()
    }
}

/// The five rules of a table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub list: Rule,
    pub get: Rule,
    pub add: Rule,
    pub update: Rule,
    pub delete: Rule,
}

impl RuleSet {
    /// Every operation gated by the same expression
    pub fn uniform(expression: &str) -> Self {
        Self {
            list: Rule::new(expression),
            get: Rule::new(expression),
            add: Rule::new(expression),
            update: Rule::new(expression),
            delete: Rule::new(expression),
        }
    }

    pub fn get(&self, op: Operation) -> &Rule {
        match op {
            Operation::List => &self.list,
            Operation::Get => &self.get,
            Operation::Add => &self.add,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        }
    }

    pub fn get_mut(&mut self, op: Operation) -> &mut Rule {
        match op {
            Operation::List => &mut self.list,
            Operation::Get => &mut self.get,
            Operation::Add => &mut self.add,
            Operation::Update => &mut self.update,
            Operation::Delete => &mut self.delete,
        }
    }
}

/// Auth-kind payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOptions {
    pub username_field: String,
    pub password_field: String,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            username_field: EMAIL_FIELD.to_string(),
            password_field: PASSWORD_FIELD.to_string(),
        }
    }
}

/// View-kind payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewOptions {
    #[serde(rename = "sourceSQL")]
    pub source_sql: String,
}

/// Table kind with its kind-specific payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableKind {
    Plain,
    Auth(AuthOptions),
    View(ViewOptions),
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Plain => "plain",
            TableKind::Auth(_) => "auth",
            TableKind::View(_) => "view",
        }
    }

    pub fn is_view(&self) -> bool {
        matches!(self, TableKind::View(_))
    }
}

/// A user-defined table
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Assigned by the repository on define; empty until then
    pub id: String,
    pub name: String,
    pub schema_version: u32,
    pub kind: TableKind,
    fields: Vec<Field>,
    pub rules: RuleSet,
}

/// Persisted and wire form of a table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableDocument {
    id: String,
    name: String,
    kind: String,
    schema: u32,
    fields: Vec<Field>,
    rules: RuleSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth: Option<AuthOptions>,
    #[serde(default, rename = "sourceSQL", skip_serializing_if = "Option::is_none")]
    source_sql: Option<String>,
}

fn system_fields() -> SchemaResult<Vec<Field>> {
    Ok(vec![
        Field::new(ID_FIELD, FieldType::Text)?
            .required()
            .primary_key()
            .with_pattern(DEFAULT_ID_PATTERN)?
            .system(false),
        Field::new(CREATED_FIELD, FieldType::Datetime)?
            .required()
            .system(false),
        Field::new(UPDATED_FIELD, FieldType::Datetime)?
            .required()
            .system(false),
    ])
}

fn auth_fields() -> SchemaResult<Vec<Field>> {
    Ok(vec![
        Field::new(EMAIL_FIELD, FieldType::Email)?
            .required()
            .system(true),
        Field::new(PASSWORD_FIELD, FieldType::Password)?
            .required()
            .system(true),
        Field::new(NAME_FIELD, FieldType::Text)?.system(true),
    ])
}

impl Table {
    /// Plain table: system fields followed by `fields`
    pub fn plain(name: impl Into<String>, fields: Vec<Field>) -> SchemaResult<Self> {
        let mut all = system_fields()?;
        all.extend(fields);
        Self::build(name.into(), TableKind::Plain, all)
    }

    /// Auth table: system and auth fields followed by `fields`
    pub fn auth(name: impl Into<String>, fields: Vec<Field>) -> SchemaResult<Self> {
        let mut all = system_fields()?;
        all.extend(auth_fields()?);
        all.extend(fields);
        Self::build(name.into(), TableKind::Auth(AuthOptions::default()), all)
    }

    /// Read-only view over `source_sql`; `fields` describe its output columns
    pub fn view(
        name: impl Into<String>,
        source_sql: impl Into<String>,
        fields: Vec<Field>,
    ) -> SchemaResult<Self> {
        let source_sql = source_sql.into();
        if source_sql.trim().is_empty() {
            return Err(SchemaError::validation("view source query must not be empty"));
        }
        Self::build(name.into(), TableKind::View(ViewOptions { source_sql }), fields)
    }

    fn build(name: String, kind: TableKind, fields: Vec<Field>) -> SchemaResult<Self> {
        let table = Self {
            id: String::new(),
            name,
            schema_version: SCHEMA_VERSION,
            kind,
            fields,
            rules: RuleSet::default(),
        };
        table.validate()?;
        Ok(table)
    }

    /// Replace the rule set
    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// Replace one rule
    pub fn with_rule(mut self, op: Operation, rule: Rule) -> Self {
        *self.rules.get_mut(op) = rule;
        self
    }

    /// Fields in column order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Rule gating `op`
    pub fn rule(&self, op: Operation) -> &Rule {
        self.rules.get(op)
    }

    pub fn is_view(&self) -> bool {
        self.kind.is_view()
    }

    /// Auth payload when this is an auth table
    pub fn auth_options(&self) -> Option<&AuthOptions> {
        match &self.kind {
            TableKind::Auth(opts) => Some(opts),
            _ => None,
        }
    }

    /// View payload when this is a view
    pub fn view_options(&self) -> Option<&ViewOptions> {
        match &self.kind {
            TableKind::View(opts) => Some(opts),
            _ => None,
        }
    }

    pub fn view_options_mut(&mut self) -> Option<&mut ViewOptions> {
        match &mut self.kind {
            TableKind::View(opts) => Some(opts),
            _ => None,
        }
    }

    /// Check structural invariants
    pub fn validate(&self) -> SchemaResult<()> {
        validate_identifier("table", &self.name)?;
        if self.name.starts_with('_') {
            return Err(SchemaError::validation(format!(
                "table name '{}' is reserved (leading underscore)",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.to_ascii_lowercase()) {
                return Err(SchemaError::validation(format!(
                    "duplicate field name '{}' in table '{}'",
                    field.name, self.name
                )));
            }
        }

        let pk_count = self.fields.iter().filter(|f| f.primary_key).count();
        if pk_count > 1 {
            return Err(SchemaError::validation(format!(
                "table '{}' declares {} primary keys",
                self.name, pk_count
            )));
        }

        match &self.kind {
            TableKind::Plain => {
                self.require_system_fields(&[ID_FIELD, CREATED_FIELD, UPDATED_FIELD])
            }
            TableKind::Auth(opts) => {
                self.require_system_fields(&[
                    ID_FIELD,
                    CREATED_FIELD,
                    UPDATED_FIELD,
                    EMAIL_FIELD,
                    PASSWORD_FIELD,
                    NAME_FIELD,
                ])?;
                for name in [&opts.username_field, &opts.password_field] {
                    if self.field(name).is_none() {
                        return Err(SchemaError::validation(format!(
                            "auth table '{}' references missing field '{}'",
                            self.name, name
                        )));
                    }
                }
                Ok(())
            }
            TableKind::View(_) => {
                if let Some(system) = self.fields.iter().find(|f| f.system) {
                    return Err(SchemaError::validation(format!(
                        "view '{}' cannot carry system field '{}'",
                        self.name, system.name
                    )));
                }
                Ok(())
            }
        }
    }

    fn require_system_fields(&self, names: &[&str]) -> SchemaResult<()> {
        for name in names {
            match self.field(name) {
                Some(f) if f.system => {}
                Some(_) => {
                    return Err(SchemaError::validation(format!(
                        "field '{}' is reserved for the system in table '{}'",
                        name, self.name
                    )))
                }
                None => {
                    return Err(SchemaError::validation(format!(
                        "table '{}' is missing system field '{}'",
                        self.name, name
                    )))
                }
            }
        }
        Ok(())
    }

    /// Non-fatal configuration warnings
    pub fn warnings(&self) -> Vec<SchemaWarning> {
        let mut warnings = Vec::new();
        if matches!(self.kind, TableKind::Plain) && self.fields.iter().all(|f| f.system) {
            warnings.push(SchemaWarning::EmptyTable {
                table: self.name.clone(),
            });
        }
        if self.is_view() {
            if self.fields.is_empty() {
                warnings.push(SchemaWarning::EmptyTable {
                    table: self.name.clone(),
                });
            } else {
                warnings.push(SchemaWarning::UncheckedViewFields {
                    table: self.name.clone(),
                });
            }
        }
        warnings
    }

    /// Create statement for this table or view
    pub fn to_create_table_ddl(&self) -> String {
        super::ddl::create_table(self)
    }

    /// Serialize into the persisted/wire document
    pub fn to_document(&self) -> Value {
        let doc = TableDocument {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind.as_str().to_string(),
            schema: self.schema_version,
            fields: self.fields.clone(),
            rules: self.rules.clone(),
            auth: self.auth_options().cloned(),
            source_sql: self.view_options().map(|v| v.source_sql.clone()),
        };
        // TableDocument only holds strings, numbers, bools and maps with string keys
        serde_json::to_value(doc).unwrap_or(Value::Null)
    }

    /// Rebuild a table from its document form
    pub fn from_document(doc: &Value) -> SchemaResult<Self> {
        let doc: TableDocument = serde_json::from_value(doc.clone())?;
        let kind = match doc.kind.as_str() {
            "plain" => TableKind::Plain,
            "auth" => TableKind::Auth(doc.auth.unwrap_or_default()),
            "view" => TableKind::View(ViewOptions {
                source_sql: doc.source_sql.ok_or_else(|| {
                    SchemaError::validation(format!("view '{}' has no sourceSQL", doc.name))
                })?,
            }),
            other => {
                return Err(SchemaError::validation(format!(
                    "unknown table kind '{}'",
                    other
                )))
            }
        };

        let table = Self {
            id: doc.id,
            name: doc.name,
            schema_version: doc.schema,
            kind,
            fields: doc.fields,
            rules: doc.rules,
        };
        table.validate()?;
        Ok(table)
    }
}
