//! # CRUD Gateway
//!
//! Generic create/read/update/delete/list over defined tables. Every call:
//!
//! 1. resolves the table (not found otherwise)
//! 2. builds a fresh context store from the request
//! 3. asks the rule evaluator; a deny returns before any session is checked out
//! 4. validates the payload strictly and runs the statement on one session
//!
//! Context store keys, in insertion order (later keys win):
//! - every caller parameter, as a top-level key
//! - `params`: all caller parameters as a document
//! - `env`: the configured environment as a document
//! - `operation`, `table`
//! - `record`: the targeted record as known from the request (absent for list)
//! - `authenticated`, `isAdmin`, `userId`, `userEmail`, `userTable`
//!   (empty strings for anonymous callers)

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::debug;

use super::audit::{AuditEvent, AuditHook, TracingAuditHook};
use super::errors::{GatewayError, GatewayResult};
use super::request::{Identity, ListParams, RequestScope};
use super::response::{ListResponse, RecordResponse};
use crate::auth::{hash_password, verify_password, verify_unknown_user, AuthError, PasswordPolicy};
use crate::config::Config;
use crate::context::ContextStore;
use crate::db::{DbError, Row, Session};
use crate::ids::{generate_record_id, IdPattern};
use crate::rules::{Decision, DenyReason, RuleEvaluator};
use crate::schema::{
    FieldType, Operation, PayloadValidator, Rule, SchemaRepository, Table, CREATED_FIELD,
    ID_FIELD, UPDATED_FIELD,
};

/// Timestamp format of `created`/`updated`
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3fZ";

/// Rule-gated record operations over every defined table
pub struct CrudGateway {
    repository: Arc<SchemaRepository>,
    evaluator: Arc<RuleEvaluator>,
    audit: Arc<dyn AuditHook>,
    environment: BTreeMap<String, String>,
    password_policy: PasswordPolicy,
}

impl CrudGateway {
    pub fn new(repository: Arc<SchemaRepository>) -> Self {
        Self {
            repository,
            evaluator: Arc::new(RuleEvaluator::new()),
            audit: Arc::new(TracingAuditHook),
            environment: BTreeMap::new(),
            password_policy: PasswordPolicy::default(),
        }
    }

    /// Gateway exposing `config.environment` to rules as `env`
    pub fn with_config(repository: Arc<SchemaRepository>, config: &Config) -> Self {
        let mut gateway = Self::new(repository);
        gateway.environment = config.environment.clone();
        gateway
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditHook>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<RuleEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.password_policy = policy;
        self
    }

    pub fn repository(&self) -> &Arc<SchemaRepository> {
        &self.repository
    }

    pub fn evaluator(&self) -> &Arc<RuleEvaluator> {
        &self.evaluator
    }

    // ==================
    // Operations
    // ==================

    /// Insert a record. `id` may be supplied if it matches the id pattern.
    pub fn create(
        &self,
        table: &str,
        payload: Value,
        scope: &RequestScope,
    ) -> GatewayResult<RecordResponse> {
        let table = self.repository.lookup(table)?;
        self.authorize(&table, Operation::Add, Some(rule_record(&table, &payload)), scope)?;

        let mut accepted = PayloadValidator::new(&table).validate_create(&payload)?;
        self.hash_passwords(&table, &mut accepted)?;

        let id = match accepted.get(ID_FIELD).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => new_record_id(&table),
        };
        let now = timestamp();
        accepted.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        accepted.insert(CREATED_FIELD.to_string(), Value::String(now.clone()));
        accepted.insert(UPDATED_FIELD.to_string(), Value::String(now));

        let columns: Vec<&str> = accepted.keys().map(String::as_str).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.name,
            columns.join(", "),
            placeholders.join(", ")
        );
        let params = storage_values(&table, &accepted);

        let mut session = self.repository.pool().checkout()?;
        session
            .execute(&sql, &params)
            .map_err(|e| write_error(&table, e))?;
        let record = fetch(session.as_mut(), &table, &id)?.ok_or_else(|| not_found(&table, &id))?;

        debug!(table = %table.name, id = %id, "record created");
        Ok(RecordResponse {
            table: table.name.clone(),
            record,
        })
    }

    /// Fetch one record by id
    pub fn read(
        &self,
        table: &str,
        id: &str,
        scope: &RequestScope,
    ) -> GatewayResult<RecordResponse> {
        let table = self.repository.lookup(table)?;
        self.authorize(&table, Operation::Get, Some(id_record(id)), scope)?;

        let mut session = self.repository.pool().checkout()?;
        let record = fetch(session.as_mut(), &table, id)?.ok_or_else(|| not_found(&table, id))?;
        Ok(RecordResponse {
            table: table.name.clone(),
            record,
        })
    }

    /// Partially update a record; `updated` is refreshed
    pub fn update(
        &self,
        table: &str,
        id: &str,
        payload: Value,
        scope: &RequestScope,
    ) -> GatewayResult<RecordResponse> {
        let table = self.repository.lookup(table)?;
        let mut record = rule_record(&table, &payload);
        if let Value::Object(obj) = &mut record {
            obj.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        }
        self.authorize(&table, Operation::Update, Some(record), scope)?;

        let mut accepted = PayloadValidator::new(&table).validate_update(&payload)?;
        self.hash_passwords(&table, &mut accepted)?;
        accepted.insert(UPDATED_FIELD.to_string(), Value::String(timestamp()));

        let assignments: Vec<String> = accepted
            .keys()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            table.name,
            assignments.join(", "),
            ID_FIELD,
            accepted.len() + 1
        );
        let mut params = storage_values(&table, &accepted);
        params.push(Value::String(id.to_string()));

        let mut session = self.repository.pool().checkout()?;
        let affected = session
            .execute(&sql, &params)
            .map_err(|e| write_error(&table, e))?;
        if affected == 0 {
            return Err(not_found(&table, id));
        }
        let record = fetch(session.as_mut(), &table, id)?.ok_or_else(|| not_found(&table, id))?;

        debug!(table = %table.name, id = %id, "record updated");
        Ok(RecordResponse {
            table: table.name.clone(),
            record,
        })
    }

    /// Delete a record by id
    pub fn delete(&self, table: &str, id: &str, scope: &RequestScope) -> GatewayResult<()> {
        let table = self.repository.lookup(table)?;
        self.authorize(&table, Operation::Delete, Some(id_record(id)), scope)?;

        let sql = format!("DELETE FROM {} WHERE {} = ?1", table.name, ID_FIELD);
        let mut session = self.repository.pool().checkout()?;
        let affected = session.execute(&sql, &[Value::String(id.to_string())])?;
        if affected == 0 {
            return Err(not_found(&table, id));
        }

        debug!(table = %table.name, id = %id, "record deleted");
        Ok(())
    }

    /// One page of records, oldest first for tables
    pub fn list(
        &self,
        table: &str,
        params: ListParams,
        scope: &RequestScope,
    ) -> GatewayResult<ListResponse> {
        let table = self.repository.lookup(table)?;
        self.authorize(&table, Operation::List, None, scope)?;

        let limit = params.effective_limit();
        let order = if table.is_view() {
            String::new()
        } else {
            format!(" ORDER BY {}, {}", CREATED_FIELD, ID_FIELD)
        };
        let sql = format!("SELECT * FROM {}{} LIMIT ?1 OFFSET ?2", table.name, order);

        let mut session = self.repository.pool().checkout()?;
        let rows = session.query(
            &sql,
            &[Value::from(limit as u64), Value::from(params.offset as u64)],
        )?;
        let total = session
            .query(&format!("SELECT COUNT(*) AS total FROM {}", table.name), &[])?
            .first()
            .and_then(|row| row.get("total"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        Ok(ListResponse {
            table: table.name.clone(),
            items: rows.into_iter().map(|row| decode_row(&table, row)).collect(),
            limit,
            offset: params.offset,
            total,
        })
    }

    /// Replace a rule and drop the old expression from the compile cache.
    /// Returns the previous rule.
    pub fn update_rule(&self, table: &str, op: Operation, rule: Rule) -> GatewayResult<Rule> {
        let previous = self.repository.set_rule(table, op, rule)?;
        self.evaluator.forget(&previous.expression);
        Ok(previous)
    }

    /// Check credentials against an auth table and return the caller identity.
    ///
    /// Unknown usernames pay for one Argon2 verification like known ones.
    pub fn authenticate(
        &self,
        table: &str,
        username: &str,
        password: &str,
    ) -> GatewayResult<Identity> {
        let table = self.repository.lookup(table)?;
        let auth = table
            .auth_options()
            .ok_or_else(|| GatewayError::Auth(AuthError::InvalidCredentials))?;

        let sql = format!("SELECT * FROM {} WHERE {} = ?1", table.name, auth.username_field);
        let mut session = self.repository.pool().checkout()?;
        let row = session
            .query(&sql, &[Value::String(username.to_string())])?
            .into_iter()
            .next();
        drop(session);

        let Some(hash) = row
            .as_ref()
            .and_then(|r| r.get(&auth.password_field))
            .and_then(Value::as_str)
        else {
            verify_unknown_user(password);
            return Err(AuthError::InvalidCredentials.into());
        };
        if !verify_password(password, hash)? {
            return Err(AuthError::InvalidCredentials.into());
        }
        let Some(row) = row.as_ref() else {
            return Err(AuthError::InvalidCredentials.into());
        };

        let user_id = row
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .ok_or(AuthError::InvalidCredentials)?;
        Ok(Identity::user(user_id)
            .with_email(username)
            .with_table(table.name.clone()))
    }

    // ==================
    // Authorization
    // ==================

    /// Decide, report to the audit hook, and turn a deny into an error
    fn authorize(
        &self,
        table: &Table,
        op: Operation,
        record: Option<Value>,
        scope: &RequestScope,
    ) -> GatewayResult<()> {
        let record_id = record
            .as_ref()
            .and_then(|r| r.get(ID_FIELD))
            .and_then(Value::as_str)
            .map(str::to_string);
        let decision = self.decide(table, op, record, scope);

        self.audit.record(
            &AuditEvent::new(op, &table.name, decision.clone())
                .with_record(record_id.as_deref())
                .with_user(scope.user_id()),
        );

        match decision {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(GatewayError::denied(reason)),
        }
    }

    fn decide(
        &self,
        table: &Table,
        op: Operation,
        record: Option<Value>,
        scope: &RequestScope,
    ) -> Decision {
        if scope.is_cancelled() {
            return Decision::Deny(DenyReason::Cancelled);
        }
        if table.is_view() && op.is_write() {
            return Decision::Deny(DenyReason::ViewReadOnly);
        }

        let store = self.build_context(table, op, record, scope);
        let decision = self.evaluator.evaluate(table.rule(op), &store);

        if scope.is_cancelled() {
            return Decision::Deny(DenyReason::Cancelled);
        }
        decision
    }

    fn build_context(
        &self,
        table: &Table,
        op: Operation,
        record: Option<Value>,
        scope: &RequestScope,
    ) -> ContextStore {
        let mut store = ContextStore::new();
        for (key, value) in &scope.params {
            store.set_json(key.as_str(), value.clone());
        }
        store.set_document("params", Value::Object(scope.params.clone()));
        store.set_document(
            "env",
            Value::Object(
                self.environment
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        store.set("operation", op.as_str());
        store.set("table", table.name.as_str());
        match record {
            Some(record) => {
                store.set_document("record", record);
            }
            None => {
                store.remove("record");
            }
        }

        let identity = scope.identity.as_ref();
        store.set("authenticated", identity.is_some());
        store.set("isAdmin", identity.map_or(false, |i| i.is_admin));
        store.set("userId", identity.map_or("", |i| i.user_id.as_str()));
        store.set(
            "userEmail",
            identity.and_then(|i| i.email.as_deref()).unwrap_or(""),
        );
        store.set(
            "userTable",
            identity.and_then(|i| i.table.as_deref()).unwrap_or(""),
        );
        store
    }

    // ==================
    // Payload helpers
    // ==================

    /// Enforce the password policy and replace plaintext with Argon2id hashes
    fn hash_passwords(
        &self,
        table: &Table,
        accepted: &mut Map<String, Value>,
    ) -> GatewayResult<()> {
        for field in table.fields().iter().filter(|f| f.field_type == FieldType::Password) {
            if let Some(Value::String(plain)) = accepted.get(&field.name) {
                self.password_policy.validate(plain)?;
                let hashed = hash_password(plain)?;
                accepted.insert(field.name.clone(), Value::String(hashed));
            }
        }
        Ok(())
    }
}

/// The payload as rules see it: passwords removed
fn rule_record(table: &Table, payload: &Value) -> Value {
    let mut record = payload.clone();
    if let Value::Object(obj) = &mut record {
        for field in table.fields().iter().filter(|f| f.field_type == FieldType::Password) {
            obj.remove(&field.name);
        }
    }
    record
}

fn id_record(id: &str) -> Value {
    let mut obj = Map::new();
    obj.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    Value::Object(obj)
}

fn new_record_id(table: &Table) -> String {
    table
        .field(ID_FIELD)
        .and_then(|f| f.autogenerate_pattern.as_deref())
        .and_then(|p| IdPattern::parse(p).ok())
        .map(|p| p.generate())
        .unwrap_or_else(generate_record_id)
}

fn timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

fn storage_values(table: &Table, accepted: &Map<String, Value>) -> Vec<Value> {
    accepted
        .iter()
        .map(|(column, value)| match table.field(column) {
            Some(field) => field.to_sql_value(value),
            None => value.clone(),
        })
        .collect()
}

fn fetch(
    session: &mut dyn Session,
    table: &Table,
    id: &str,
) -> GatewayResult<Option<Map<String, Value>>> {
    let sql = format!("SELECT * FROM {} WHERE {} = ?1", table.name, ID_FIELD);
    let rows = session.query(&sql, &[Value::String(id.to_string())])?;
    Ok(rows.into_iter().next().map(|row| decode_row(table, row)))
}

/// Stored row to response form: typed per field, passwords removed
fn decode_row(table: &Table, row: Row) -> Map<String, Value> {
    row.into_iter()
        .filter_map(|(column, value)| match table.field(&column) {
            Some(field) if field.field_type == FieldType::Password => None,
            Some(field) => Some((column, field.from_sql_value(value))),
            None => Some((column, value)),
        })
        .collect()
}

fn not_found(table: &Table, id: &str) -> GatewayError {
    GatewayError::RecordNotFound {
        table: table.name.clone(),
        id: id.to_string(),
    }
}

fn write_error(table: &Table, err: DbError) -> GatewayError {
    if !err.is_constraint_violation() {
        return GatewayError::Database(err);
    }
    let message = err.to_string();
    match table.auth_options() {
        Some(auth) if message.contains(&format!("{}.{}", table.name, auth.username_field)) => {
            GatewayError::Auth(AuthError::EmailAlreadyExists)
        }
        _ => GatewayError::Conflict(message),
    }
}
