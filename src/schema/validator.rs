//! Payload validation for record writes
//!
//! Validation semantics:
//! - payload is a JSON object
//! - every key is a column of the table
//! - system columns are never written by callers, except `id` on create
//! - values match their field type, format and bounds
//! - required columns are present on create (after defaults) and never null
//!
//! The validator does not mutate the table and is deterministic.

use serde_json::{Map, Value};

use super::errors::{SchemaError, SchemaResult, StrictSchemaError, ValidationDetails};
use super::field::{json_type_name, Field};
use super::table::{Table, ID_FIELD};
use crate::ids::IdPattern;

/// Kind of write being validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

/// Validates caller payloads against one table's columns
pub struct PayloadValidator<'a> {
    table: &'a Table,
}

impl<'a> PayloadValidator<'a> {
    pub fn new(table: &'a Table) -> Self {
        Self { table }
    }

    /// Validate a create payload. Returns the accepted columns with defaults applied.
    pub fn validate_create(&self, payload: &Value) -> SchemaResult<Map<String, Value>> {
        self.validate(payload, WriteMode::Create)
    }

    /// Validate a partial update payload. Returns the accepted columns.
    pub fn validate_update(&self, payload: &Value) -> SchemaResult<Map<String, Value>> {
        self.validate(payload, WriteMode::Update)
    }

    pub fn validate(&self, payload: &Value, mode: WriteMode) -> SchemaResult<Map<String, Value>> {
        let obj = payload
            .as_object()
            .ok_or_else(|| StrictSchemaError::NotAnObject(json_type_name(payload)))?;

        let mut accepted = Map::new();
        for (key, value) in obj {
            let field = self
                .table
                .field(key)
                .ok_or_else(|| StrictSchemaError::UnknownField(key.clone()))?;
            self.check_writable(field, mode)?;

            if value.is_null() && field.required {
                return Err(StrictSchemaError::NullField(key.clone()).into());
            }
            field.validate_value(value)?;
            if field.name == ID_FIELD && !value.is_null() {
                check_supplied_id(field, value)?;
            }
            accepted.insert(key.clone(), value.clone());
        }

        if mode == WriteMode::Create {
            for field in self.table.fields().iter().filter(|f| f.editable) {
                if accepted.contains_key(&field.name) {
                    continue;
                }
                if let Some(default) = field.default_value() {
                    accepted.insert(field.name.clone(), default);
                } else if field.required {
                    return Err(StrictSchemaError::MissingField(field.name.clone()).into());
                }
            }
        }

        Ok(accepted)
    }

    fn check_writable(&self, field: &Field, mode: WriteMode) -> SchemaResult<()> {
        if field.editable {
            return Ok(());
        }
        // A caller may choose the id of a new record
        if mode == WriteMode::Create && field.name == ID_FIELD {
            return Ok(());
        }
        Err(StrictSchemaError::ReadOnlyField(field.name.clone()).into())
    }
}

fn check_supplied_id(field: &Field, value: &Value) -> SchemaResult<()> {
    let Some(pattern) = field.autogenerate_pattern.as_deref() else {
        return Ok(());
    };
    let id = value.as_str().unwrap_or_default();
    if IdPattern::parse(pattern)?.matches(id) {
        Ok(())
    } else {
        Err(SchemaError::InvalidValue(ValidationDetails::new(
            &field.name,
            format!("id matching {}", pattern),
            format!("'{}'", id),
        )))
    }
}
