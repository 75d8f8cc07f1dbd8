//! # Field Model
//!
//! One column of a table: semantic type, flags, default and bounds.
//!
//! Supported field types:
//! - url, text, email, password: UTF-8 strings (stored as TEXT)
//! - integer: 64-bit signed integer (INTEGER)
//! - float: 64-bit floating point (REAL)
//! - boolean: stored as 0/1 (BOOLEAN)
//! - datetime: RFC 3339 or `YYYY-MM-DD HH:MM:SS[.fff][Z]` (DATETIME)
//! - json: any JSON value, stored as canonical serialized text (JSON)

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{SchemaError, SchemaResult, ValidationDetails};
use crate::ids::IdPattern;

const MAX_NAME_LENGTH: usize = 64;

/// Semantic field type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Url,
    Text,
    Integer,
    Float,
    Boolean,
    Datetime,
    Email,
    Password,
    Json,
}

impl FieldType {
    /// Returns the type name for error messages and documents
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Url => "url",
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Datetime => "datetime",
            FieldType::Email => "email",
            FieldType::Password => "password",
            FieldType::Json => "json",
        }
    }

    /// Storage type this field type compiles to
    pub fn storage_type(&self) -> StorageType {
        match self {
            FieldType::Url | FieldType::Text | FieldType::Email | FieldType::Password => {
                StorageType::Text
            }
            FieldType::Integer => StorageType::Integer,
            FieldType::Float => StorageType::Real,
            FieldType::Boolean => StorageType::Boolean,
            FieldType::Datetime => StorageType::Datetime,
            FieldType::Json => StorageType::Json,
        }
    }

    /// Whether bounds apply to the character length rather than the value
    fn is_textual(&self) -> bool {
        matches!(
            self,
            FieldType::Url | FieldType::Text | FieldType::Email | FieldType::Password
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relational storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Text,
    Integer,
    Real,
    Boolean,
    Datetime,
    Json,
}

impl StorageType {
    /// DDL keyword
    pub fn keyword(&self) -> &'static str {
        match self {
            StorageType::Text => "TEXT",
            StorageType::Integer => "INTEGER",
            StorageType::Real => "REAL",
            StorageType::Boolean => "BOOLEAN",
            StorageType::Datetime => "DATETIME",
            StorageType::Json => "JSON",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

fn default_editable() -> bool {
    true
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// Column name, unique within its table
    pub name: String,

    /// Semantic type
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Must be present and non-null on create
    #[serde(default)]
    pub required: bool,

    /// At most one per table
    #[serde(default)]
    pub primary_key: bool,

    /// Injected by the table kind, not removable
    #[serde(default)]
    pub system: bool,

    /// May appear in a caller payload
    #[serde(default = "default_editable")]
    pub editable: bool,

    /// Default value in textual form, parsed per type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Lower bound (value for numbers, length for text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Upper bound (value for numbers, length for text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Auto-generation pattern, e.g. `[a-z0-9]{15}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autogenerate_pattern: Option<String>,
}

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern"))
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static pattern"))
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://[^\s]+$").expect("static pattern"))
}

/// Validate a table or column identifier.
///
/// Identifiers are interpolated into DDL, so only `[A-Za-z_][A-Za-z0-9_]*` is accepted.
pub fn validate_identifier(kind: &str, name: &str) -> SchemaResult<()> {
    if name.is_empty() {
        return Err(SchemaError::validation(format!("{} name must not be empty", kind)));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(SchemaError::validation(format!(
            "{} name '{}' exceeds {} characters",
            kind, name, MAX_NAME_LENGTH
        )));
    }
    if !name_regex().is_match(name) {
        return Err(SchemaError::validation(format!(
            "{} name '{}' must match [A-Za-z_][A-Za-z0-9_]*",
            kind, name
        )));
    }
    Ok(())
}

/// Parse a datetime in any accepted textual form
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    let trimmed = s.strip_suffix('Z').unwrap_or(s);
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f").ok()
}

impl Field {
    /// Create an optional, editable field
    pub fn new(name: impl Into<String>, field_type: FieldType) -> SchemaResult<Self> {
        let name = name.into();
        validate_identifier("field", &name)?;
        Ok(Self {
            name,
            field_type,
            required: false,
            primary_key: false,
            system: false,
            editable: true,
            default: None,
            min: None,
            max: None,
            autogenerate_pattern: None,
        })
    }

    /// Mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as primary key
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark as injected by the table kind
    pub(crate) fn system(mut self, editable: bool) -> Self {
        self.system = true;
        self.editable = editable;
        self
    }

    /// Set the default value; it must parse as this field's type
    pub fn with_default(mut self, default: impl Into<String>) -> SchemaResult<Self> {
        let default = default.into();
        let parsed = self.parse_literal(&default)?;
        self.validate_value(&parsed)?;
        self.default = Some(default);
        Ok(self)
    }

    /// Set numeric (or length) bounds
    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> SchemaResult<Self> {
        if matches!(
            self.field_type,
            FieldType::Boolean | FieldType::Datetime | FieldType::Json
        ) {
            return Err(SchemaError::validation(format!(
                "field '{}' of type {} does not support bounds",
                self.name, self.field_type
            )));
        }
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(SchemaError::validation(format!(
                    "field '{}': min {} is greater than max {}",
                    self.name, lo, hi
                )));
            }
        }
        self.min = min;
        self.max = max;
        Ok(self)
    }

    /// Set the auto-generation pattern
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> SchemaResult<Self> {
        let pattern = pattern.into();
        IdPattern::parse(&pattern)?;
        self.autogenerate_pattern = Some(pattern);
        Ok(self)
    }

    /// Storage type of this column
    pub fn to_storage_type(&self) -> StorageType {
        self.field_type.storage_type()
    }

    /// Column DDL: `<name> <type>[ PRIMARY KEY][ NOT NULL][ DEFAULT '<value>']`.
    ///
    /// A primary key implies non-null, so `NOT NULL` is only emitted for
    /// required non-key columns.
    pub fn to_column_ddl(&self) -> String {
        let mut ddl = format!("{} {}", self.name, self.to_storage_type().keyword());
        if self.primary_key {
            ddl.push_str(" PRIMARY KEY");
        }
        if self.required && !self.primary_key {
            ddl.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            ddl.push_str(&format!(" DEFAULT '{}'", default.replace('\'', "''")));
        }
        ddl
    }

    /// Parsed default value, if any
    pub fn default_value(&self) -> Option<Value> {
        self.default
            .as_deref()
            .and_then(|d| self.parse_literal(d).ok())
    }

    /// Parse a textual literal according to this field's type
    pub fn parse_literal(&self, literal: &str) -> SchemaResult<Value> {
        let invalid = || {
            SchemaError::InvalidValue(ValidationDetails::type_mismatch(
                &self.name,
                self.field_type.as_str(),
                format!("'{}'", literal),
            ))
        };

        match self.field_type {
            FieldType::Url
            | FieldType::Text
            | FieldType::Email
            | FieldType::Password
            | FieldType::Datetime => Ok(Value::String(literal.to_string())),
            FieldType::Integer => literal
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid()),
            FieldType::Float => literal
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(invalid),
            FieldType::Boolean => match literal.trim() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            FieldType::Json => serde_json::from_str(literal).map_err(|_| invalid()),
        }
    }

    /// Validate a JSON value against this field's type, format and bounds.
    ///
    /// `null` is accepted here; presence rules are applied by the validator.
    pub fn validate_value(&self, value: &Value) -> SchemaResult<()> {
        if value.is_null() {
            return Ok(());
        }

        let mismatch = |expected: &str| {
            SchemaError::InvalidValue(ValidationDetails::type_mismatch(
                &self.name,
                expected,
                json_type_name(value),
            ))
        };

        match self.field_type {
            FieldType::Text | FieldType::Password => {
                let s = value.as_str().ok_or_else(|| mismatch("string"))?;
                self.check_bounds(s.chars().count() as f64)?;
            }
            FieldType::Email => {
                let s = value.as_str().ok_or_else(|| mismatch("email string"))?;
                if !email_regex().is_match(s) {
                    return Err(self.format_error("valid email address", s));
                }
                self.check_bounds(s.chars().count() as f64)?;
            }
            FieldType::Url => {
                let s = value.as_str().ok_or_else(|| mismatch("url string"))?;
                if !url_regex().is_match(s) {
                    return Err(self.format_error("http(s) url", s));
                }
                self.check_bounds(s.chars().count() as f64)?;
            }
            FieldType::Integer => {
                let n = value.as_i64().ok_or_else(|| mismatch("integer"))?;
                self.check_bounds(n as f64)?;
            }
            FieldType::Float => {
                let n = value.as_f64().ok_or_else(|| mismatch("number"))?;
                self.check_bounds(n)?;
            }
            FieldType::Boolean => {
                if !value.is_boolean() {
                    return Err(mismatch("boolean"));
                }
            }
            FieldType::Datetime => {
                let s = value.as_str().ok_or_else(|| mismatch("datetime string"))?;
                if parse_datetime(s).is_none() {
                    return Err(self.format_error("datetime", s));
                }
            }
            FieldType::Json => {}
        }

        Ok(())
    }

    fn check_bounds(&self, measured: f64) -> SchemaResult<()> {
        let what = if self.field_type.is_textual() {
            "length"
        } else {
            "value"
        };
        if let Some(min) = self.min {
            if measured < min {
                return Err(SchemaError::InvalidValue(ValidationDetails::new(
                    &self.name,
                    format!("{} >= {}", what, min),
                    measured.to_string(),
                )));
            }
        }
        if let Some(max) = self.max {
            if measured > max {
                return Err(SchemaError::InvalidValue(ValidationDetails::new(
                    &self.name,
                    format!("{} <= {}", what, max),
                    measured.to_string(),
                )));
            }
        }
        Ok(())
    }

    fn format_error(&self, expected: &str, actual: &str) -> SchemaError {
        SchemaError::InvalidValue(ValidationDetails::new(
            &self.name,
            expected,
            format!("'{}'", actual),
        ))
    }

    /// Convert a validated JSON value into its storage representation
    pub fn to_sql_value(&self, value: &Value) -> Value {
        match (self.field_type, value) {
            (_, Value::Null) => Value::Null,
            (FieldType::Boolean, Value::Bool(b)) => Value::from(i64::from(*b)),
            (FieldType::Json, v) => Value::String(v.to_string()),
            (_, v) => v.clone(),
        }
    }

    /// Convert a stored value back into its JSON representation
    pub fn from_sql_value(&self, value: Value) -> Value {
        match (self.field_type, value) {
            (_, Value::Null) => Value::Null,
            (FieldType::Boolean, Value::Number(n)) => Value::Bool(n.as_i64() != Some(0)),
            (FieldType::Json, Value::String(s)) => {
                serde_json::from_str(&s).unwrap_or(Value::String(s))
            }
            (_, v) => v,
        }
    }
}

/// Returns the JSON type name for error messages.
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "float"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
