//! # Schema Errors
//!
//! Error codes:
//! - VALIDATION_ERROR (malformed field or table definition)
//! - INVALID_VALUE (payload value does not satisfy its field)
//! - STRICT_SCHEMA (payload shape does not match the table)
//! - TABLE_NOT_FOUND
//! - DUPLICATE_TABLE
//! - TRANSACTION_FAILURE (DDL + catalog write rolled back)
//! - DATABASE_ERROR
//! - DOCUMENT_ERROR (persisted document could not be decoded)

use std::fmt;

use thiserror::Error;

use crate::db::DbError;

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Validation failure details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationDetails {
    /// Field name (or `$table` for table-level problems)
    pub field: String,
    /// Expected type or condition
    pub expected: String,
    /// Actual value or type found
    pub actual: String,
}

impl ValidationDetails {
    pub fn new(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::new(field, "field to be present", "missing")
    }

    pub fn type_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::new(field, expected, actual)
    }

    pub fn null_value(field: impl Into<String>) -> Self {
        Self::new(field, "non-null value", "null")
    }
}

impl fmt::Display for ValidationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field '{}': expected {}, got {}",
            self.field, self.expected, self.actual
        )
    }
}

/// Schema engine errors
#[derive(Debug, Error)]
pub enum SchemaError {
    // ==================
    // Definition Errors
    // ==================
    /// Malformed field or table definition
    #[error("validation error: {0}")]
    Validation(String),

    /// A value does not satisfy its field definition
    #[error("invalid value: {0}")]
    InvalidValue(ValidationDetails),

    /// Payload keys do not match the table's columns
    #[error("strict schema violation: {0}")]
    StrictSchema(#[from] StrictSchemaError),

    // ==================
    // Repository Errors
    // ==================
    /// No table with this name or id
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Table name already taken
    #[error("duplicate table name: {0}")]
    DuplicateTable(String),

    /// DDL and catalog write could not be applied together; both were rolled back
    #[error("transaction failure: {0}")]
    TransactionFailure(String),

    /// Session checkout or statement failure outside a defining transaction
    #[error("database error: {0}")]
    Database(#[from] DbError),

    /// Persisted schema document could not be encoded or decoded
    #[error("document error: {0}")]
    Document(#[from] serde_json::Error),
}

impl SchemaError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Error code (client-facing)
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidValue(_) => "INVALID_VALUE",
            Self::StrictSchema(_) => "STRICT_SCHEMA",
            Self::TableNotFound(_) => "TABLE_NOT_FOUND",
            Self::DuplicateTable(_) => "DUPLICATE_TABLE",
            Self::TransactionFailure(_) => "TRANSACTION_FAILURE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Document(_) => "DOCUMENT_ERROR",
        }
    }

    /// HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidValue(_) | Self::StrictSchema(_) => 400,
            Self::TableNotFound(_) => 404,
            Self::DuplicateTable(_) => 409,
            Self::TransactionFailure(_) | Self::Database(_) | Self::Document(_) => 500,
        }
    }
}

/// Payload shape violation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrictSchemaError {
    /// Payload is not a JSON object
    #[error("payload must be an object, got {0}")]
    NotAnObject(&'static str),

    /// Key is not a column of the table
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// Column exists but callers may not write it
    #[error("field '{0}' is not editable")]
    ReadOnlyField(String),

    /// Required column absent on create
    #[error("missing required field '{0}'")]
    MissingField(String),

    /// Required column set to null
    #[error("field '{0}' must not be null")]
    NullField(String),
}

impl StrictSchemaError {
    /// Offending field, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::NotAnObject(_) => None,
            Self::UnknownField(f)
            | Self::ReadOnlyField(f)
            | Self::MissingField(f)
            | Self::NullField(f) => Some(f),
        }
    }
}

/// Non-fatal configuration warning
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaWarning {
    /// Table has no columns at all
    EmptyTable { table: String },
    /// View declares output fields that the catalog cannot verify
    UncheckedViewFields { table: String },
}

impl fmt::Display for SchemaWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyTable { table } => write!(f, "table '{}' has no fields", table),
            Self::UncheckedViewFields { table } => write!(
                f,
                "view '{}' declares fields that are not checked against its source query",
                table
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SchemaError::validation("x").code(), "VALIDATION_ERROR");
        assert_eq!(SchemaError::TableNotFound("notes".into()).code(), "TABLE_NOT_FOUND");
        assert_eq!(SchemaError::DuplicateTable("notes".into()).status_code(), 409);
        assert_eq!(
            SchemaError::TransactionFailure("boom".into()).status_code(),
            500
        );
    }

    #[test]
    fn test_validation_details_display() {
        let details = ValidationDetails::type_mismatch("age", "integer", "string");
        let display = format!("{}", details);
        assert!(display.contains("age"));
        assert!(display.contains("integer"));
        assert!(display.contains("string"));
    }

    #[test]
    fn test_strict_schema_converts() {
        let err: SchemaError = StrictSchemaError::UnknownField("color".into()).into();
        assert_eq!(err.code(), "STRICT_SCHEMA");
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("color"));
    }

    #[test]
    fn test_warning_display() {
        let warning = SchemaWarning::EmptyTable {
            table: "scratch".into(),
        };
        assert_eq!(warning.to_string(), "table 'scratch' has no fields");
    }
}
