//! # Gateway Errors
//!
//! Error codes:
//! - TABLE_NOT_FOUND / RECORD_NOT_FOUND (404)
//! - every deny code (403): RULE_DISABLED, POLICY_DENIED, EXPRESSION_PARSE_ERROR,
//!   EVALUATION_ERROR, VIEW_READ_ONLY, CANCELLED
//! - STRICT_SCHEMA / INVALID_VALUE / VALIDATION_ERROR (400)
//! - auth codes (400/401/409)
//! - DUPLICATE_TABLE / CONFLICT (409)
//! - TRANSACTION_FAILURE / DATABASE_ERROR (500)

use thiserror::Error;

use crate::auth::AuthError;
use crate::db::DbError;
use crate::rules::DenyReason;
use crate::schema::{SchemaError, StrictSchemaError};

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Outcome of a failed gateway call
#[derive(Debug, Error)]
pub enum GatewayError {
    // ==================
    // Not Found
    // ==================
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("record '{id}' not found in {table}")]
    RecordNotFound { table: String, id: String },

    // ==================
    // Authorization
    // ==================
    /// The operation's rule denied it; no database access happened
    #[error("operation denied: {reason}")]
    Authorization { reason: DenyReason },

    // ==================
    // Payload
    // ==================
    #[error(transparent)]
    StrictSchema(StrictSchemaError),

    /// Schema-level failure (invalid value, repository errors)
    #[error(transparent)]
    Schema(SchemaError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Write violated a uniqueness constraint
    #[error("conflict: {0}")]
    Conflict(String),

    // ==================
    // Storage
    // ==================
    #[error("database error: {0}")]
    Database(#[from] DbError),
}

impl GatewayError {
    pub fn denied(reason: DenyReason) -> Self {
        GatewayError::Authorization { reason }
    }

    /// Deny reason when this is an authorization failure
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            GatewayError::Authorization { reason } => Some(reason),
            _ => None,
        }
    }

    /// Error code (client-facing)
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::TableNotFound(_) => "TABLE_NOT_FOUND",
            GatewayError::RecordNotFound { .. } => "RECORD_NOT_FOUND",
            GatewayError::Authorization { reason } => reason.code(),
            GatewayError::StrictSchema(_) => "STRICT_SCHEMA",
            GatewayError::Schema(e) => e.code(),
            GatewayError::Auth(e) => e.code(),
            GatewayError::Conflict(_) => "CONFLICT",
            GatewayError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::TableNotFound(_) | GatewayError::RecordNotFound { .. } => 404,
            GatewayError::Authorization { .. } => 403,
            GatewayError::StrictSchema(_) => 400,
            GatewayError::Schema(e) => e.status_code(),
            GatewayError::Auth(e) => e.status_code(),
            GatewayError::Conflict(_) => 409,
            GatewayError::Database(_) => 500,
        }
    }
}

impl From<SchemaError> for GatewayError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::TableNotFound(name) => GatewayError::TableNotFound(name),
            SchemaError::StrictSchema(e) => GatewayError::StrictSchema(e),
            SchemaError::Database(e) => GatewayError::Database(e),
            other => GatewayError::Schema(other),
        }
    }
}
