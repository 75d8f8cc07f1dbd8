//! # Context Errors

use thiserror::Error;

/// Result type for context store operations
pub type ContextResult<T> = Result<T, ContextError>;

/// Context store and marshalling errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// No value under this key
    #[error("context key not found: {0}")]
    NotFound(String),

    /// Value read as an incompatible tag
    #[error("type mismatch for '{key}': expected {expected}, found {actual}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Foreign value with no context representation
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
}

impl ContextError {
    pub fn code(&self) -> &'static str {
        match self {
            ContextError::NotFound(_) => "CONTEXT_KEY_NOT_FOUND",
            ContextError::TypeMismatch { .. } => "TYPE_MISMATCH",
            ContextError::UnsupportedType(_) => "UNSUPPORTED_TYPE",
        }
    }
}
