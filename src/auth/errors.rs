//! # Auth Errors
//!
//! Error types for auth-table credentials.

use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Credential errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    // ==================
    // Authentication Errors
    // ==================
    /// Unknown email or wrong password (generic - don't leak which)
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Email already registered in this auth table
    #[error("Email already registered")]
    EmailAlreadyExists,

    /// Password does not meet requirements
    #[error("Password does not meet requirements: {0}")]
    WeakPassword(String),

    // ==================
    // Internal Errors
    // ==================
    /// Password hashing failed
    #[error("Internal error: password hashing failed")]
    HashingFailed,
}

impl AuthError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            AuthError::WeakPassword(_) => 400,

            // 401 Unauthorized
            AuthError::InvalidCredentials => 401,

            // 409 Conflict
            AuthError::EmailAlreadyExists => 409,

            // 500 Internal Server Error
            AuthError::HashingFailed => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::EmailAlreadyExists => "EMAIL_ALREADY_EXISTS",
            AuthError::WeakPassword(_) => "WEAK_PASSWORD",
            AuthError::HashingFailed => "HASHING_FAILED",
        }
    }

    /// Returns whether this error should be logged at warn level
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AuthError::InvalidCredentials.status_code(), 401);
        assert_eq!(AuthError::EmailAlreadyExists.status_code(), 409);
        assert_eq!(AuthError::HashingFailed.status_code(), 500);
        assert!(AuthError::WeakPassword("short".into()).is_client_error());
    }

    #[test]
    fn test_error_messages_do_not_leak_info() {
        let err = AuthError::InvalidCredentials;
        assert!(!err.to_string().contains("password"));
        assert!(!err.to_string().contains("email"));
    }
}
