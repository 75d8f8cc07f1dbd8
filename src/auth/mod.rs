//! Auth-table credentials
//!
//! Password policy and Argon2id hashing for records of auth tables.

pub mod crypto;
mod errors;

pub use crypto::{
    hash_password, verify_password, verify_unknown_user, PasswordPolicy, MIN_PASSWORD_LENGTH,
};
pub use errors::{AuthError, AuthResult};
