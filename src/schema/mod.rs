//! Schema engine for recordbase
//!
//! Tables are defined at runtime, compiled to DDL and persisted in a catalog
//! table so definitions survive restarts.
//!
//! # Design Principles
//!
//! - Table kinds (plain, auth, view) are a tagged variant on a shared record
//! - System fields are injected by the kind and never removable
//! - DDL synthesis is pure
//! - DDL and catalog writes commit together
//! - Payloads are validated strictly before any write

pub mod ddl;
mod errors;
mod field;
mod repository;
mod table;
mod validator;

pub use errors::{SchemaError, SchemaResult, SchemaWarning, StrictSchemaError, ValidationDetails};
pub use field::{parse_datetime, validate_identifier, Field, FieldType, StorageType};
pub use repository::SchemaRepository;
pub use table::{
    AuthOptions, Operation, Rule, RuleSet, Table, TableKind, ViewOptions, CREATED_FIELD,
    EMAIL_FIELD, ID_FIELD, NAME_FIELD, PASSWORD_FIELD, SCHEMA_VERSION, UPDATED_FIELD,
};
pub use validator::{PayloadValidator, WriteMode};
