//! recordbase - A schema-driven record backend
//!
//! Tables are defined at runtime, compiled to SQL and served through a
//! generic CRUD gateway where every operation is gated by a per-table rule.

pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod gateway;
pub mod ids;
pub mod observability;
pub mod rules;
pub mod schema;

pub use config::Config;
pub use gateway::CrudGateway;
pub use schema::SchemaRepository;
