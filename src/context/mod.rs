//! Context Store
//!
//! Typed per-request variables consulted by rule expressions, plus
//! marshalling to and from the expression engine.

mod errors;
pub mod marshal;
mod store;
mod value;

pub use errors::{ContextError, ContextResult};
pub use store::ContextStore;
pub use value::{ContextValue, ValueTag};
