//! CRUD Gateway
//!
//! Per-table create/read/update/delete/list. Each call is authorized by the
//! table's rule for that operation before the database is touched, and every
//! decision is reported to an audit hook.

mod audit;
mod errors;
#[allow(clippy::module_inception)]
mod gateway;
mod request;
mod response;

pub use audit::{AuditEvent, AuditHook, MemoryAuditLog, TracingAuditHook};
pub use errors::{GatewayError, GatewayResult};
pub use gateway::CrudGateway;
pub use request::{Identity, ListParams, RequestScope, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
pub use response::{ErrorResponse, ListResponse, RecordResponse};
