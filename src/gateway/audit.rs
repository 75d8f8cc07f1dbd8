//! Decision auditing
//!
//! Every allow/deny decision taken by the gateway is reported to an
//! [`AuditHook`]. Each event carries: timestamp, operation, table, target
//! record (when known), acting user (when authenticated) and the decision.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::rules::Decision;
use crate::schema::Operation;

/// A single authorization decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: Uuid,

    pub timestamp: DateTime<Utc>,

    pub operation: Operation,

    /// Table name as resolved
    pub table: String,

    /// Target record id (get/update/delete, or create with a supplied id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    /// Authenticated user id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub decision: Decision,
}

impl AuditEvent {
    pub fn new(operation: Operation, table: impl Into<String>, decision: Decision) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
            table: table.into(),
            record_id: None,
            user_id: None,
            decision,
        }
    }

    /// Set target record
    pub fn with_record(mut self, id: Option<&str>) -> Self {
        self.record_id = id.map(str::to_string);
        self
    }

    /// Set acting user
    pub fn with_user(mut self, id: Option<&str>) -> Self {
        self.user_id = id.map(str::to_string);
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }

    /// One JSON line, for append-only sinks
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Receiver of gateway decisions
pub trait AuditHook: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Default hook: decisions go to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditHook;

impl AuditHook for TracingAuditHook {
    fn record(&self, event: &AuditEvent) {
        match &event.decision {
            Decision::Allow => debug!(
                operation = %event.operation,
                table = %event.table,
                record = event.record_id.as_deref().unwrap_or(""),
                user = event.user_id.as_deref().unwrap_or(""),
                "operation allowed"
            ),
            Decision::Deny(reason) => info!(
                operation = %event.operation,
                table = %event.table,
                record = event.record_id.as_deref().unwrap_or(""),
                user = event.user_id.as_deref().unwrap_or(""),
                reason = reason.code(),
                "operation denied"
            ),
        }
    }
}

/// In-memory audit log for inspection and tests
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first
    pub fn events(&self) -> Vec<AuditEvent> {
        self.lock().clone()
    }

    /// Recorded denials only
    pub fn denials(&self) -> Vec<AuditEvent> {
        self.lock()
            .iter()
            .filter(|e| !e.is_allowed())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuditEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AuditHook for MemoryAuditLog {
    fn record(&self, event: &AuditEvent) {
        self.lock().push(event.clone());
    }
}
