//! Gateway response types
//!
//! JSON-ready results for the transport layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::GatewayError;
use crate::schema::ID_FIELD;

/// One record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordResponse {
    pub table: String,
    pub record: Map<String, Value>,
}

impl RecordResponse {
    pub fn id(&self) -> Option<&str> {
        self.record.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.record.get(field)
    }
}

/// One page of records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    pub table: String,
    pub items: Vec<Map<String, Value>>,
    pub limit: usize,
    pub offset: usize,
    /// Rows in the table, ignoring paging
    pub total: u64,
}

/// Error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    /// Create from a gateway error
    pub fn from_error(err: &GatewayError) -> Self {
        Self {
            status: err.status_code(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::DenyReason;
    use serde_json::json;

    #[test]
    fn test_record_accessors() {
        let Value::Object(record) = json!({"id": "abc", "title": "x"}) else {
            unreachable!()
        };
        let response = RecordResponse {
            table: "notes".into(),
            record,
        };
        assert_eq!(response.id(), Some("abc"));
        assert_eq!(response.get("title"), Some(&json!("x")));
    }

    #[test]
    fn test_error_response_from_deny() {
        let err = GatewayError::denied(DenyReason::Policy);
        let response = ErrorResponse::from_error(&err);
        assert_eq!(response.status, 403);
        assert_eq!(response.code, "POLICY_DENIED");
        assert!(response.to_json().contains("\"status\":403"));
    }
}
