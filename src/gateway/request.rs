//! Gateway request types
//!
//! What the transport hands the gateway besides the table name and payload:
//! ambient identity, caller parameters and a cancellation token.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Default page size for `list`
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Largest page `list` will return
pub const MAX_LIST_LIMIT: usize = 500;

/// Authenticated caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Auth table the user record lives in
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl Identity {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }
}

/// Per-request input from the transport
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    /// `None` for anonymous callers
    pub identity: Option<Identity>,
    /// Query/path parameters, exposed to rules
    pub params: Map<String, Value>,
    pub cancellation: CancellationToken,
}

impl RequestScope {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.user_id.as_str())
    }
}

/// Paging for `list`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

impl ListParams {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    /// Limit clamped to `1..=MAX_LIST_LIMIT`
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_LIST_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scope_builders() {
        let scope = RequestScope::authenticated(Identity::user("42").with_table("users"))
            .with_param("filter", "recent")
            .with_param("page", 2);
        assert_eq!(scope.user_id(), Some("42"));
        assert_eq!(scope.params["page"], json!(2));
        assert!(!scope.is_cancelled());
        assert!(RequestScope::anonymous().user_id().is_none());
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let scope = RequestScope::anonymous().with_cancellation(token.clone());
        token.cancel();
        assert!(scope.is_cancelled());
    }

    #[test]
    fn test_list_limit_is_clamped() {
        assert_eq!(ListParams::default().effective_limit(), 100);
        assert_eq!(ListParams::new(10_000, 0).effective_limit(), 500);
        assert_eq!(ListParams::new(0, 0).effective_limit(), 1);

        let params: ListParams = serde_json::from_value(json!({"offset": 5})).unwrap();
        assert_eq!(params, ListParams::new(100, 5));
    }
}
