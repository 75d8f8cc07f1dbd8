//! # Decisions
//!
//! Outcome of a rule check. Every deny carries a reason code so callers can
//! tell policy denials apart from broken expressions and cancellations.

use std::fmt;

use serde::Serialize;

/// Outcome applied to every disabled rule. The expression is never evaluated.
pub const DISABLED_RULE_DECISION: Decision = Decision::Deny(DenyReason::Disabled);

/// Why an operation was denied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum DenyReason {
    /// Rule is disabled
    Disabled,

    /// Expression evaluated to false (or a falsy value)
    Policy,

    /// Expression text failed to parse
    ExpressionParse(String),

    /// Expression parsed but failed at runtime (unknown identifier, type error)
    Evaluation(String),

    /// Write operation against a view table
    ViewReadOnly,

    /// Operation cancelled before the decision completed
    Cancelled,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::Disabled => "RULE_DISABLED",
            DenyReason::Policy => "POLICY_DENIED",
            DenyReason::ExpressionParse(_) => "EXPRESSION_PARSE_ERROR",
            DenyReason::Evaluation(_) => "EVALUATION_ERROR",
            DenyReason::ViewReadOnly => "VIEW_READ_ONLY",
            DenyReason::Cancelled => "CANCELLED",
        }
    }

    /// Diagnostic text for parse/evaluation failures
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            DenyReason::ExpressionParse(msg) | DenyReason::Evaluation(msg) => Some(msg),
            _ => None,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Disabled => write!(f, "rule is disabled"),
            DenyReason::Policy => write!(f, "denied by rule"),
            DenyReason::ExpressionParse(msg) => write!(f, "rule expression parse error: {}", msg),
            DenyReason::Evaluation(msg) => write!(f, "rule evaluation error: {}", msg),
            DenyReason::ViewReadOnly => write!(f, "view tables are read-only"),
            DenyReason::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

/// Allow or deny
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Decision::Allow => None,
            Decision::Deny(reason) => Some(reason),
        }
    }

    /// Stable code: `ALLOW` or the deny reason's code
    pub fn code(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Deny(reason) => reason.code(),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            Decision::Deny(reason) => write!(f, "deny ({})", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_policy_is_deny() {
        assert!(!DISABLED_RULE_DECISION.is_allowed());
        assert_eq!(DISABLED_RULE_DECISION.code(), "RULE_DISABLED");
    }

    #[test]
    fn test_reason_codes_are_distinct() {
        let reasons = [
            DenyReason::Disabled,
            DenyReason::Policy,
            DenyReason::ExpressionParse("x".into()),
            DenyReason::Evaluation("x".into()),
            DenyReason::ViewReadOnly,
            DenyReason::Cancelled,
        ];
        let mut codes: Vec<_> = reasons.iter().map(|r| r.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), reasons.len());
    }

    #[test]
    fn test_diagnostic_only_for_failures() {
        assert_eq!(
            DenyReason::ExpressionParse("bad token".into()).diagnostic(),
            Some("bad token")
        );
        assert_eq!(DenyReason::Policy.diagnostic(), None);
    }
}
