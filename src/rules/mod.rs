//! Rule Evaluator
//!
//! Fail-closed authorization: a rule either allows an operation or denies it
//! with a reason. Broken expressions deny.

mod decision;
mod evaluator;

pub use decision::{Decision, DenyReason, DISABLED_RULE_DECISION};
pub use evaluator::{RuleEvaluator, CONTEXT_VARIABLE};
