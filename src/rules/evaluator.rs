//! # Rule Evaluator
//!
//! Compiles rule expressions (CEL) once per distinct text and evaluates them
//! against a [`ContextStore`]. Never returns an error: every failure is a deny.
//!
//! Variables visible to an expression:
//! - every store key, as a top-level identifier
//! - `context`, a map of the whole store (defined last)
//!
//! Results that are not booleans are coerced by truthiness of their context
//! tag: zero, empty string, empty list/map and null deny; everything else
//! allows.
//!
//! The CEL engine panics on some inputs (integer division by zero, overflow,
//! out-of-range literals). Compilation and execution run under
//! `catch_unwind` so those surface as a deny like any other engine error.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use cel_interpreter::objects::{Key, Map, Value as CelValue};
use cel_interpreter::{Context, Program};
use tracing::{debug, warn};

use super::decision::{Decision, DenyReason, DISABLED_RULE_DECISION};
use crate::context::marshal::{from_cel, to_cel};
use crate::context::ContextStore;
use crate::schema::Rule;

/// Name of the variable holding the whole store
pub const CONTEXT_VARIABLE: &str = "context";

/// Shared, thread-safe rule evaluator
#[derive(Default)]
pub struct RuleEvaluator {
    cache: RwLock<HashMap<String, Arc<Program>>>,
    compiles: AtomicU64,
}

impl RuleEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide `rule` against `store`
    pub fn evaluate(&self, rule: &Rule, store: &ContextStore) -> Decision {
        if !rule.enabled {
            return DISABLED_RULE_DECISION;
        }

        let program = match self.compile(&rule.expression) {
            Ok(program) => program,
            Err(msg) => {
                warn!(
                    expression = %rule.expression,
                    error = %msg,
                    "rule expression failed to parse"
                );
                return Decision::Deny(DenyReason::ExpressionParse(msg));
            }
        };

        let ctx = build_context(store);
        let outcome = catch_unwind(AssertUnwindSafe(|| program.execute(&ctx)));
        let decision = match outcome {
            Ok(Ok(CelValue::Bool(true))) => Decision::Allow,
            Ok(Ok(CelValue::Bool(false))) => Decision::Deny(DenyReason::Policy),
            Ok(Ok(other)) => coerce(&other),
            Ok(Err(e)) => Decision::Deny(DenyReason::Evaluation(e.to_string())),
            Err(payload) => Decision::Deny(DenyReason::Evaluation(panic_message(payload))),
        };

        if let Some(msg) = decision.deny_reason().and_then(DenyReason::diagnostic) {
            warn!(expression = %rule.expression, error = %msg, "rule evaluation failed");
        } else {
            debug!(expression = %rule.expression, decision = %decision, "rule evaluated");
        }
        decision
    }

    /// Evict a compiled expression. Returns whether it was cached.
    pub fn forget(&self, expression: &str) -> bool {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(expression)
            .is_some()
    }

    /// Number of cached programs
    pub fn cached(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of times an expression was actually compiled
    pub fn compile_count(&self) -> u64 {
        self.compiles.load(Ordering::Relaxed)
    }

    /// Insert-or-fetch. Two racing threads may both compile; only the first
    /// program is kept and both callers get that one.
    fn compile(&self, expression: &str) -> Result<Arc<Program>, String> {
        if let Some(program) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(expression)
        {
            return Ok(Arc::clone(program));
        }

        let program = catch_unwind(|| Program::compile(expression))
            .map_err(panic_message)?
            .map_err(|e| e.to_string())?;
        self.compiles.fetch_add(1, Ordering::Relaxed);

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let entry = cache
            .entry(expression.to_string())
            .or_insert_with(|| Arc::new(program));
        Ok(Arc::clone(entry))
    }
}

fn build_context(store: &ContextStore) -> Context<'static> {
    let mut ctx = Context::default();
    let mut whole = HashMap::with_capacity(store.len());
    for (key, value) in store.iter() {
        let cel = to_cel(value);
        whole.insert(Key::from(key.to_string()), cel.clone());
        ctx.add_variable_from_value(key, cel);
    }
    ctx.add_variable_from_value(CONTEXT_VARIABLE, CelValue::Map(Map { map: Arc::new(whole) }));
    ctx
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("expression engine aborted: {}", detail)
}

fn coerce(value: &CelValue) -> Decision {
    match from_cel(value) {
        Ok(v) if v.is_truthy() => Decision::Allow,
        Ok(_) => Decision::Deny(DenyReason::Policy),
        Err(e) => Decision::Deny(DenyReason::Evaluation(format!(
            "result cannot be used as a decision: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users_context(user_id: &str, record_id: &str) -> ContextStore {
        let mut store = ContextStore::new();
        store.set("userId", user_id);
        store.set_document("record", json!({ "id": record_id }));
        store
    }

    #[test]
    fn test_disabled_rule_denies_without_evaluating() {
        let evaluator = RuleEvaluator::new();
        let rule = Rule {
            expression: "true".into(),
            enabled: false,
        };
        assert_eq!(
            evaluator.evaluate(&rule, &ContextStore::new()),
            Decision::Deny(DenyReason::Disabled)
        );
        // Never compiled, so never cached
        assert_eq!(evaluator.cached(), 0);

        let broken = Rule {
            expression: "((".into(),
            enabled: false,
        };
        assert_eq!(
            evaluator.evaluate(&broken, &users_context("1", "1")),
            DISABLED_RULE_DECISION
        );
    }

    #[test]
    fn test_owner_rule() {
        let evaluator = RuleEvaluator::new();
        let rule = Rule::new("context.userId == record.id");
        assert_eq!(
            evaluator.evaluate(&rule, &users_context("42", "42")),
            Decision::Allow
        );
        assert_eq!(
            evaluator.evaluate(&rule, &users_context("42", "99")),
            Decision::Deny(DenyReason::Policy)
        );
    }

    #[test]
    fn test_top_level_identifiers() {
        let evaluator = RuleEvaluator::new();
        let mut store = ContextStore::new();
        store.set("age", 21i64);
        store.set("admin", false);
        assert!(evaluator
            .evaluate(&Rule::new("age >= 18 && !admin"), &store)
            .is_allowed());
        assert!(!evaluator
            .evaluate(&Rule::new("age >= 18 && admin"), &store)
            .is_allowed());
    }

    #[test]
    fn test_parse_error_denies() {
        let evaluator = RuleEvaluator::new();
        let decision = evaluator.evaluate(&Rule::new("userId == "), &ContextStore::new());
        assert!(matches!(
            decision,
            Decision::Deny(DenyReason::ExpressionParse(_))
        ));
        assert_eq!(evaluator.cached(), 0);
    }

    #[test]
    fn test_unknown_identifier_denies() {
        let evaluator = RuleEvaluator::new();
        let decision = evaluator.evaluate(&Rule::new("missing == 1"), &ContextStore::new());
        assert!(matches!(decision, Decision::Deny(DenyReason::Evaluation(_))));
    }

    #[test]
    fn test_non_boolean_results_use_truthiness() {
        let evaluator = RuleEvaluator::new();
        let mut store = ContextStore::new();
        store.set("count", 0i64);
        store.set("name", "bob");
        store.set("empty", "");
        store.set_document("tags", json!([]));
        store.set_document("nothing", json!(null));

        let check = |expr: &str| evaluator.evaluate(&Rule::new(expr), &store);
        assert_eq!(check("count"), Decision::Deny(DenyReason::Policy));
        assert_eq!(check("count + 1"), Decision::Allow);
        assert_eq!(check("name"), Decision::Allow);
        assert_eq!(check("empty"), Decision::Deny(DenyReason::Policy));
        assert_eq!(check("tags"), Decision::Deny(DenyReason::Policy));
        assert_eq!(check("nothing"), Decision::Deny(DenyReason::Policy));
        assert_eq!(check("2.5"), Decision::Allow);
    }

    #[test]
    fn test_engine_panics_become_denials() {
        let evaluator = RuleEvaluator::new();
        let mut store = ContextStore::new();
        store.set("n", 0i64);
        store.set("big", i64::MAX);

        for expr in ["1 / n == 0", "1 % n == 0", "big + 1 > 0"] {
            let decision = evaluator.evaluate(&Rule::new(expr), &store);
            assert!(
                matches!(decision, Decision::Deny(DenyReason::Evaluation(_))),
                "{}: {:?}",
                expr,
                decision
            );
        }

        let decision = evaluator.evaluate(&Rule::new("99999999999999999999 == 1"), &store);
        assert!(matches!(
            decision,
            Decision::Deny(DenyReason::ExpressionParse(_))
        ));

        // Still usable afterwards
        store.set("n", 2i64);
        assert!(evaluator.evaluate(&Rule::new("4 / n == 2"), &store).is_allowed());
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(
            panic_message(Box::new("boom")),
            "expression engine aborted: boom"
        );
        assert_eq!(
            panic_message(Box::new(String::from("bang"))),
            "expression engine aborted: bang"
        );
        assert_eq!(
            panic_message(Box::new(7u8)),
            "expression engine aborted: unknown cause"
        );
    }

    #[test]
    fn test_compile_cache_reuse_and_forget() {
        let evaluator = RuleEvaluator::new();
        let rule = Rule::new("userId == \"1\"");
        for _ in 0..5 {
            evaluator.evaluate(&rule, &users_context("1", "1"));
        }
        assert_eq!(evaluator.compile_count(), 1);
        assert_eq!(evaluator.cached(), 1);

        assert!(evaluator.forget(&rule.expression));
        assert!(!evaluator.forget(&rule.expression));
        evaluator.evaluate(&rule, &users_context("1", "1"));
        assert_eq!(evaluator.compile_count(), 2);
    }

    #[test]
    fn test_context_variable_shadows_store_key() {
        let evaluator = RuleEvaluator::new();
        let mut store = ContextStore::new();
        store.set("context", "user supplied");
        store.set("userId", "7");
        assert!(evaluator
            .evaluate(&Rule::new("context.userId == \"7\""), &store)
            .is_allowed());
    }

    #[test]
    fn test_concurrent_evaluation() {
        let evaluator = Arc::new(RuleEvaluator::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let evaluator = Arc::clone(&evaluator);
                std::thread::spawn(move || {
                    let id = i.to_string();
                    let store = users_context(&id, &id);
                    evaluator
                        .evaluate(&Rule::new("context.userId == record.id"), &store)
                        .is_allowed()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(evaluator.cached(), 1);
    }
}
