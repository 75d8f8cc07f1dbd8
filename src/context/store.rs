//! # Context Store
//!
//! Keyed collection of [`ContextValue`]s handed to the rule evaluator.
//! Built per request and discarded afterwards.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::errors::{ContextError, ContextResult};
use super::value::{ContextValue, ValueTag};

/// Per-request key/value store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextStore {
    // Ordered so dumps and marshalled maps are deterministic
    entries: BTreeMap<String, ContextValue>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns the previous value, if any.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<ContextValue>,
    ) -> Option<ContextValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Insert a JSON value, tagged by [`ContextValue::from_json`]
    pub fn set_json(&mut self, key: impl Into<String>, value: Value) -> Option<ContextValue> {
        self.entries.insert(key.into(), ContextValue::from_json(value))
    }

    /// Insert a structured document regardless of its JSON shape
    pub fn set_document(&mut self, key: impl Into<String>, doc: Value) -> Option<ContextValue> {
        self.entries.insert(key.into(), ContextValue::Document(doc))
    }

    pub fn get(&self, key: &str) -> ContextResult<&ContextValue> {
        self.entries
            .get(key)
            .ok_or_else(|| ContextError::NotFound(key.to_string()))
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    // ==================
    // Typed reads
    // ==================

    pub fn get_integer(&self, key: &str) -> ContextResult<i64> {
        match self.get(key)? {
            ContextValue::Integer(i) => Ok(*i),
            other => Err(mismatch(key, ValueTag::Integer, other)),
        }
    }

    /// Integers widen to float
    pub fn get_float(&self, key: &str) -> ContextResult<f64> {
        match self.get(key)? {
            ContextValue::Float(f) => Ok(*f),
            ContextValue::Integer(i) => Ok(*i as f64),
            other => Err(mismatch(key, ValueTag::Float, other)),
        }
    }

    pub fn get_bool(&self, key: &str) -> ContextResult<bool> {
        match self.get(key)? {
            ContextValue::Boolean(b) => Ok(*b),
            other => Err(mismatch(key, ValueTag::Boolean, other)),
        }
    }

    pub fn get_str(&self, key: &str) -> ContextResult<&str> {
        match self.get(key)? {
            ContextValue::String(s) => Ok(s.as_str()),
            other => Err(mismatch(key, ValueTag::String, other)),
        }
    }

    pub fn get_document(&self, key: &str) -> ContextResult<&Value> {
        match self.get(key)? {
            ContextValue::Document(doc) => Ok(doc),
            other => Err(mismatch(key, ValueTag::Document, other)),
        }
    }

    // ==================
    // Export
    // ==================

    /// Whole store as a JSON object
    pub fn to_document(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(map)
    }

    /// Human-readable listing, one `key (tag) = value` line per entry
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(&format!("{} ({}) = {}\n", key, value.tag(), value));
        }
        out
    }
}

fn mismatch(key: &str, expected: ValueTag, actual: &ContextValue) -> ContextError {
    ContextError::TypeMismatch {
        key: key.to_string(),
        expected: expected.as_str(),
        actual: actual.tag().as_str(),
    }
}
