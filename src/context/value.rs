//! # Context Values
//!
//! Small closed tagged union. The tag is fixed at insertion time.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tag of a [`ContextValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTag {
    Integer,
    Float,
    Boolean,
    String,
    Document,
}

impl ValueTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueTag::Integer => "integer",
            ValueTag::Float => "float",
            ValueTag::Boolean => "boolean",
            ValueTag::String => "string",
            ValueTag::Document => "document",
        }
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named runtime value consulted during rule evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ContextValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    /// Structured document (JSON)
    Document(Value),
}

impl ContextValue {
    pub fn tag(&self) -> ValueTag {
        match self {
            ContextValue::Integer(_) => ValueTag::Integer,
            ContextValue::Float(_) => ValueTag::Float,
            ContextValue::Boolean(_) => ValueTag::Boolean,
            ContextValue::String(_) => ValueTag::String,
            ContextValue::Document(_) => ValueTag::Document,
        }
    }

    /// Tag a JSON value: scalars keep their own tag, everything else is a document
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Bool(b) => ContextValue::Boolean(b),
            Value::String(s) => ContextValue::String(s),
            Value::Number(n) => match (n.as_i64(), n.is_f64()) {
                (Some(i), _) => ContextValue::Integer(i),
                (None, true) => ContextValue::Float(n.as_f64().unwrap_or(f64::NAN)),
                // u64 beyond i64 range: keep exact in document form
                (None, false) => ContextValue::Document(Value::Number(n)),
            },
            other => ContextValue::Document(other),
        }
    }

    /// JSON form (non-finite floats become null)
    pub fn to_json(&self) -> Value {
        match self {
            ContextValue::Integer(i) => Value::from(*i),
            ContextValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ContextValue::Boolean(b) => Value::Bool(*b),
            ContextValue::String(s) => Value::String(s.clone()),
            ContextValue::Document(doc) => doc.clone(),
        }
    }

    /// Conventional truthiness.
    ///
    /// - integer/float: non-zero (NaN is false)
    /// - boolean: itself
    /// - string: non-empty
    /// - document: null is false; bool/number/string as above; arrays and
    ///   objects are true when non-empty
    pub fn is_truthy(&self) -> bool {
        match self {
            ContextValue::Integer(i) => *i != 0,
            ContextValue::Float(f) => *f != 0.0 && !f.is_nan(),
            ContextValue::Boolean(b) => *b,
            ContextValue::String(s) => !s.is_empty(),
            ContextValue::Document(doc) => json_truthy(doc),
        }
    }
}

fn json_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<i64> for ContextValue {
    fn from(v: i64) -> Self {
        ContextValue::Integer(v)
    }
}

impl From<i32> for ContextValue {
    fn from(v: i32) -> Self {
        ContextValue::Integer(i64::from(v))
    }
}

impl From<f64> for ContextValue {
    fn from(v: f64) -> Self {
        ContextValue::Float(v)
    }
}

impl From<bool> for ContextValue {
    fn from(v: bool) -> Self {
        ContextValue::Boolean(v)
    }
}

impl From<String> for ContextValue {
    fn from(v: String) -> Self {
        ContextValue::String(v)
    }
}

impl From<&str> for ContextValue {
    fn from(v: &str) -> Self {
        ContextValue::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_tags() {
        assert_eq!(ContextValue::from_json(json!(3)).tag(), ValueTag::Integer);
        assert_eq!(ContextValue::from_json(json!(3.5)).tag(), ValueTag::Float);
        assert_eq!(ContextValue::from_json(json!(true)).tag(), ValueTag::Boolean);
        assert_eq!(ContextValue::from_json(json!("x")).tag(), ValueTag::String);
        assert_eq!(ContextValue::from_json(json!([1])).tag(), ValueTag::Document);
        assert_eq!(ContextValue::from_json(json!(null)).tag(), ValueTag::Document);
        assert_eq!(
            ContextValue::from_json(json!(u64::MAX)).tag(),
            ValueTag::Document
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!ContextValue::Integer(0).is_truthy());
        assert!(ContextValue::Integer(-1).is_truthy());
        assert!(!ContextValue::Float(0.0).is_truthy());
        assert!(!ContextValue::Float(f64::NAN).is_truthy());
        assert!(!ContextValue::String(String::new()).is_truthy());
        assert!(ContextValue::String("false".into()).is_truthy());
        assert!(!ContextValue::Document(json!(null)).is_truthy());
        assert!(!ContextValue::Document(json!({})).is_truthy());
        assert!(ContextValue::Document(json!({"a": 1})).is_truthy());
        assert!(!ContextValue::Document(json!([])).is_truthy());
    }

    #[test]
    fn test_serialized_form_keeps_tag() {
        let value = ContextValue::Float(2.0);
        let encoded = serde_json::to_value(&value).unwrap();
        assert_eq!(encoded, json!({"type": "float", "value": 2.0}));
        let decoded: ContextValue = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, value);
    }
}
