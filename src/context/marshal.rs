//! # CEL Marshalling
//!
//! Conversion between context values and the expression engine's values.
//!
//! Objects and arrays travel as engine maps and lists, and null as null.
//! A document holding a bare scalar has no engine shape of its own, so it
//! travels as bytes of its canonical JSON text. Engine bytes are read back
//! as that JSON, which keeps every tag intact across a round trip.

use std::collections::HashMap;
use std::sync::Arc;

use cel_interpreter::objects::{Key, Map, Value as CelValue};
use serde_json::Value;

use super::errors::{ContextError, ContextResult};
use super::value::ContextValue;

/// Context value into an engine value. Total.
pub fn to_cel(value: &ContextValue) -> CelValue {
    match value {
        ContextValue::Integer(i) => CelValue::Int(*i),
        ContextValue::Float(f) => CelValue::Float(*f),
        ContextValue::Boolean(b) => CelValue::Bool(*b),
        ContextValue::String(s) => CelValue::String(Arc::new(s.clone())),
        ContextValue::Document(doc) => document_to_cel(doc),
    }
}

fn document_to_cel(doc: &Value) -> CelValue {
    match doc {
        Value::Null | Value::Array(_) | Value::Object(_) => json_to_cel(doc.clone()),
        Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            CelValue::Bytes(Arc::new(doc.to_string().into_bytes()))
        }
    }
}

/// Engine value back into a context value.
///
/// Lists and maps become documents; null becomes a null document. Bytes
/// must hold a JSON scalar, as written for a scalar document.
pub fn from_cel(value: &CelValue) -> ContextResult<ContextValue> {
    match value {
        CelValue::Int(i) => Ok(ContextValue::Integer(*i)),
        CelValue::UInt(u) => i64::try_from(*u).map(ContextValue::Integer).map_err(|_| {
            ContextError::UnsupportedType(format!("uint {} exceeds integer range", u))
        }),
        CelValue::Float(f) => Ok(ContextValue::Float(*f)),
        CelValue::Bool(b) => Ok(ContextValue::Boolean(*b)),
        CelValue::String(s) => Ok(ContextValue::String(s.as_ref().clone())),
        CelValue::Null => Ok(ContextValue::Document(Value::Null)),
        CelValue::List(_) | CelValue::Map(_) => cel_to_json(value).map(ContextValue::Document),
        CelValue::Bytes(bytes) => match serde_json::from_slice::<Value>(bytes) {
            Ok(doc @ (Value::Bool(_) | Value::Number(_) | Value::String(_))) => {
                Ok(ContextValue::Document(doc))
            }
            _ => Err(ContextError::UnsupportedType(cel_type_name(value).to_string())),
        },
        other => Err(ContextError::UnsupportedType(cel_type_name(other).to_string())),
    }
}

pub fn json_to_cel(value: Value) -> CelValue {
    match value {
        Value::Null => CelValue::Null,
        Value::Bool(b) => CelValue::Bool(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                CelValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                CelValue::UInt(u)
            } else if let Some(f) = n.as_f64() {
                CelValue::Float(f)
            } else {
                CelValue::Null
            }
        }
        Value::String(s) => CelValue::String(s.into()),
        Value::Array(arr) => {
            let values = arr.into_iter().map(json_to_cel).collect::<Vec<_>>();
            CelValue::List(Arc::new(values))
        }
        Value::Object(map) => {
            let mut obj = HashMap::new();
            for (k, v) in map {
                obj.insert(Key::from(k), json_to_cel(v));
            }
            CelValue::Map(Map { map: Arc::new(obj) })
        }
    }
}

/// Engine value into JSON. Map keys must be strings.
pub fn cel_to_json(value: &CelValue) -> ContextResult<Value> {
    match value {
        CelValue::Null => Ok(Value::Null),
        CelValue::Bool(b) => Ok(Value::Bool(*b)),
        CelValue::Int(i) => Ok(Value::from(*i)),
        CelValue::UInt(u) => Ok(Value::from(*u)),
        CelValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| ContextError::UnsupportedType(format!("non-finite float {}", f))),
        CelValue::String(s) => Ok(Value::String(s.as_ref().clone())),
        CelValue::List(items) => items
            .iter()
            .map(cel_to_json)
            .collect::<ContextResult<Vec<_>>>()
            .map(Value::Array),
        CelValue::Map(map) => {
            let mut obj = serde_json::Map::new();
            for (key, item) in map.map.iter() {
                let name = match key {
                    Key::String(s) => s.as_ref().clone(),
                    _ => {
                        return Err(ContextError::UnsupportedType(
                            "map with non-string keys".to_string(),
                        ))
                    }
                };
                obj.insert(name, cel_to_json(item)?);
            }
            Ok(Value::Object(obj))
        }
        other => Err(ContextError::UnsupportedType(cel_type_name(other).to_string())),
    }
}

fn cel_type_name(value: &CelValue) -> &'static str {
    match value {
        CelValue::List(_) => "list",
        CelValue::Map(_) => "map",
        CelValue::Function(..) => "function",
        CelValue::Int(_) => "int",
        CelValue::UInt(_) => "uint",
        CelValue::Float(_) => "double",
        CelValue::String(_) => "string",
        CelValue::Bytes(_) => "bytes",
        CelValue::Bool(_) => "bool",
        CelValue::Duration(_) => "duration",
        CelValue::Timestamp(_) => "timestamp",
        CelValue::Null => "null",
    }
}
