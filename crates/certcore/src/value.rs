use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dynamic value type for worker inputs/outputs and the execution data bag
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Json(serde_json::Value),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Json(j) => j.as_str(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Json(j) => j.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Json(j) => j.as_bool(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Deep conversion from JSON, mapping arrays and objects into their
    /// native variants instead of wrapping the whole tree in `Json`.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Json(j) => j.clone(),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Traverse a dotted path ("a.b.c") through nested objects.
    /// Returns `None` on the first missing segment.
    pub fn lookup_path(&self, path: &str) -> Option<Value> {
        let mut current = self.clone();
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?.clone(),
                Value::Json(json) => Value::from_json(json.get(segment)?.clone()),
                _ => return None,
            };
        }
        Some(current)
    }

    /// Equality that treats a `Json` wrapper and its native counterpart
    /// as the same value.
    pub fn loosely_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Json(a), _) => Value::from_json(a.clone()).loosely_eq(other),
            (_, Value::Json(b)) => self.loosely_eq(&Value::from_json(b.clone())),
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).map_or(false, |w| v.loosely_eq(w)))
            }
            _ => self == other,
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Value::Json(j)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> Value {
        let mut inner = HashMap::new();
        inner.insert("status".to_string(), Value::String("HALAL".to_string()));
        inner.insert("score".to_string(), Value::Number(0.92));
        let mut outer = HashMap::new();
        outer.insert("classification".to_string(), Value::Object(inner));
        Value::Object(outer)
    }

    #[test]
    fn lookup_path_traverses_nested_objects() {
        let value = nested();
        assert_eq!(
            value.lookup_path("classification.status"),
            Some(Value::String("HALAL".to_string()))
        );
        assert_eq!(
            value.lookup_path("classification.score"),
            Some(Value::Number(0.92))
        );
        assert_eq!(value.lookup_path("classification.missing"), None);
        assert_eq!(value.lookup_path("nope"), None);
    }

    #[test]
    fn lookup_path_descends_into_json_values() {
        let value = Value::Json(serde_json::json!({"a": {"b": "c"}}));
        assert_eq!(
            value.lookup_path("a.b"),
            Some(Value::String("c".to_string()))
        );
    }

    #[test]
    fn loosely_eq_unwraps_json() {
        let native = Value::String("soy".to_string());
        let wrapped = Value::Json(serde_json::json!("soy"));
        assert!(native.loosely_eq(&wrapped));
        assert!(wrapped.loosely_eq(&native));
        assert!(!wrapped.loosely_eq(&Value::String("milk".to_string())));
    }

    #[test]
    fn from_json_is_deep() {
        let value = Value::from_json(serde_json::json!({"items": ["a", 1, true]}));
        let items = value.lookup_path("items").unwrap();
        assert_eq!(
            items,
            Value::Array(vec![
                Value::String("a".to_string()),
                Value::Number(1.0),
                Value::Bool(true),
            ])
        );
    }
}
