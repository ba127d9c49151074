//! Stream metadata: the bag handed to every sink on `initialize`.
//!
//! Sources describe what they are about to emit (origin file, replication
//! timestamp, ...). Pass-through tasks forward the bag unchanged unless they
//! have something to add.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A JSON-like metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
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

/// Metadata describing a record stream.
pub type Metadata = IndexMap<String, Value>;

/// Extension trait for building Metadata ergonomically.
pub trait MetadataExt {
    fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self;
}

impl MetadataExt for Metadata {
    fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_builder() {
        let meta = Metadata::new()
            .with("source", "planet.jsonl")
            .with("replication.sequence", 42i64);

        assert_eq!(
            meta.get("source").and_then(Value::as_str),
            Some("planet.jsonl")
        );
        assert_eq!(
            meta.get("replication.sequence").and_then(Value::as_i64),
            Some(42)
        );
    }

    #[test]
    fn test_value_accessors() {
        let v = Value::Int(7);
        assert_eq!(v.as_f64(), Some(7.0));
        assert_eq!(v.as_str(), None);
        assert_eq!(Value::from(true).as_bool(), Some(true));
    }
}
