//! Flat dotted-key attribute namespace.
//!
//! Nested data is flattened into keys such as
//! `llm.input_messages.0.message.role`; list elements always get a zero-based
//! integer segment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::payload::Payload;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    BoolList(Vec<bool>),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    StrList(Vec<String>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Primitive payloads and homogeneous lists of them.
    pub fn from_payload(p: &Payload) -> Option<Self> {
        match p {
            Payload::Bool(b) => Some(Self::Bool(*b)),
            Payload::Int(i) => Some(Self::Int(*i)),
            Payload::Float(f) => Some(Self::Float(*f)),
            Payload::Str(s) => Some(Self::Str(s.clone())),
            Payload::List(items) => {
                if items.iter().all(|i| matches!(i, Payload::Str(_))) {
                    Some(Self::StrList(items.iter().filter_map(|i| i.as_str().map(String::from)).collect()))
                } else if items.iter().all(|i| matches!(i, Payload::Int(_))) {
                    Some(Self::IntList(items.iter().filter_map(Payload::as_i64).collect()))
                } else if items.iter().all(|i| matches!(i, Payload::Int(_) | Payload::Float(_))) {
                    Some(Self::FloatList(items.iter().filter_map(Payload::as_f64).collect()))
                } else if items.iter().all(|i| matches!(i, Payload::Bool(_))) {
                    Some(Self::BoolList(items.iter().filter_map(Payload::as_bool).collect()))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&String> for AttributeValue {
    fn from(s: &String) -> Self {
        Self::Str(s.clone())
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<usize> for AttributeValue {
    fn from(i: usize) -> Self {
        Self::Int(i as i64)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(v: Vec<String>) -> Self {
        Self::StrList(v)
    }
}

impl From<Vec<f64>> for AttributeValue {
    fn from(v: Vec<f64>) -> Self {
        Self::FloatList(v)
    }
}

/// Key-sorted attribute set; last write wins.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// `prefix.index.suffix`, or `prefix.index` when `suffix` is empty.
pub fn indexed(prefix: &str, index: usize, suffix: &str) -> String {
    if suffix.is_empty() {
        format!("{prefix}.{index}")
    } else {
        format!("{prefix}.{index}.{suffix}")
    }
}

/// Re-root every key of `inner` under `prefix.index.`.
pub fn nest(prefix: &str, index: usize, inner: Attributes) -> impl Iterator<Item = (String, AttributeValue)> {
    let root = indexed(prefix, index, "");
    inner.into_iter().map(move |(k, v)| (format!("{root}.{k}"), v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn indexed_keys_use_zero_based_segments() {
        assert_eq!(indexed("llm.input_messages", 0, "message.role"), "llm.input_messages.0.message.role");
        assert_eq!(indexed("llm.prompts", 2, ""), "llm.prompts.2");
    }

    #[test]
    fn nest_prefixes_each_key() {
        let mut inner = Attributes::new();
        inner.insert("message.role".into(), "user".into());
        let nested: Attributes = nest("llm.output_messages", 1, inner).collect();
        assert_eq!(
            nested.get("llm.output_messages.1.message.role").and_then(AttributeValue::as_str),
            Some("user")
        );
    }

    #[test]
    fn payload_lists_become_typed_lists() {
        let v = Payload::from(json!([0.5, 1, 2.5]));
        assert_eq!(AttributeValue::from_payload(&v), Some(AttributeValue::FloatList(vec![0.5, 1.0, 2.5])));
        let mixed = Payload::from(json!(["a", 1]));
        assert_eq!(AttributeValue::from_payload(&mixed), None);
    }

    #[test]
    fn serializes_untagged() {
        let mut attrs = Attributes::new();
        attrs.insert("a".into(), 1i64.into());
        attrs.insert("b".into(), vec!["x".to_string()].into());
        assert_eq!(serde_json::to_value(&attrs).unwrap(), json!({"a": 1, "b": ["x"]}));
    }
}
