use serde::{Deserialize, Serialize};

use crate::attributes::Attributes;

/// Final status of a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "code", content = "description", rename_all = "UPPERCASE")]
pub enum Status {
    #[default]
    Unset,
    Ok,
    Error(String),
}

impl Status {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Identity of a started span as the backend sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
}

/// Where a new span hangs in the trace tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Parent {
    /// Whatever the ambient runtime context says.
    #[default]
    Ambient,
    /// Start a fresh trace.
    Root,
    Span(SpanContext),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEventRecord {
    pub name: String,
    pub timestamp_ns: u64,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

/// A span as it reached the backend's end call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedSpan {
    pub name: String,
    pub context: SpanContext,
    pub parent_span_id: Option<String>,
    pub start_ns: u64,
    pub end_ns: u64,
    pub attributes: Attributes,
    pub events: Vec<SpanEventRecord>,
    pub status: Status,
}

impl FinishedSpan {
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    pub fn attr_i64(&self, key: &str) -> Option<i64> {
        self.attributes.get(key).and_then(|v| v.as_i64())
    }

    pub fn events_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SpanEventRecord> + 'a {
        self.events.iter().filter(move |e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_with_code_and_description() {
        assert_eq!(serde_json::to_value(Status::Ok).unwrap(), json!({"code": "OK"}));
        assert_eq!(
            serde_json::to_value(Status::Error("ValueError: bad".into())).unwrap(),
            json!({"code": "ERROR", "description": "ValueError: bad"})
        );
    }
}
