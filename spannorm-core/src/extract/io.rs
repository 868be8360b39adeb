//! `input.*` / `output.*` value rules.

use crate::error::{CoreResult, SpanNormError};
use crate::model::{Instance, Query};
use crate::payload::Payload;
use crate::serialize::{display_string, model_json, safe_json_dumps};
use crate::span::SpanNode;
use crate::telemetry::keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn keys(self) -> (&'static str, &'static str) {
        match self {
            Self::Input => (keys::INPUT_VALUE, keys::INPUT_MIME_TYPE),
            Self::Output => (keys::OUTPUT_VALUE, keys::OUTPUT_MIME_TYPE),
        }
    }
}

/// A rendered value and its MIME type, if it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoValue {
    pub value: String,
    pub mime: Option<&'static str>,
}

impl IoValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            mime: None,
        }
    }

    pub fn json(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            mime: Some(keys::MIME_JSON),
        }
    }

    /// Writes the value; a text value also clears any stale MIME type.
    pub fn apply(self, node: &mut SpanNode, dir: Direction) {
        let (value_key, mime_key) = dir.keys();
        node.set(value_key, self.value);
        match self.mime {
            Some(mime) => node.set(mime_key, mime),
            None => node.remove(mime_key),
        }
    }
}

fn is_structured(text: &str) -> bool {
    (text.starts_with('{') && text.ends_with('}')) || (text.starts_with('[') && text.ends_with(']'))
}

/// Render a run's inputs or outputs mapping.
///
/// A single string value is used verbatim. A lone `input`/`output` key is
/// unwrapped and only gets a MIME type when it renders as an object or array.
/// Anything else is the JSON of the whole mapping.
pub fn convert_io(obj: &Payload) -> CoreResult<Option<IoValue>> {
    if obj.is_null() {
        return Ok(None);
    }
    let entries = obj.entries().ok_or_else(|| {
        SpanNormError::extraction("convert_io", format!("expected mapping, found {}", obj.type_name()))
    })?;
    if entries.is_empty() {
        return Ok(None);
    }
    if let [(key, value)] = entries.as_slice() {
        if let Some(s) = value.as_str() {
            return Ok(Some(IoValue::text(s)));
        }
        if matches!(*key, "input" | "output") {
            let text = safe_json_dumps(value);
            return Ok(Some(if is_structured(&text) {
                IoValue::json(text)
            } else {
                IoValue::text(text)
            }));
        }
    }
    Ok(Some(IoValue::json(safe_json_dumps(obj))))
}

/// A query string verbatim, or a query bundle without its embedding.
pub fn query_value(query: &Query) -> IoValue {
    match query {
        Query::Text(s) => IoValue::text(s.as_str()),
        Query::Bundle(bundle) => {
            let mut fields = vec![("query_str", Payload::from(bundle.query_str.as_str()))];
            if let Some(path) = &bundle.image_path {
                fields.push(("image_path", Payload::from(path.as_str())));
            }
            if let Some(strs) = &bundle.custom_embedding_strs {
                fields.push((
                    "custom_embedding_strs",
                    Payload::List(strs.iter().map(|s| Payload::from(s.as_str())).collect()),
                ));
            }
            if fields.len() == 1 && !bundle.query_str.is_empty() {
                IoValue::text(bundle.query_str.as_str())
            } else {
                IoValue::json(safe_json_dumps(&Payload::map(fields)))
            }
        }
    }
}

/// Response text: a string, a model, or a stream that is not rendered.
pub fn response_text_value(response: &Payload) -> CoreResult<Option<IoValue>> {
    match response {
        Payload::Null | Payload::Lazy(_) => Ok(None),
        Payload::Str(s) => Ok(Some(IoValue::text(s.as_str()))),
        Payload::Model { .. } => Ok(model_json(response).map(IoValue::json)),
        other => Err(SpanNormError::extraction(
            "response_text",
            format!("unsupported response text type {}", other.type_name()),
        )),
    }
}

/// A synthesized response wrapper; streaming responses are skipped.
pub fn response_value(response: &Payload) -> CoreResult<Option<IoValue>> {
    match response {
        Payload::Null | Payload::Lazy(_) => Ok(None),
        Payload::Str(_) => response_text_value(response),
        _ if response.type_name().ends_with("StreamingResponse") => Ok(None),
        _ if response.is_mapping() => match response.get_raw("response") {
            Some(inner) => response_text_value(inner),
            None => Err(SpanNormError::extraction(
                "response",
                format!("{} has no response field", response.type_name()),
            )),
        },
        other => Err(SpanNormError::extraction(
            "response",
            format!("unsupported response type {}", other.type_name()),
        )),
    }
}

/// Output of a finished call, unless an event already set one.
pub fn result_output(instance: Option<&Instance>, result: &Payload) -> Option<IoValue> {
    match result {
        Payload::Null => None,
        Payload::Lazy(lazy) => Some(IoValue::text(lazy.placeholder())),
        _ if matches!(instance, Some(Instance::Embedding { .. })) => None,
        Payload::Str(_) | Payload::Int(_) | Payload::Float(_) | Payload::Bool(_) => {
            Some(IoValue::text(display_string(result)))
        }
        Payload::Model { .. } => model_json(result).map(IoValue::json),
        _ => Some(IoValue::json(safe_json_dumps(result))),
    }
}
