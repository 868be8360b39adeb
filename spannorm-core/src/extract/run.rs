//! Final attributes of a serialized run.
//!
//! Rules run in a fixed order, each through [`guarded`]; keys written by a
//! later rule replace earlier ones.

use crate::attributes::{Attributes, indexed};
use crate::classify::ErrorClassifier;
use crate::error::CoreResult;
use crate::model::RunRecord;
use crate::payload::Payload;
use crate::serialize::safe_json_dumps;
use crate::span::SpanKind;
use crate::telemetry::{Status, keys};

use super::documents::serialized_documents;
use super::guarded;
use super::io::convert_io;
use super::messages::{run_input_messages, run_output_messages};
use super::prompt::run_prompt_template;
use super::provider::{provider_for, system_for};
use super::tokens::{run_token_usage, token_counts};

/// Everything the run tracer writes onto a span when a run ends.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub status: Status,
    pub kind: SpanKind,
    pub attributes: Attributes,
}

/// `context` is the ambient attribute set; only its `metadata` is read, to be
/// merged under the run's own metadata.
pub fn summarize(run: &RunRecord, classifier: &ErrorClassifier, context: &Attributes) -> RunSummary {
    let mut attrs = Attributes::new();
    attrs.extend(guarded("input", || io_value(&run.inputs, keys::INPUT_VALUE, keys::INPUT_MIME_TYPE)));
    attrs.extend(guarded("output", || io_value(&run.outputs, keys::OUTPUT_VALUE, keys::OUTPUT_MIME_TYPE)));
    attrs.extend(guarded("prompts", || Ok(prompts(&run.inputs))));
    attrs.extend(guarded("input_messages", || run_input_messages(&run.inputs)));
    attrs.extend(guarded("output_messages", || run_output_messages(&run.outputs)));
    attrs.extend(guarded("prompt_template", || Ok(run_prompt_template(&run.inputs, &run.serialized))));
    attrs.extend(guarded("invocation_parameters", || Ok(invocation_parameters(run))));
    attrs.extend(guarded("provider", || Ok(provider(&run.extra))));
    attrs.extend(guarded("model_name", || Ok(model_name(&run.outputs, &run.extra))));
    attrs.extend(guarded("token_counts", || {
        Ok(run_token_usage(&run.outputs).map(token_counts).unwrap_or_default())
    }));
    attrs.extend(guarded("function_call", || Ok(function_call(&run.outputs))));
    attrs.extend(guarded("tools", || Ok(tool(run))));
    attrs.extend(guarded("retrieval_documents", || retrieval_documents(run)));
    attrs.extend(guarded("metadata", || Ok(metadata(&run.extra, context))));
    RunSummary {
        status: status(run, classifier),
        kind: kind(run),
        attributes: attrs,
    }
}

pub fn status(run: &RunRecord, classifier: &ErrorClassifier) -> Status {
    match &run.error {
        Some(error) if !classifier.is_ignored_text(error) => Status::Error(error.clone()),
        _ => Status::Ok,
    }
}

pub fn kind(run: &RunRecord) -> SpanKind {
    if run.name.to_lowercase().contains("agent") {
        return SpanKind::Agent;
    }
    SpanKind::parse(&run.run_type).unwrap_or(SpanKind::Unknown)
}

fn io_value(obj: &Payload, value_key: &str, mime_key: &str) -> CoreResult<Attributes> {
    let mut attrs = Attributes::new();
    if let Some(io) = convert_io(obj)? {
        attrs.insert(value_key.into(), io.value.into());
        if let Some(mime) = io.mime {
            attrs.insert(mime_key.into(), mime.into());
        }
    }
    Ok(attrs)
}

fn prompts(inputs: &Payload) -> Attributes {
    let mut attrs = Attributes::new();
    let Some(list) = inputs.get("prompts").and_then(Payload::as_list) else {
        return attrs;
    };
    let texts: Vec<String> = list.iter().filter_map(Payload::as_str).map(String::from).collect();
    if !texts.is_empty() {
        attrs.insert(keys::LLM_PROMPTS.into(), texts.into());
    }
    attrs
}

fn invocation_parameters(run: &RunRecord) -> Attributes {
    let mut attrs = Attributes::new();
    if !run.run_type.eq_ignore_ascii_case("llm") {
        return attrs;
    }
    let Some(params) = run.extra.get("invocation_params").filter(|p| p.is_truthy()) else {
        return attrs;
    };
    attrs.insert(keys::LLM_INVOCATION_PARAMETERS.into(), safe_json_dumps(params).into());
    if let Some(tools) = params.get("tools").and_then(Payload::as_list) {
        for (i, tool) in tools.iter().enumerate() {
            attrs.insert(indexed(keys::LLM_TOOLS, i, keys::TOOL_JSON_SCHEMA), safe_json_dumps(tool).into());
        }
    }
    attrs
}

fn provider(extra: &Payload) -> Attributes {
    let mut attrs = Attributes::new();
    let Some(id) = extra.path(&["metadata", "ls_provider"]).and_then(Payload::as_str) else {
        return attrs;
    };
    attrs.insert(keys::LLM_PROVIDER.into(), provider_for(id).into());
    if let Some(system) = system_for(id) {
        attrs.insert(keys::LLM_SYSTEM.into(), system.into());
    }
    attrs
}

fn first_name<'a>(obj: Option<&'a Payload>, fields: &[&str]) -> Option<&'a str> {
    let obj = obj?;
    fields.iter().find_map(|f| obj.get(f).and_then(Payload::as_str))
}

fn model_name(outputs: &Payload, extra: &Payload) -> Attributes {
    let mut attrs = Attributes::new();
    let name = first_name(outputs.get("llm_output"), &["model_name", "model"])
        .or_else(|| extra.path(&["metadata", "ls_model_name"]).and_then(Payload::as_str))
        .or_else(|| first_name(extra.get("invocation_params"), &["model_name", "model"]));
    if let Some(name) = name {
        attrs.insert(keys::LLM_MODEL_NAME.into(), name.into());
    }
    attrs
}

/// Legacy function-call output, with string arguments decoded when they
/// parse as JSON.
fn function_call(outputs: &Payload) -> Attributes {
    let mut attrs = Attributes::new();
    let Some(call) = outputs
        .path(&["generations", "0", "0", "message", "kwargs", "additional_kwargs", "function_call"])
        .and_then(Payload::entries)
    else {
        return attrs;
    };
    let decoded = call
        .into_iter()
        .map(|(k, v)| {
            let value = match (k, v) {
                ("arguments", Payload::Str(s)) => serde_json::from_str::<serde_json::Value>(s)
                    .map(Payload::from)
                    .unwrap_or_else(|_| v.clone()),
                _ => v.clone(),
            };
            (k, value)
        })
        .collect::<Vec<_>>();
    attrs.insert(keys::LLM_FUNCTION_CALL.into(), safe_json_dumps(&Payload::map(decoded)).into());
    attrs
}

fn tool(run: &RunRecord) -> Attributes {
    let mut attrs = Attributes::new();
    if !run.run_type.eq_ignore_ascii_case("tool") {
        return attrs;
    }
    if let Some(name) = run.serialized.get("name").and_then(Payload::as_str) {
        attrs.insert(keys::TOOL_NAME.into(), name.into());
    }
    if let Some(description) = run.serialized.get("description").and_then(Payload::as_str) {
        attrs.insert(keys::TOOL_DESCRIPTION.into(), description.into());
    }
    attrs
}

fn retrieval_documents(run: &RunRecord) -> CoreResult<Attributes> {
    if !run.run_type.eq_ignore_ascii_case("retriever") {
        return Ok(Attributes::new());
    }
    match run.outputs.get("documents") {
        Some(documents) => serialized_documents(documents),
        None => Ok(Attributes::new()),
    }
}

/// `session.id` and `metadata`; run metadata wins over context metadata.
fn metadata(extra: &Payload, context: &Attributes) -> Attributes {
    let mut attrs = Attributes::new();
    let Some(run_meta) = extra.get("metadata").and_then(Payload::entries) else {
        return attrs;
    };
    let session = ["session_id", "conversation_id", "thread_id"]
        .iter()
        .find_map(|key| run_meta.iter().find(|(k, v)| k == key && !v.is_null()).map(|(_, v)| *v));
    if let Some(session) = session {
        let id = match session {
            Payload::Str(s) => s.clone(),
            other => safe_json_dumps(other),
        };
        attrs.insert(keys::SESSION_ID.into(), id.into());
    }

    let mut merged: Vec<(String, Payload)> = context
        .get(keys::METADATA)
        .and_then(|v| v.as_str())
        .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
        .map(Payload::from)
        .and_then(|p| match p {
            Payload::Map(entries) => Some(entries),
            _ => None,
        })
        .unwrap_or_default();
    for (k, v) in run_meta {
        match merged.iter_mut().find(|(key, _)| key == k) {
            Some(slot) => slot.1 = v.clone(),
            None => merged.push((k.to_string(), v.clone())),
        }
    }
    attrs.insert(keys::METADATA.into(), safe_json_dumps(&Payload::Map(merged)).into());
    attrs
}
