//! Chat messages, content blocks and tool calls.
//!
//! Rules here produce keys relative to one message (`message.role`,
//! `message.contents.0.message_content.text`, ...). Callers re-root them under
//! `llm.input_messages.N` or `llm.output_messages.N` with [`nest`].

use crate::attributes::{Attributes, indexed, nest};
use crate::error::{CoreResult, SpanNormError};
use crate::model::{ChatMessage, ContentBlock};
use crate::payload::Payload;
use crate::serialize::safe_json_dumps;
use crate::telemetry::keys;

/// Flattened attributes of one typed message.
pub fn typed_message(msg: &ChatMessage) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(keys::MESSAGE_ROLE.into(), msg.role.as_str().into());
    match msg.blocks.as_slice() {
        [ContentBlock::Text { text }] => {
            attrs.insert(keys::MESSAGE_CONTENT.into(), text.as_str().into());
        }
        blocks => {
            for (j, block) in blocks.iter().enumerate() {
                attrs.extend(nest(keys::MESSAGE_CONTENTS, j, content_block(block)));
            }
        }
    }
    let extra = &msg.additional_kwargs;
    if let Some(name) = extra.get("name").and_then(Payload::as_str).filter(|s| !s.is_empty()) {
        attrs.insert(keys::MESSAGE_NAME.into(), name.into());
    }
    if let Some(calls) = extra.get("tool_calls").and_then(Payload::as_list) {
        attrs.extend(tool_calls(calls));
    }
    if let Some(id) = extra.get("tool_call_id").and_then(Payload::as_str).filter(|s| !s.is_empty()) {
        attrs.insert(keys::MESSAGE_TOOL_CALL_ID.into(), id.into());
    }
    attrs
}

fn content_block(block: &ContentBlock) -> Attributes {
    let mut attrs = Attributes::new();
    match block {
        ContentBlock::Text { text } => {
            attrs.insert(keys::MESSAGE_CONTENT_TYPE.into(), "text".into());
            attrs.insert(keys::MESSAGE_CONTENT_TEXT.into(), text.as_str().into());
        }
        ContentBlock::Image {
            image,
            image_mimetype,
            url,
            path,
        } => {
            let source = match (image, image_mimetype, url, path) {
                (Some(data), Some(mime), _, _) => Some(format!("data:{mime};base64,{data}")),
                (_, _, Some(url), _) => Some(url.clone()),
                (_, _, _, Some(path)) => Some(path.clone()),
                _ => None,
            };
            if let Some(source) = source {
                attrs.insert(keys::MESSAGE_CONTENT_IMAGE_URL.into(), source.into());
                attrs.insert(keys::MESSAGE_CONTENT_TYPE.into(), "image".into());
            }
        }
        ContentBlock::Unsupported => {}
    }
    attrs
}

/// `message.tool_calls.N.*` for every call that yields anything.
fn tool_calls(calls: &[Payload]) -> Attributes {
    let mut attrs = Attributes::new();
    let mut n = 0;
    for call in calls {
        match tool_call(call) {
            Ok(flat) if !flat.is_empty() => {
                attrs.extend(nest(keys::MESSAGE_TOOL_CALLS, n, flat));
                n += 1;
            }
            Ok(_) => {}
            Err(err) => tracing::debug!(error = %err, "skipping tool call"),
        }
    }
    attrs
}

/// One tool call in any of the `function.{name,arguments}`, `name/args` or
/// `name/input` shapes.
pub fn tool_call(call: &Payload) -> CoreResult<Attributes> {
    if !call.is_mapping() {
        return Err(SpanNormError::extraction(
            "tool_call",
            format!("expected mapping, found {}", call.type_name()),
        ));
    }
    let mut attrs = Attributes::new();
    match call.get("id") {
        Some(Payload::Str(id)) if !id.is_empty() => {
            attrs.insert(keys::TOOL_CALL_ID.into(), id.as_str().into());
        }
        Some(Payload::Int(id)) => {
            attrs.insert(keys::TOOL_CALL_ID.into(), id.to_string().into());
        }
        _ => {}
    }
    let (name, arguments) = match call.get("function").filter(|f| f.is_mapping()) {
        Some(function) => (function.get("name"), function.get("arguments")),
        None => (call.get("name"), call.get("args").or_else(|| call.get("input"))),
    };
    if let Some(name) = name.and_then(Payload::as_str).filter(|s| !s.is_empty()) {
        attrs.insert(keys::TOOL_CALL_FUNCTION_NAME.into(), name.into());
    }
    if let Some(args) = arguments.filter(|a| a.is_truthy()) {
        attrs.insert(keys::TOOL_CALL_FUNCTION_ARGUMENTS.into(), arguments_json(args).into());
    }
    Ok(attrs)
}

fn arguments_json(args: &Payload) -> String {
    match args {
        Payload::Str(s) => s.clone(),
        other => safe_json_dumps(other),
    }
}

/// Role from a serialized message's class id, matched by prefix.
pub fn serialized_role(data: &Payload) -> CoreResult<String> {
    let class = data
        .get("id")
        .and_then(Payload::as_list)
        .and_then(|id| id.last())
        .and_then(Payload::as_str)
        .ok_or_else(|| SpanNormError::extraction("message_role", "message has no class id"))?;
    let role = if class.starts_with("HumanMessage") {
        "user"
    } else if class.starts_with("AIMessage") {
        "assistant"
    } else if class.starts_with("SystemMessage") {
        "system"
    } else if class.starts_with("FunctionMessage") {
        "function"
    } else if class.starts_with("ToolMessage") {
        "tool"
    } else if class.starts_with("ChatMessage") {
        return data
            .path(&["kwargs", "role"])
            .and_then(Payload::as_str)
            .map(String::from)
            .ok_or_else(|| SpanNormError::extraction("message_role", "chat message without role"));
    } else {
        return Err(SpanNormError::UnknownRole(class.to_string()));
    };
    Ok(role.to_string())
}

/// Flattened attributes of one serialized (`{id, kwargs}`) message.
pub fn serialized_message(data: &Payload) -> CoreResult<Attributes> {
    let mut attrs = Attributes::new();
    attrs.insert(keys::MESSAGE_ROLE.into(), serialized_role(data)?.into());
    let kwargs = data.get("kwargs");
    if let Some(kwargs) = kwargs {
        match kwargs.get("content") {
            Some(Payload::Str(text)) if !text.is_empty() => {
                attrs.insert(keys::MESSAGE_CONTENT.into(), text.as_str().into());
            }
            Some(Payload::List(parts)) => {
                let collapsed = match parts.as_slice() {
                    [only] => single_text(only),
                    _ => None,
                };
                if let Some(text) = collapsed {
                    attrs.insert(keys::MESSAGE_CONTENT.into(), text.into());
                } else {
                    for (i, part) in parts.iter().enumerate() {
                        attrs.extend(nest(keys::MESSAGE_CONTENTS, i, content_part(part)));
                    }
                }
            }
            _ => {}
        }
        if let Some(id) = kwargs.get("tool_call_id").and_then(Payload::as_str) {
            attrs.insert(keys::MESSAGE_TOOL_CALL_ID.into(), id.into());
        }
        if let Some(name) = kwargs.get("name").and_then(Payload::as_str).filter(|s| !s.is_empty()) {
            attrs.insert(keys::MESSAGE_NAME.into(), name.into());
        }
        if let Some(call) = kwargs.path(&["additional_kwargs", "function_call"]) {
            if let Some(name) = call.get("name").and_then(Payload::as_str) {
                attrs.insert(keys::MESSAGE_FUNCTION_CALL_NAME.into(), name.into());
            }
            if let Some(args) = call.get("arguments").filter(|a| a.is_truthy()) {
                attrs.insert(keys::MESSAGE_FUNCTION_CALL_ARGUMENTS_JSON.into(), arguments_json(args).into());
            }
        }
    }
    Ok(with_tool_calls(attrs, data, kwargs))
}

/// Text of a lone plain-text content part: a bare string or a `text` block.
fn single_text(part: &Payload) -> Option<&str> {
    match part {
        Payload::Str(text) => Some(text.as_str()),
        _ if part.get("type").and_then(Payload::as_str) == Some("text") => {
            part.get("text").and_then(Payload::as_str)
        }
        _ => None,
    }
}

fn with_tool_calls(mut attrs: Attributes, data: &Payload, kwargs: Option<&Payload>) -> Attributes {
    // Later sources win.
    let candidates = [
        data.get("tool_calls"),
        kwargs.and_then(|k| k.get("tool_calls")),
        kwargs.and_then(|k| k.path(&["additional_kwargs", "tool_calls"])),
    ];
    if let Some(calls) = candidates
        .into_iter()
        .flatten()
        .filter_map(Payload::as_list)
        .map(tool_calls)
        .filter(|flat| !flat.is_empty())
        .last()
    {
        attrs.extend(calls);
    }
    attrs
}

fn content_part(part: &Payload) -> Attributes {
    let mut attrs = Attributes::new();
    match part {
        Payload::Str(text) => {
            attrs.insert(keys::MESSAGE_CONTENT_TYPE.into(), "text".into());
            attrs.insert(keys::MESSAGE_CONTENT_TEXT.into(), text.as_str().into());
        }
        _ => match part.get("type").and_then(Payload::as_str) {
            Some("text") => {
                attrs.insert(keys::MESSAGE_CONTENT_TYPE.into(), "text".into());
                if let Some(text) = part.get("text").and_then(Payload::as_str).filter(|s| !s.is_empty()) {
                    attrs.insert(keys::MESSAGE_CONTENT_TEXT.into(), text.into());
                }
            }
            Some("image_url") => {
                attrs.insert(keys::MESSAGE_CONTENT_TYPE.into(), "image".into());
                let url = match part.get("image_url") {
                    Some(Payload::Str(url)) => Some(url.as_str()),
                    Some(image) => image.get("url").and_then(Payload::as_str),
                    None => None,
                };
                if let Some(url) = url {
                    attrs.insert(keys::MESSAGE_CONTENT_IMAGE_URL.into(), url.into());
                }
            }
            _ => {}
        },
    }
    attrs
}

/// Re-root per-message attribute sets under `prefix.N`.
pub fn indexed_messages(prefix: &str, messages: impl IntoIterator<Item = Attributes>) -> Attributes {
    messages
        .into_iter()
        .enumerate()
        .flat_map(|(i, flat)| nest(prefix, i, flat))
        .collect()
}

/// First candidate message set of a run's inputs: `inputs.messages[0]`.
pub fn run_input_messages(inputs: &Payload) -> CoreResult<Attributes> {
    let Some(first) = inputs.get("messages").and_then(|m| m.index(0)) else {
        return Ok(Attributes::new());
    };
    if first.is_mapping() {
        return Ok(parse_each(keys::LLM_INPUT_MESSAGES, std::iter::once(first)));
    }
    let items = first.as_list().ok_or_else(|| {
        SpanNormError::extraction("input_messages", format!("expected list, found {}", first.type_name()))
    })?;
    if let [Payload::Str(role), Payload::Str(content)] = items {
        let mut attrs = Attributes::new();
        attrs.insert(indexed(keys::LLM_INPUT_MESSAGES, 0, keys::MESSAGE_ROLE), role.as_str().into());
        attrs.insert(indexed(keys::LLM_INPUT_MESSAGES, 0, keys::MESSAGE_CONTENT), content.as_str().into());
        return Ok(attrs);
    }
    Ok(parse_each(keys::LLM_INPUT_MESSAGES, items.iter()))
}

/// Messages of the first generation list: `outputs.generations[0][*].message`.
pub fn run_output_messages(outputs: &Payload) -> CoreResult<Attributes> {
    let Some(first) = outputs.get("generations").and_then(|g| g.index(0)) else {
        return Ok(Attributes::new());
    };
    let items = first.as_list().ok_or_else(|| {
        SpanNormError::extraction("output_messages", format!("expected list, found {}", first.type_name()))
    })?;
    Ok(parse_each(keys::LLM_OUTPUT_MESSAGES, items.iter().filter_map(|g| g.get("message"))))
}

fn parse_each<'a>(prefix: &str, items: impl Iterator<Item = &'a Payload>) -> Attributes {
    let mut attrs = Attributes::new();
    for (i, item) in items.enumerate() {
        match serialized_message(item) {
            Ok(flat) => attrs.extend(nest(prefix, i, flat)),
            Err(err) => tracing::warn!(error = %err, index = i, "skipping message"),
        }
    }
    attrs
}
