//! Token usage in OpenAI, Anthropic and Vertex shapes, unified into
//! `llm.token_count.*`.

use crate::attributes::Attributes;
use crate::payload::Payload;
use crate::telemetry::keys;

/// Integer counts, also accepting integral floats and numeric strings.
fn count(p: Option<&Payload>) -> Option<i64> {
    match p? {
        Payload::Str(s) => s.trim().parse().ok(),
        other => other.as_i64(),
    }
}

/// Flatten one usage object. Later shapes overwrite earlier ones on the same
/// key; Anthropic's prompt count includes both cache counts.
pub fn token_counts(usage: &Payload) -> Attributes {
    let mut attrs = Attributes::new();
    let mut put = |key: &str, value: Option<i64>| {
        if let Some(v) = value {
            attrs.insert(key.to_string(), v.into());
        }
    };

    // OpenAI
    put(keys::LLM_TOKEN_COUNT_PROMPT, count(usage.get("prompt_tokens")));
    if let Some(details) = usage.get("prompt_tokens_details") {
        put(keys::LLM_TOKEN_COUNT_PROMPT_CACHE_READ, count(details.get("cached_tokens")));
        put(keys::LLM_TOKEN_COUNT_PROMPT_AUDIO, count(details.get("audio_tokens")));
    }
    put(keys::LLM_TOKEN_COUNT_COMPLETION, count(usage.get("completion_tokens")));
    if let Some(details) = usage.get("completion_tokens_details") {
        put(keys::LLM_TOKEN_COUNT_COMPLETION_REASONING, count(details.get("reasoning_tokens")));
        put(keys::LLM_TOKEN_COUNT_COMPLETION_AUDIO, count(details.get("audio_tokens")));
    }
    put(keys::LLM_TOKEN_COUNT_TOTAL, count(usage.get("total_tokens")));

    // Anthropic
    put(keys::LLM_TOKEN_COUNT_COMPLETION, count(usage.get("output_tokens")));
    let cache_write = count(usage.get("cache_creation_input_tokens"));
    let cache_read = count(usage.get("cache_read_input_tokens"));
    put(keys::LLM_TOKEN_COUNT_PROMPT_CACHE_WRITE, cache_write);
    put(keys::LLM_TOKEN_COUNT_PROMPT_CACHE_READ, cache_read);
    if let Some(input) = count(usage.get("input_tokens")) {
        let total = input + cache_write.unwrap_or(0) + cache_read.unwrap_or(0);
        put(keys::LLM_TOKEN_COUNT_PROMPT, Some(total));
    }

    // Vertex
    put(keys::LLM_TOKEN_COUNT_PROMPT, count(usage.get("prompt_token_count")));
    put(keys::LLM_TOKEN_COUNT_COMPLETION, count(usage.get("candidates_token_count")));
    put(keys::LLM_TOKEN_COUNT_TOTAL, count(usage.get("total_token_count")));

    attrs
}

/// Counts from a typed chat or completion response. Every locator that
/// matches contributes, in order.
pub fn response_token_counts(raw: &Payload, additional_kwargs: &Payload) -> Attributes {
    let mut attrs = Attributes::new();
    let usage_metadata = match raw.get("_raw_response") {
        Some(inner) => inner.get("usage_metadata"),
        None => raw.get("usage_metadata"),
    };
    let locators = [
        raw.get("usage"),
        raw.path(&["model_extra", "x_groq", "usage"]),
        usage_metadata,
        Some(additional_kwargs),
    ];
    for usage in locators.into_iter().flatten().filter(|u| u.is_mapping()) {
        attrs.extend(token_counts(usage));
    }
    attrs
}

/// Usage object of a serialized run's outputs: non-streaming first, then
/// streaming, then Vertex generation info.
pub fn run_token_usage(outputs: &Payload) -> Option<&Payload> {
    let llm_output = outputs.get("llm_output");
    llm_output
        .and_then(|o| o.get("token_usage").or_else(|| o.get("usage")))
        .or_else(|| outputs.path(&["generations", "0", "0", "message", "kwargs", "usage_metadata"]))
        .or_else(|| outputs.path(&["generations", "0", "0", "generation_info", "usage_metadata"]))
        .filter(|u| u.is_mapping())
}
