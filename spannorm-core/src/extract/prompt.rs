//! Prompt template rules for typed templates and serialized template trees.

use crate::attributes::Attributes;
use crate::model::PromptTemplate;
use crate::payload::Payload;
use crate::serialize::safe_json_dumps;
use crate::telemetry::keys;

/// Template text plus the declared variables that have a value, taking call
/// arguments over the template's partial kwargs.
pub fn predict_template(template: &PromptTemplate, args: &Payload) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(keys::LLM_PROMPT_TEMPLATE.into(), template.template.as_str().into());
    let vars: Vec<(&str, Payload)> = template
        .template_vars
        .iter()
        .filter_map(|name| {
            let value = args.get(name).or_else(|| template.kwargs.get(name))?;
            Some((name.as_str(), value.clone()))
        })
        .collect();
    attrs.insert(
        keys::LLM_PROMPT_TEMPLATE_VARIABLES.into(),
        safe_json_dumps(&Payload::map(vars)).into(),
    );
    attrs
}

/// Last segment of a serialized object's `id` path.
pub fn class_name(serialized: &Payload) -> Option<&str> {
    serialized.get("id")?.as_list()?.last()?.as_str()
}

/// Unwrap nested template wrappers down to a leaf template.
///
/// `prompt` wrappers recurse into their inner template; chat templates
/// recurse into their first message with partial variables merged under the
/// inputs. A leaf needs a literal `template` string.
pub fn run_prompt_template(inputs: &Payload, serialized: &Payload) -> Attributes {
    let Some(kwargs) = serialized.get("kwargs").filter(|k| k.is_mapping()) else {
        return Attributes::new();
    };
    let name = class_name(serialized).unwrap_or_default();

    if let Some(prompt) = kwargs
        .get("prompt")
        .filter(|p| p.is_mapping() && class_name(p).is_some_and(|c| c.ends_with("PromptTemplate")))
    {
        return run_prompt_template(inputs, prompt);
    }

    if name.ends_with("ChatPromptTemplate") {
        let first = kwargs
            .get("messages")
            .and_then(|m| m.index(0))
            .filter(|m| m.is_mapping());
        if let Some(message) = first {
            let merged = match kwargs.get("partial_variables").and_then(Payload::entries) {
                Some(partials) => merge_under(partials, inputs),
                None => inputs.clone(),
            };
            return run_prompt_template(&merged, message);
        }
    }

    let mut attrs = Attributes::new();
    if !name.ends_with("PromptTemplate") {
        return attrs;
    }
    let Some(template) = kwargs.get("template").and_then(Payload::as_str) else {
        return attrs;
    };
    attrs.insert(keys::LLM_PROMPT_TEMPLATE.into(), template.into());
    let declared = kwargs.get("input_variables").and_then(Payload::as_list).unwrap_or_default();
    let vars: Vec<(&str, Payload)> = declared
        .iter()
        .filter_map(Payload::as_str)
        .filter_map(|var| inputs.get(var).map(|v| (var, v.clone())))
        .collect();
    if !vars.is_empty() {
        attrs.insert(
            keys::LLM_PROMPT_TEMPLATE_VARIABLES.into(),
            safe_json_dumps(&Payload::map(vars)).into(),
        );
    }
    attrs
}

/// `base` entries overridden by `top`'s.
fn merge_under(base: Vec<(&str, &Payload)>, top: &Payload) -> Payload {
    let mut merged: Vec<(String, Payload)> = base.into_iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    for (k, v) in top.entries().unwrap_or_default() {
        match merged.iter_mut().find(|(key, _)| key == k) {
            Some(slot) => slot.1 = v.clone(),
            None => merged.push((k.to_string(), v.clone())),
        }
    }
    Payload::Map(merged)
}
