//! Attributes known when an operation starts: from the bound instance and the
//! call's arguments.

use crate::attributes::{Attributes, indexed};
use crate::model::Instance;
use crate::payload::Payload;
use crate::serialize::{model_json, safe_json_dumps};
use crate::telemetry::keys;

use super::provider::from_class_name;

pub fn instance_attributes(instance: &Instance) -> Attributes {
    let mut attrs = Attributes::new();
    match instance {
        Instance::Llm(llm) => {
            if let Some(model) = &llm.model_name {
                attrs.insert(keys::LLM_MODEL_NAME.into(), model.into());
            }
            let params = match &llm.metadata {
                Payload::Null => None,
                meta @ Payload::Model { .. } => model_json(meta),
                meta => Some(safe_json_dumps(meta)),
            };
            if let Some(params) = params {
                attrs.insert(keys::LLM_INVOCATION_PARAMETERS.into(), params.into());
            }
            let (provider, system) = from_class_name(&llm.class_name);
            if let Some(provider) = provider {
                attrs.insert(keys::LLM_PROVIDER.into(), provider.into());
            }
            if let Some(system) = system {
                attrs.insert(keys::LLM_SYSTEM.into(), system.into());
            }
        }
        Instance::Embedding {
            model_name: Some(model),
            ..
        } => {
            attrs.insert(keys::EMBEDDING_MODEL_NAME.into(), model.into());
        }
        Instance::Tool { metadata, .. } => {
            if let Some(description) = &metadata.description {
                attrs.insert(keys::TOOL_DESCRIPTION.into(), description.into());
            }
            if let Some(name) = &metadata.name {
                attrs.insert(keys::TOOL_NAME.into(), name.into());
            }
            if !metadata.parameters.is_null() {
                attrs.insert(keys::TOOL_PARAMETERS.into(), safe_json_dumps(&metadata.parameters).into());
            }
        }
        _ => {}
    }
    attrs
}

/// Bound arguments as `input.value`; function-calling LLMs also list the
/// `tools` argument.
pub fn input_attributes(instance: Option<&Instance>, bound_args: &Payload) -> Attributes {
    let mut attrs = Attributes::new();
    let function_calling = matches!(instance, Some(Instance::Llm(llm)) if llm.function_calling);
    if function_calling {
        if let Some(tools) = bound_args.get("tools").and_then(Payload::as_list) {
            for (i, tool) in tools.iter().enumerate() {
                attrs.insert(
                    indexed(keys::LLM_TOOLS, i, keys::TOOL_JSON_SCHEMA),
                    safe_json_dumps(tool).into(),
                );
            }
        }
    }
    if bound_args.is_truthy() {
        attrs.insert(keys::INPUT_VALUE.into(), safe_json_dumps(bound_args).into());
        attrs.insert(keys::INPUT_MIME_TYPE.into(), keys::MIME_JSON.into());
    }
    attrs
}
