//! Canonical `llm.provider` / `llm.system` values.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Lower-cased framework provider id -> canonical provider.
static PROVIDERS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("anthropic", "anthropic"),
        ("azure", "azure"),
        ("azure_ai", "azure"),
        ("azure_openai", "azure"),
        ("bedrock", "aws"),
        ("bedrock_converse", "aws"),
        ("cohere", "cohere"),
        ("deepseek", "deepseek"),
        ("fireworks", "fireworks"),
        ("google", "google"),
        ("google_anthropic_vertex", "google"),
        ("google_genai", "google"),
        ("google_vertexai", "google"),
        ("groq", "groq"),
        ("huggingface", "huggingface"),
        ("ibm", "ibm"),
        ("mistralai", "mistralai"),
        ("nvidia", "nvidia"),
        ("ollama", "ollama"),
        ("openai", "openai"),
        ("perplexity", "perplexity"),
        ("together", "together"),
        ("vertex", "google"),
        ("vertexai", "google"),
        ("xai", "xai"),
    ])
});

/// Lower-cased framework provider id -> the API family it speaks.
static SYSTEMS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("anthropic", "anthropic"),
        ("azure", "openai"),
        ("azure_ai", "openai"),
        ("azure_openai", "openai"),
        ("cohere", "cohere"),
        ("google", "vertexai"),
        ("google_anthropic_vertex", "anthropic"),
        ("google_genai", "vertexai"),
        ("google_vertexai", "vertexai"),
        ("groq", "openai"),
        ("mistralai", "mistralai"),
        ("ollama", "openai"),
        ("openai", "openai"),
        ("vertex", "vertexai"),
        ("vertexai", "vertexai"),
    ])
});

/// Unknown ids pass through lower-cased.
pub fn provider_for(id: &str) -> String {
    let lower = id.to_lowercase();
    match PROVIDERS.get(lower.as_str()) {
        Some(p) => (*p).to_string(),
        None => lower,
    }
}

/// Unknown ids have no system.
pub fn system_for(id: &str) -> Option<&'static str> {
    SYSTEMS.get(id.to_lowercase().as_str()).copied()
}

/// Provider and system guessed from an LLM class name.
pub fn from_class_name(class_name: &str) -> (Option<&'static str>, Option<&'static str>) {
    let name = class_name.to_lowercase();
    if name.contains("openai") {
        let provider = if name.contains("azure") { "azure" } else { "openai" };
        (Some(provider), Some("openai"))
    } else if name.contains("anthropic") {
        (Some("anthropic"), Some("anthropic"))
    } else if name.contains("vertex") || name.contains("gemini") {
        (Some("google"), Some("vertexai"))
    } else {
        (None, None)
    }
}
