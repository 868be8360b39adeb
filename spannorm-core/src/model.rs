use std::fmt;

use serde::{Deserialize, Serialize};

use crate::payload::Payload;
use crate::span::SpanKind;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Function,
    Tool,
    Chatbot,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Developer => "developer",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Function => "function",
            Self::Tool => "tool",
            Self::Chatbot => "chatbot",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One block of a typed chat message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "block_type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        /// Base64 image bytes.
        #[serde(default)]
        image: Option<String>,
        #[serde(default)]
        image_mimetype: Option<String>,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        path: Option<String>,
    },
    /// Audio, documents and anything newer; carried but not extracted.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
    /// Provider extras: `name`, `tool_calls`, `tool_call_id`, usage counts.
    #[serde(default)]
    pub additional_kwargs: Payload,
}

impl ChatMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            blocks: vec![ContentBlock::Text { text: content.into() }],
            additional_kwargs: Payload::Null,
        }
    }

    /// Concatenated text of all text blocks.
    pub fn content(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatResponse {
    pub message: ChatMessage,
    /// Raw provider response; usage lives somewhere in here.
    #[serde(default)]
    pub raw: Payload,
    #[serde(default)]
    pub additional_kwargs: Payload,
    #[serde(default)]
    pub delta: Option<String>,
}

impl fmt::Display for ChatResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CompletionResponse {
    pub text: String,
    #[serde(default)]
    pub raw: Payload,
    #[serde(default)]
    pub additional_kwargs: Payload,
    #[serde(default)]
    pub delta: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct QueryBundle {
    pub query_str: String,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub custom_embedding_strs: Option<Vec<String>>,
    #[serde(default)]
    pub embedding: Option<Vec<f64>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Query {
    Text(String),
    Bundle(QueryBundle),
}

impl Query {
    pub fn query_str(&self) -> &str {
        match self {
            Self::Text(s) => s,
            Self::Bundle(b) => &b.query_str,
        }
    }
}

/// A retrieved node and its relevance score.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NodeWithScore {
    pub id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub metadata: Payload,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PromptTemplate {
    pub template: String,
    #[serde(default)]
    pub template_vars: Vec<String>,
    /// Partially applied variables.
    #[serde(default)]
    pub kwargs: Payload,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ToolMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema of the tool's parameters.
    #[serde(default)]
    pub parameters: Payload,
}

/// An application error as the host reported it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub type_name: String,
    pub message: String,
    #[serde(default)]
    pub stacktrace: Option<String>,
}

impl ErrorInfo {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            stacktrace: None,
        }
    }

    pub fn with_stacktrace(mut self, trace: impl Into<String>) -> Self {
        self.stacktrace = Some(trace.into());
        self
    }

    /// `TypeName('message')`, the form ignore patterns are written against.
    pub fn repr(&self) -> String {
        format!("{}({:?})", self.type_name, self.message).replace('"', "'")
    }

    /// Status description: `TypeName: message`.
    pub fn description(&self) -> String {
        format!("{}: {}", self.type_name, self.message)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmInstance {
    pub class_name: String,
    #[serde(default)]
    pub model_name: Option<String>,
    /// Model-dump capable metadata; dumped with unset fields excluded.
    #[serde(default)]
    pub metadata: Payload,
    #[serde(default)]
    pub function_calling: bool,
}

/// The object an operation was invoked on, as far as extraction cares.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instance {
    Llm(LlmInstance),
    Embedding {
        class_name: String,
        #[serde(default)]
        model_name: Option<String>,
    },
    Tool {
        class_name: String,
        metadata: ToolMetadata,
    },
    Retriever {
        class_name: String,
    },
    Agent {
        class_name: String,
    },
    Other {
        class_name: String,
    },
}

impl Instance {
    pub fn class_name(&self) -> &str {
        match self {
            Self::Llm(llm) => &llm.class_name,
            Self::Embedding { class_name, .. }
            | Self::Tool { class_name, .. }
            | Self::Retriever { class_name }
            | Self::Agent { class_name }
            | Self::Other { class_name } => class_name,
        }
    }

    pub fn span_kind(&self) -> Option<SpanKind> {
        match self {
            Self::Llm(_) => Some(SpanKind::Llm),
            Self::Embedding { .. } => Some(SpanKind::Embedding),
            Self::Tool { .. } => Some(SpanKind::Tool),
            Self::Retriever { .. } => Some(SpanKind::Retriever),
            Self::Agent { .. } => Some(SpanKind::Agent),
            Self::Other { .. } => None,
        }
    }

    pub fn is_llm(&self) -> bool {
        matches!(self, Self::Llm(_))
    }
}

/// A serialized run as reported by run-based frameworks.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub run_type: String,
    #[serde(default)]
    pub parent_run_id: Option<uuid::Uuid>,
    #[serde(default)]
    pub inputs: Payload,
    #[serde(default)]
    pub outputs: Payload,
    #[serde(default)]
    pub extra: Payload,
    #[serde(default)]
    pub serialized: Payload,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl RunRecord {
    pub fn new(name: impl Into<String>, run_type: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            run_type: run_type.into(),
            parent_run_id: None,
            inputs: Payload::Null,
            outputs: Payload::Null,
            extra: Payload::Null,
            serialized: Payload::Null,
            error: None,
            start_time: None,
            end_time: None,
        }
    }
}
