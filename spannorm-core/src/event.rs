use serde::{Deserialize, Serialize};

use crate::model::{
    ChatMessage, ChatResponse, CompletionResponse, ErrorInfo, NodeWithScore, PromptTemplate,
    Query, ToolMetadata,
};
use crate::payload::Payload;

/// An immutable, kind-tagged notification within an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(default = "new_event_id")]
    pub id: String,
    /// Owning span; events without one are ignored.
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

fn new_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Event {
    pub fn new(span_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: new_event_id(),
            span_id: Some(span_id.into()),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// What an event means for a span that is waiting on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSignal {
    InProgress,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    AgentChatWithStepStart {
        user_msg: String,
    },
    AgentChatWithStepEnd {
        response: Payload,
    },
    AgentRunStepStart {
        #[serde(default)]
        input: Option<String>,
    },
    AgentRunStepEnd,
    AgentToolCall {
        tool: ToolMetadata,
        #[serde(default)]
        arguments: String,
    },
    EmbeddingStart {
        #[serde(default)]
        model_dict: Payload,
    },
    EmbeddingEnd {
        chunks: Vec<String>,
        embeddings: Vec<Vec<f64>>,
    },
    StreamChatStart,
    StreamChatDelta {
        delta: String,
    },
    StreamChatError {
        error: ErrorInfo,
    },
    StreamChatEnd,
    PredictStart {
        template: PromptTemplate,
        #[serde(default)]
        template_args: Payload,
    },
    PredictEnd {
        output: String,
    },
    StructuredPredictStart {
        #[serde(default)]
        output_cls: Option<String>,
    },
    StructuredPredictEnd {
        output: Payload,
    },
    CompletionStart {
        prompt: String,
        #[serde(default)]
        additional_kwargs: Payload,
    },
    CompletionInProgress {
        prompt: String,
        response: CompletionResponse,
    },
    CompletionEnd {
        prompt: String,
        response: CompletionResponse,
    },
    ChatStart {
        messages: Vec<ChatMessage>,
        #[serde(default)]
        additional_kwargs: Payload,
    },
    ChatInProgress {
        messages: Vec<ChatMessage>,
        response: ChatResponse,
    },
    ChatEnd {
        messages: Vec<ChatMessage>,
        #[serde(default)]
        response: Option<ChatResponse>,
    },
    QueryStart {
        query: Query,
    },
    QueryEnd {
        #[serde(default)]
        response: Payload,
    },
    RerankStart {
        #[serde(default)]
        query: Option<Query>,
        nodes: Vec<NodeWithScore>,
        top_n: i64,
        model_name: String,
    },
    RerankEnd {
        nodes: Vec<NodeWithScore>,
    },
    RetrievalStart {
        query: Query,
    },
    RetrievalEnd {
        nodes: Vec<NodeWithScore>,
    },
    SynthesizeStart {
        query: Query,
    },
    SynthesizeEnd {
        #[serde(default)]
        response: Payload,
    },
    GetResponseStart {
        query_str: String,
    },
    GetResponseEnd {
        #[serde(default)]
        response: Payload,
    },
    SpanDrop {
        #[serde(default)]
        err_str: String,
    },
    Exception {
        error: ErrorInfo,
    },
    /// Host-defined events, routed by name.
    Custom {
        name: String,
        #[serde(default)]
        payload: Payload,
    },
}

/// Routing key of an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    AgentChatWithStepStart,
    AgentChatWithStepEnd,
    AgentRunStepStart,
    AgentRunStepEnd,
    AgentToolCall,
    EmbeddingStart,
    EmbeddingEnd,
    StreamChatStart,
    StreamChatDelta,
    StreamChatError,
    StreamChatEnd,
    PredictStart,
    PredictEnd,
    StructuredPredictStart,
    StructuredPredictEnd,
    CompletionStart,
    CompletionInProgress,
    CompletionEnd,
    ChatStart,
    ChatInProgress,
    ChatEnd,
    QueryStart,
    QueryEnd,
    RerankStart,
    RerankEnd,
    RetrievalStart,
    RetrievalEnd,
    SynthesizeStart,
    SynthesizeEnd,
    GetResponseStart,
    GetResponseEnd,
    SpanDrop,
    Exception,
    Custom(String),
}

impl EventKind {
    pub fn stream_signal(&self) -> Option<StreamSignal> {
        match self {
            Self::ChatInProgress | Self::CompletionInProgress | Self::StreamChatDelta => {
                Some(StreamSignal::InProgress)
            }
            Self::ChatEnd | Self::CompletionEnd | Self::StreamChatEnd => Some(StreamSignal::Finished),
            Self::Exception => Some(StreamSignal::Failed),
            _ => None,
        }
    }
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AgentChatWithStepStart { .. } => EventKind::AgentChatWithStepStart,
            Self::AgentChatWithStepEnd { .. } => EventKind::AgentChatWithStepEnd,
            Self::AgentRunStepStart { .. } => EventKind::AgentRunStepStart,
            Self::AgentRunStepEnd => EventKind::AgentRunStepEnd,
            Self::AgentToolCall { .. } => EventKind::AgentToolCall,
            Self::EmbeddingStart { .. } => EventKind::EmbeddingStart,
            Self::EmbeddingEnd { .. } => EventKind::EmbeddingEnd,
            Self::StreamChatStart => EventKind::StreamChatStart,
            Self::StreamChatDelta { .. } => EventKind::StreamChatDelta,
            Self::StreamChatError { .. } => EventKind::StreamChatError,
            Self::StreamChatEnd => EventKind::StreamChatEnd,
            Self::PredictStart { .. } => EventKind::PredictStart,
            Self::PredictEnd { .. } => EventKind::PredictEnd,
            Self::StructuredPredictStart { .. } => EventKind::StructuredPredictStart,
            Self::StructuredPredictEnd { .. } => EventKind::StructuredPredictEnd,
            Self::CompletionStart { .. } => EventKind::CompletionStart,
            Self::CompletionInProgress { .. } => EventKind::CompletionInProgress,
            Self::CompletionEnd { .. } => EventKind::CompletionEnd,
            Self::ChatStart { .. } => EventKind::ChatStart,
            Self::ChatInProgress { .. } => EventKind::ChatInProgress,
            Self::ChatEnd { .. } => EventKind::ChatEnd,
            Self::QueryStart { .. } => EventKind::QueryStart,
            Self::QueryEnd { .. } => EventKind::QueryEnd,
            Self::RerankStart { .. } => EventKind::RerankStart,
            Self::RerankEnd { .. } => EventKind::RerankEnd,
            Self::RetrievalStart { .. } => EventKind::RetrievalStart,
            Self::RetrievalEnd { .. } => EventKind::RetrievalEnd,
            Self::SynthesizeStart { .. } => EventKind::SynthesizeStart,
            Self::SynthesizeEnd { .. } => EventKind::SynthesizeEnd,
            Self::GetResponseStart { .. } => EventKind::GetResponseStart,
            Self::GetResponseEnd { .. } => EventKind::GetResponseEnd,
            Self::SpanDrop { .. } => EventKind::SpanDrop,
            Self::Exception { .. } => EventKind::Exception,
            Self::Custom { name, .. } => EventKind::Custom(name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_parse_from_tagged_json() {
        let ev: Event = serde_json::from_value(json!({
            "span_id": "OpenAI.chat-1",
            "kind": "chat_start",
            "messages": [{"role": "user", "blocks": [{"block_type": "text", "text": "hi"}]}]
        }))
        .unwrap();
        assert_eq!(ev.kind(), EventKind::ChatStart);
        assert_eq!(ev.span_id.as_deref(), Some("OpenAI.chat-1"));
        assert!(!ev.id.is_empty());

        let unit: Event = serde_json::from_value(json!({"span_id": "x", "kind": "stream_chat_end"})).unwrap();
        assert_eq!(unit.kind(), EventKind::StreamChatEnd);
    }

    #[test]
    fn stream_signals() {
        assert_eq!(EventKind::StreamChatDelta.stream_signal(), Some(StreamSignal::InProgress));
        assert_eq!(EventKind::ChatEnd.stream_signal(), Some(StreamSignal::Finished));
        assert_eq!(EventKind::Exception.stream_signal(), Some(StreamSignal::Failed));
        assert_eq!(EventKind::ChatStart.stream_signal(), None);
        assert_eq!(EventKind::Custom("x".into()).stream_signal(), None);
    }
}
