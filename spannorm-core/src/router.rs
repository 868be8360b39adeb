use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{error, warn};

use crate::attributes::indexed;
use crate::error::{CoreResult, SpanNormError};
use crate::event::{Event, EventKind, EventPayload};
use crate::extract::documents::nodes;
use crate::extract::io::{Direction, IoValue, query_value, response_text_value, response_value};
use crate::extract::messages::{indexed_messages, typed_message};
use crate::extract::prompt::predict_template;
use crate::extract::tokens::response_token_counts;
use crate::serialize::{display_string, model_json, safe_json_dumps};
use crate::span::{SpanKind, SpanNode};
use crate::telemetry::keys;

/// Extraction rule for one event kind. Receives the event's payload and the
/// dispatch time.
pub type Handler = Arc<dyn Fn(&mut SpanNode, &EventPayload, u64) -> CoreResult<()> + Send + Sync>;

/// Event kind -> handler table.
#[derive(Clone, Default)]
pub struct EventRouter {
    handlers: HashMap<EventKind, Handler>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl EventRouter {
    /// An empty table; every event is unregistered.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in rules for every known event kind.
    pub fn with_default_rules() -> Self {
        let mut router = Self::new();
        for kind in [
            EventKind::AgentRunStepEnd,
            EventKind::StreamChatDelta,
            EventKind::StreamChatEnd,
            EventKind::ChatInProgress,
            EventKind::CompletionInProgress,
            EventKind::SpanDrop,
            EventKind::Exception,
        ] {
            router.register(kind, |_, _, _| Ok(()));
        }
        router.register(EventKind::AgentChatWithStepStart, agent_chat_start);
        router.register(EventKind::AgentChatWithStepEnd, agent_chat_end);
        router.register(EventKind::AgentRunStepStart, agent_step_start);
        router.register(EventKind::AgentToolCall, agent_tool_call);
        router.register(EventKind::EmbeddingStart, |node, _, _| {
            node.set_kind_once(SpanKind::Embedding);
            Ok(())
        });
        router.register(EventKind::EmbeddingEnd, embedding_end);
        router.register(EventKind::StreamChatStart, |node, _, _| {
            node.set_kind_once(SpanKind::Llm);
            Ok(())
        });
        router.register(EventKind::StreamChatError, stream_chat_error);
        router.register(EventKind::PredictStart, predict_start);
        router.register(EventKind::PredictEnd, predict_end);
        router.register(EventKind::StructuredPredictStart, |node, _, _| {
            node.set_kind_once(SpanKind::Llm);
            Ok(())
        });
        router.register(EventKind::StructuredPredictEnd, structured_predict_end);
        router.register(EventKind::CompletionStart, completion_start);
        router.register(EventKind::CompletionEnd, completion_end);
        router.register(EventKind::ChatStart, chat_start);
        router.register(EventKind::ChatEnd, chat_end);
        router.register(EventKind::QueryStart, query_start);
        router.register(EventKind::QueryEnd, query_end);
        router.register(EventKind::RerankStart, rerank_start);
        router.register(EventKind::RerankEnd, rerank_end);
        router.register(EventKind::RetrievalStart, retrieval_start);
        router.register(EventKind::RetrievalEnd, retrieval_end);
        router.register(EventKind::SynthesizeStart, synthesize_start);
        router.register(EventKind::SynthesizeEnd, synthesize_end);
        router.register(EventKind::GetResponseStart, get_response_start);
        router.register(EventKind::GetResponseEnd, get_response_end);
        router
    }

    /// Add or replace the handler for `kind`.
    pub fn register<F>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(&mut SpanNode, &EventPayload, u64) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
    }

    pub fn is_registered(&self, kind: &EventKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Run the handler for the event's kind against `node`.
    ///
    /// Unregistered kinds, handler errors and handler panics are logged and
    /// otherwise ignored.
    pub fn dispatch(&self, node: &mut SpanNode, event: &Event, now_ns: u64) {
        let kind = event.kind();
        let Some(handler) = self.handlers.get(&kind) else {
            warn!(kind = ?kind, span_id = %node.id(), "no extraction rule for event kind");
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| handler(node, &event.payload, now_ns))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(kind = ?kind, span_id = %node.id(), error = %err, "event handler failed"),
            Err(_) => error!(kind = ?kind, span_id = %node.id(), "event handler panicked"),
        }
    }
}

fn mismatch(expected: &'static str, payload: &EventPayload) -> SpanNormError {
    SpanNormError::extraction(expected, format!("handler got {:?} payload", payload.kind()))
}

fn agent_chat_start(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::AgentChatWithStepStart { user_msg } = payload else {
        return Err(mismatch("agent_chat_with_step_start", payload));
    };
    node.set_kind_once(SpanKind::Agent);
    IoValue::text(user_msg.as_str()).apply(node, Direction::Input);
    Ok(())
}

fn agent_chat_end(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::AgentChatWithStepEnd { response } = payload else {
        return Err(mismatch("agent_chat_with_step_end", payload));
    };
    IoValue::text(display_string(response)).apply(node, Direction::Output);
    Ok(())
}

fn agent_step_start(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::AgentRunStepStart { input } = payload else {
        return Err(mismatch("agent_run_step_start", payload));
    };
    node.set_kind_once(SpanKind::Agent);
    if let Some(input) = input {
        IoValue::text(input.as_str()).apply(node, Direction::Input);
    }
    Ok(())
}

fn agent_tool_call(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::AgentToolCall { tool, .. } = payload else {
        return Err(mismatch("agent_tool_call", payload));
    };
    if let Some(name) = tool.name.as_deref().filter(|n| !n.is_empty()) {
        node.set(keys::TOOL_NAME, name);
    }
    if let Some(description) = &tool.description {
        node.set(keys::TOOL_DESCRIPTION, description);
    }
    node.set(keys::TOOL_PARAMETERS, safe_json_dumps(&tool.parameters));
    Ok(())
}

/// Appends after whatever earlier end events recorded.
fn embedding_end(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::EmbeddingEnd { chunks, embeddings } = payload else {
        return Err(mismatch("embedding_end", payload));
    };
    let start = node.list_len(keys::EMBEDDING_EMBEDDINGS);
    let mut count = 0;
    for (text, vector) in chunks.iter().zip(embeddings) {
        let i = start + count;
        let prefix = indexed(keys::EMBEDDING_EMBEDDINGS, i, "");
        node.set(format!("{prefix}.{}", keys::EMBEDDING_TEXT), text);
        node.set(format!("{prefix}.{}", keys::EMBEDDING_VECTOR), vector.clone());
        count += 1;
    }
    node.set_list_len(keys::EMBEDDING_EMBEDDINGS, start + count);
    Ok(())
}

fn stream_chat_error(node: &mut SpanNode, payload: &EventPayload, now_ns: u64) -> CoreResult<()> {
    let EventPayload::StreamChatError { error } = payload else {
        return Err(mismatch("stream_chat_error", payload));
    };
    node.record_exception(error, now_ns);
    Ok(())
}

fn predict_start(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::PredictStart { template, template_args } = payload else {
        return Err(mismatch("predict_start", payload));
    };
    node.set_kind_once(SpanKind::Llm);
    node.extend(predict_template(template, template_args));
    Ok(())
}

fn predict_end(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::PredictEnd { output } = payload else {
        return Err(mismatch("predict_end", payload));
    };
    IoValue::text(output.as_str()).apply(node, Direction::Output);
    Ok(())
}

fn structured_predict_end(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::StructuredPredictEnd { output } = payload else {
        return Err(mismatch("structured_predict_end", payload));
    };
    let json = model_json(output).unwrap_or_else(|| safe_json_dumps(output));
    IoValue::json(json).apply(node, Direction::Output);
    Ok(())
}

fn completion_start(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::CompletionStart { prompt, .. } = payload else {
        return Err(mismatch("completion_start", payload));
    };
    node.set_kind_once(SpanKind::Llm);
    node.set(keys::LLM_PROMPTS, vec![prompt.clone()]);
    Ok(())
}

fn completion_end(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::CompletionEnd { response, .. } = payload else {
        return Err(mismatch("completion_end", payload));
    };
    IoValue::text(response.text.as_str()).apply(node, Direction::Output);
    node.extend(response_token_counts(&response.raw, &response.additional_kwargs));
    Ok(())
}

fn chat_start(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::ChatStart { messages, .. } = payload else {
        return Err(mismatch("chat_start", payload));
    };
    node.set_kind_once(SpanKind::Llm);
    node.extend(indexed_messages(keys::LLM_INPUT_MESSAGES, messages.iter().map(typed_message)));
    Ok(())
}

fn chat_end(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::ChatEnd { response, .. } = payload else {
        return Err(mismatch("chat_end", payload));
    };
    let Some(response) = response else {
        return Ok(());
    };
    IoValue::text(response.to_string()).apply(node, Direction::Output);
    node.extend(response_token_counts(&response.raw, &response.additional_kwargs));
    node.extend(indexed_messages(
        keys::LLM_OUTPUT_MESSAGES,
        std::iter::once(typed_message(&response.message)),
    ));
    Ok(())
}

fn query_start(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::QueryStart { query } = payload else {
        return Err(mismatch("query_start", payload));
    };
    query_value(query).apply(node, Direction::Input);
    Ok(())
}

fn query_end(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::QueryEnd { response } = payload else {
        return Err(mismatch("query_end", payload));
    };
    if let Some(value) = response_value(response)? {
        value.apply(node, Direction::Output);
    }
    Ok(())
}

fn rerank_start(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::RerankStart {
        query,
        nodes: input,
        top_n,
        model_name,
    } = payload
    else {
        return Err(mismatch("rerank_start", payload));
    };
    node.set_kind_once(SpanKind::Reranker);
    if let Some(query) = query {
        query_value(query).apply(node, Direction::Input);
        node.set(keys::RERANKER_QUERY, query.query_str());
    }
    node.set(keys::RERANKER_TOP_K, *top_n);
    node.set(keys::RERANKER_MODEL_NAME, model_name);
    node.extend(nodes(keys::RERANKER_INPUT_DOCUMENTS, input));
    Ok(())
}

fn rerank_end(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::RerankEnd { nodes: output } = payload else {
        return Err(mismatch("rerank_end", payload));
    };
    node.extend(nodes(keys::RERANKER_OUTPUT_DOCUMENTS, output));
    Ok(())
}

fn retrieval_start(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::RetrievalStart { query } = payload else {
        return Err(mismatch("retrieval_start", payload));
    };
    node.set_kind_once(SpanKind::Retriever);
    query_value(query).apply(node, Direction::Input);
    Ok(())
}

fn retrieval_end(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::RetrievalEnd { nodes: found } = payload else {
        return Err(mismatch("retrieval_end", payload));
    };
    node.extend(nodes(keys::RETRIEVAL_DOCUMENTS, found));
    Ok(())
}

fn synthesize_start(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::SynthesizeStart { query } = payload else {
        return Err(mismatch("synthesize_start", payload));
    };
    node.set_kind_once(SpanKind::Chain);
    query_value(query).apply(node, Direction::Input);
    Ok(())
}

fn synthesize_end(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::SynthesizeEnd { response } = payload else {
        return Err(mismatch("synthesize_end", payload));
    };
    if let Some(value) = response_value(response)? {
        value.apply(node, Direction::Output);
    }
    Ok(())
}

fn get_response_start(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::GetResponseStart { query_str } = payload else {
        return Err(mismatch("get_response_start", payload));
    };
    node.set_kind_once(SpanKind::Chain);
    IoValue::text(query_str.as_str()).apply(node, Direction::Input);
    Ok(())
}

fn get_response_end(node: &mut SpanNode, payload: &EventPayload, _: u64) -> CoreResult<()> {
    let EventPayload::GetResponseEnd { response } = payload else {
        return Err(mismatch("get_response_end", payload));
    };
    if let Some(value) = response_text_value(response)? {
        value.apply(node, Direction::Output);
    }
    Ok(())
}
