//! The in-flight span node.
//!
//! A node is exclusively owned by whichever index holds it (open registry or
//! sweep queue) behind a `parking_lot::Mutex`; parents are referenced by id
//! only. All attribute writes go through the node's lock, and `end` is the one
//! place a node talks to the backend's `end`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeValue, Attributes};
use crate::model::ErrorInfo;
use crate::telemetry::{keys, SpanContext, SpanHandle, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanKind {
    Llm,
    Chain,
    Agent,
    Tool,
    Retriever,
    Embedding,
    Reranker,
    Unknown,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "LLM",
            Self::Chain => "CHAIN",
            Self::Agent => "AGENT",
            Self::Tool => "TOOL",
            Self::Retriever => "RETRIEVER",
            Self::Embedding => "EMBEDDING",
            Self::Reranker => "RERANKER",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Case-insensitive parse of a kind name.
    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s.to_ascii_uppercase().as_str() {
            "LLM" => Self::Llm,
            "CHAIN" => Self::Chain,
            "AGENT" => Self::Agent,
            "TOOL" => Self::Tool,
            "RETRIEVER" => Self::Retriever,
            "EMBEDDING" => Self::Embedding,
            "RERANKER" => Self::Reranker,
            "UNKNOWN" => Self::Unknown,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanState {
    Open,
    AwaitingStream,
    Ended,
}

/// How a node reached its terminal state.
#[derive(Debug, Clone)]
pub enum EndReason {
    Completed,
    /// Records an exception event and sets ERROR.
    Failed(ErrorInfo),
    /// Explicit status; any exception event was already recorded.
    Status(Status),
}

pub type SharedNode = Arc<Mutex<SpanNode>>;

pub struct SpanNode {
    id: String,
    parent_id: Option<String>,
    name: String,
    handle: Box<dyn SpanHandle>,
    attributes: Attributes,
    context_attributes: Attributes,
    kind: Option<SpanKind>,
    state: SpanState,
    start_ns: u64,
    deferred_end_ns: Option<u64>,
    last_updated_ns: u64,
    first_token_ns: Option<u64>,
    stream_outcome: Option<EndReason>,
    list_attr_len: HashMap<String, usize>,
}

impl std::fmt::Debug for SpanNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanNode")
            .field("id", &self.id)
            .field("parent_id", &self.parent_id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("attributes", &self.attributes.len())
            .finish()
    }
}

impl SpanNode {
    pub fn new(
        id: impl Into<String>,
        parent_id: Option<String>,
        handle: Box<dyn SpanHandle>,
        context_attributes: Attributes,
        start_ns: u64,
    ) -> Self {
        let id = id.into();
        let name = span_name(&id).to_string();
        Self {
            id,
            parent_id,
            name,
            handle,
            attributes: Attributes::new(),
            context_attributes,
            kind: None,
            state: SpanState::Open,
            start_ns,
            deferred_end_ns: None,
            last_updated_ns: start_ns,
            first_token_ns: None,
            stream_outcome: None,
            list_attr_len: HashMap::new(),
        }
    }

    pub fn shared(self) -> SharedNode {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> SpanContext {
        self.handle.context()
    }

    pub fn kind(&self) -> Option<SpanKind> {
        self.kind
    }

    /// First write wins.
    pub fn set_kind_once(&mut self, kind: SpanKind) {
        if self.kind.is_none() {
            self.kind = Some(kind);
        }
    }

    /// Unconditional, for front-ends that compute the kind at the end.
    pub fn force_kind(&mut self, kind: SpanKind) {
        self.kind = Some(kind);
    }

    pub fn state(&self) -> SpanState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != SpanState::Ended
    }

    pub fn is_awaiting_stream(&self) -> bool {
        self.state == SpanState::AwaitingStream
    }

    pub fn start_ns(&self) -> u64 {
        self.start_ns
    }

    pub fn last_updated_ns(&self) -> u64 {
        self.last_updated_ns
    }

    /// When the call returned a still-running stream.
    pub fn returned_at_ns(&self) -> Option<u64> {
        self.deferred_end_ns
    }

    /// Time of the last sign of life: the later of return and last activity.
    pub fn last_activity_ns(&self) -> u64 {
        self.deferred_end_ns.map_or(self.last_updated_ns, |r| r.max(self.last_updated_ns))
    }

    pub fn first_token_ns(&self) -> Option<u64> {
        self.first_token_ns
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Ignored once the node has ended.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if self.is_active() {
            self.attributes.insert(key.into(), value.into());
        }
    }

    pub fn remove(&mut self, key: &str) {
        if self.is_active() {
            self.attributes.remove(key);
        }
    }

    pub fn extend(&mut self, attrs: impl IntoIterator<Item = (String, AttributeValue)>) {
        if self.is_active() {
            self.attributes.extend(attrs);
        }
    }

    /// Length recorded for an indexed list attribute.
    pub fn list_len(&self, prefix: &str) -> usize {
        self.list_attr_len.get(prefix).copied().unwrap_or(0)
    }

    pub fn set_list_len(&mut self, prefix: &str, len: usize) {
        self.list_attr_len.insert(prefix.to_string(), len);
    }

    pub fn touch(&mut self, now_ns: u64) {
        self.last_updated_ns = now_ns;
    }

    /// Adds the first-token marker once; true when it was added now.
    pub fn mark_first_token(&mut self, now_ns: u64) -> bool {
        if self.first_token_ns.is_some() || !self.is_active() {
            return false;
        }
        self.handle
            .add_event(keys::FIRST_TOKEN_EVENT, Attributes::new(), now_ns);
        self.first_token_ns = Some(now_ns);
        true
    }

    /// Open -> AwaitingStream, remembering when the call itself returned.
    pub fn await_stream(&mut self, returned_at_ns: u64) -> bool {
        if self.state != SpanState::Open {
            return false;
        }
        self.state = SpanState::AwaitingStream;
        self.deferred_end_ns = Some(returned_at_ns);
        true
    }

    /// A stream that drained before the call returned leaves its ending here.
    pub fn set_stream_outcome(&mut self, reason: EndReason) {
        if self.state == SpanState::Open {
            self.stream_outcome = Some(reason);
        }
    }

    pub fn take_stream_outcome(&mut self) -> Option<EndReason> {
        self.stream_outcome.take()
    }

    pub fn record_exception(&mut self, error: &ErrorInfo, now_ns: u64) {
        if self.is_active() {
            self.handle.record_exception(error, now_ns);
        }
    }

    /// Finalize and hand off to the backend. Returns false when already ended.
    pub fn end(&mut self, reason: EndReason, now_ns: u64) -> bool {
        if self.state == SpanState::Ended {
            return false;
        }
        let status = match reason {
            EndReason::Completed => Status::Ok,
            EndReason::Failed(err) => {
                self.handle.record_exception(&err, now_ns);
                Status::Error(err.description())
            }
            EndReason::Status(status) => status,
        };
        for (k, v) in std::mem::take(&mut self.context_attributes) {
            self.attributes.entry(k).or_insert(v);
        }
        let kind = self.kind.unwrap_or(SpanKind::Chain);
        self.attributes
            .insert(keys::SPAN_KIND.to_string(), kind.as_str().into());
        self.state = SpanState::Ended;
        self.handle.set_status(status);
        self.handle.set_attributes(&self.attributes);
        self.handle.end(now_ns);
        true
    }
}

/// Span name: the id up to its first `-`.
pub fn span_name(id: &str) -> &str {
    id.split_once('-').map(|(head, _)| head).unwrap_or(id)
}
