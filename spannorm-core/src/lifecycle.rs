//! Span lifecycle: creation on operation start, event routing, and the three
//! terminal paths (finish, drop, stream completion) plus the sweep.
//!
//! ```text
//! OPEN ──finish(live stream)──▶ AWAITING_STREAM ──stream end / sweep──▶ ENDED
//!   └────────finish / drop────────────────────────────────────────────▶ ENDED
//! ```
//!
//! Open nodes live in `open`; waiting nodes live in the export queue. A node
//! is never in both, and ending one removes it from whichever index held it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::classify::ErrorClassifier;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::CoreResult;
use crate::event::{Event, EventPayload, StreamSignal};
use crate::extract::instance::{input_attributes, instance_attributes};
use crate::extract::io::{Direction, result_output};
use crate::locked_map::LockedMap;
use crate::model::{ErrorInfo, Instance};
use crate::payload::Payload;
use crate::router::EventRouter;
use crate::span::{EndReason, SharedNode, SpanNode, span_name};
use crate::sweep::ExportQueue;
use crate::telemetry::{ContextProvider, Parent, Status, TracingBackend, keys};

pub struct SpanManager {
    backend: Arc<dyn TracingBackend>,
    context: Arc<dyn ContextProvider>,
    clock: Arc<dyn Clock>,
    classifier: ErrorClassifier,
    router: EventRouter,
    open: LockedMap<String, SharedNode>,
    queue: Arc<ExportQueue>,
    separate_trace: bool,
    stream_timeout_ns: u64,
}

impl std::fmt::Debug for SpanManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanManager")
            .field("open", &self.open.len())
            .field("awaiting_stream", &self.queue.len())
            .field("router", &self.router)
            .finish()
    }
}

impl SpanManager {
    pub fn new(
        backend: Arc<dyn TracingBackend>,
        context: Arc<dyn ContextProvider>,
        clock: Arc<dyn Clock>,
        cfg: &Config,
    ) -> CoreResult<Self> {
        cfg.validate()?;
        Ok(Self {
            backend,
            context,
            clock,
            classifier: ErrorClassifier::new(&cfg.errors)?,
            router: EventRouter::with_default_rules(),
            open: LockedMap::new(),
            queue: Arc::new(ExportQueue::new()),
            separate_trace: cfg.separate_trace_from_runtime_context,
            stream_timeout_ns: cfg.sweep.stream_timeout_ns(),
        })
    }

    /// Replace the event routing table.
    pub fn with_router(mut self, router: EventRouter) -> Self {
        self.router = router;
        self
    }

    pub fn queue(&self) -> Arc<ExportQueue> {
        self.queue.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn context(&self) -> &dyn ContextProvider {
        self.context.as_ref()
    }

    pub fn backend(&self) -> &dyn TracingBackend {
        self.backend.as_ref()
    }

    pub fn open_len(&self) -> usize {
        self.open.len()
    }

    /// Open or waiting node by id.
    pub fn find(&self, id: &str) -> Option<SharedNode> {
        self.open.get(&id.to_string()).or_else(|| self.queue.find(id))
    }

    /// Parent of a new span: an open node, a fresh trace, or the ambient
    /// context.
    pub fn parent_for(&self, parent_id: Option<&str>) -> (Option<String>, Parent) {
        let parent = parent_id.and_then(|p| self.open.get(&p.to_string()).map(|n| (p, n)));
        match parent {
            Some((id, node)) => {
                let ctx = node.lock().context();
                (Some(id.to_string()), Parent::Span(ctx))
            }
            None if self.separate_trace => (None, Parent::Root),
            None => (None, Parent::Ambient),
        }
    }

    /// Start a bare node and register it as open. `None` when
    /// instrumentation is suppressed.
    pub fn open_node(
        &self,
        id: &str,
        parent_id: Option<&str>,
        name: &str,
        start_ns: Option<u64>,
    ) -> Option<SharedNode> {
        if self.context.is_suppressed() {
            debug!(span_id = %id, "instrumentation suppressed, not starting span");
            return None;
        }
        let (parent_id, parent) = self.parent_for(parent_id);
        let now = start_ns.unwrap_or_else(|| self.clock.now_ns());
        let handle = self.backend.start_span(name, parent, now, &Default::default());
        let node = SpanNode::new(id, parent_id, handle, self.context.attributes(), now).shared();
        if let Some(stale) = self.open.insert(id.to_string(), node.clone()) {
            warn!(span_id = %id, "span id reused while open, ending the earlier span");
            stale.lock().end(EndReason::Completed, now);
        }
        Some(node)
    }

    /// Operation start: name from the id, kind and attributes from the bound
    /// instance and arguments.
    pub fn start(
        &self,
        id: &str,
        parent_id: Option<&str>,
        instance: Option<&Instance>,
        bound_args: &Payload,
    ) -> Option<SharedNode> {
        let node = self.open_node(id, parent_id, span_name(id), None)?;
        {
            let mut n = node.lock();
            if let Some(kind) = instance.and_then(Instance::span_kind) {
                n.set_kind_once(kind);
            }
            if let Some(instance) = instance {
                n.extend(instance_attributes(instance));
            }
            n.extend(input_attributes(instance, bound_args));
        }
        Some(node)
    }

    /// Route one event to its span and apply stream bookkeeping.
    pub fn process_event(&self, event: &Event) {
        if self.context.is_suppressed() {
            return;
        }
        let Some(span_id) = event.span_id.as_deref() else {
            debug!(event_id = %event.id, "event without span id ignored");
            return;
        };
        let Some(node) = self.find(span_id) else {
            warn!(span_id = %span_id, kind = ?event.kind(), "no open span for event");
            return;
        };
        let now = self.clock.now_ns();
        let signal = event.kind().stream_signal();

        let (notify, parent_id) = {
            let mut n = node.lock();
            match &event.payload {
                EventPayload::StreamChatError { error } if self.is_control_flow(error) => {
                    debug!(span_id = %span_id, error = %error.type_name, "control-flow stream error not recorded");
                }
                _ => self.router.dispatch(&mut n, event, now),
            }
            if signal == Some(StreamSignal::InProgress) {
                n.mark_first_token(now);
                n.touch(now);
            }
            let outcome = match (signal, &event.payload) {
                (Some(StreamSignal::Finished), _) => Some(EndReason::Completed),
                (Some(StreamSignal::Failed), EventPayload::Exception { error }) => Some(self.error_reason(error)),
                _ => None,
            };
            if !n.is_awaiting_stream() {
                if let Some(reason) = outcome {
                    n.set_stream_outcome(reason);
                }
                return;
            }
            let notify = match outcome {
                Some(reason) => {
                    n.end(reason, now);
                    StreamSignal::Finished
                }
                None if signal == Some(StreamSignal::InProgress) => StreamSignal::InProgress,
                None => return,
            };
            (notify, n.parent_id().map(String::from))
        };
        if notify == StreamSignal::Finished {
            self.queue.remove(span_id);
        }
        self.notify_parent(parent_id, notify, now);
    }

    /// Walk up the waiting ancestors: progress refreshes them, completion
    /// ends them. Stops at the first ancestor that is not waiting.
    fn notify_parent(&self, mut parent_id: Option<String>, signal: StreamSignal, now: u64) {
        while let Some(id) = parent_id.take() {
            let Some(parent) = self.find(&id) else {
                return;
            };
            let mut p = parent.lock();
            if !p.is_awaiting_stream() {
                return;
            }
            match signal {
                StreamSignal::InProgress => p.touch(now),
                _ => {
                    p.end(EndReason::Completed, now);
                    self.queue.remove(&id);
                }
            }
            parent_id = p.parent_id().map(String::from);
        }
    }

    /// Normal exit. A live lazy result parks the span until its stream
    /// drains; anything else becomes the output and ends the span.
    pub fn finish(&self, id: &str, instance: Option<&Instance>, result: &Payload) {
        let Some(node) = self.open.get(&id.to_string()) else {
            debug!(span_id = %id, "finish for unknown span");
            return;
        };
        let now = self.clock.now_ns();
        let mut n = node.lock();
        if !n.is_active() {
            self.release(id, &node);
            return;
        }
        let outcome = n.take_stream_outcome();
        let reason = match result.as_lazy() {
            Some(lazy) if lazy.is_live() && outcome.is_none() => {
                n.await_stream(now);
                // Queued before leaving the open map, so `find` always sees it.
                self.queue.put(id, node.clone(), now);
                self.release(id, &node);
                debug!(span_id = %id, "waiting for stream to drain");
                return;
            }
            Some(_) => outcome.unwrap_or(EndReason::Completed),
            None => EndReason::Completed,
        };
        if !matches!(reason, EndReason::Failed(_)) && !n.contains(keys::OUTPUT_VALUE) {
            if let Some(output) = result_output(instance, result) {
                output.apply(&mut n, Direction::Output);
            }
        }
        n.end(reason, now);
        self.release(id, &node);
    }

    /// Remove `node` from the open map, unless `id` already names a newer span.
    fn release(&self, id: &str, node: &SharedNode) {
        self.open.with(|open| {
            if open.get(id).is_some_and(|current| Arc::ptr_eq(current, node)) {
                open.remove(id);
            }
        });
    }

    /// Error exit.
    pub fn drop_span(&self, id: &str, error: &ErrorInfo) {
        let Some(node) = self.open.pop(&id.to_string()) else {
            debug!(span_id = %id, "drop for unknown span");
            return;
        };
        let reason = self.error_reason(error);
        node.lock().end(reason, self.clock.now_ns());
    }

    /// End any span by id, removing it from both indices. Used by front-ends
    /// that compute the outcome themselves.
    pub fn end_with(&self, id: &str, reason: EndReason, end_ns: Option<u64>) -> bool {
        let node = self.open.pop(&id.to_string()).or_else(|| {
            let waiting = self.queue.find(id);
            self.queue.remove(id);
            waiting
        });
        match node {
            Some(node) => node.lock().end(reason, end_ns.unwrap_or_else(|| self.clock.now_ns())),
            None => false,
        }
    }

    /// Cancellation and control-flow signals end cleanly; everything else
    /// records the exception.
    /// Cancellations and ignored workflow signals are not failures.
    pub fn is_control_flow(&self, error: &ErrorInfo) -> bool {
        self.classifier.is_cancelled(error) || self.classifier.is_ignored(error)
    }

    pub fn error_reason(&self, error: &ErrorInfo) -> EndReason {
        if self.is_control_flow(error) {
            EndReason::Status(Status::Ok)
        } else {
            EndReason::Failed(error.clone())
        }
    }

    /// One sweep pass at the current clock reading.
    pub fn sweep_now(&self) -> usize {
        self.queue.sweep_once(self.clock.now_ns(), self.stream_timeout_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeValue, Attributes};
    use crate::clock::ManualClock;
    use crate::model::{ChatMessage, ChatResponse, LlmInstance, Role};
    use crate::payload::{LazyKind, LazyValue, StreamProbe, StreamState};
    use crate::telemetry::test_span::{capture_into, capture_logs};
    use crate::telemetry::{InMemoryBackend, StaticContext};
    use serde_json::json;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use tracing::Level;

    struct Harness {
        backend: InMemoryBackend,
        clock: Arc<ManualClock>,
        context: Arc<StaticContext>,
        manager: Arc<SpanManager>,
    }

    fn harness() -> Harness {
        let backend = InMemoryBackend::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let context = Arc::new(StaticContext::new(Attributes::new()));
        let manager = SpanManager::new(
            Arc::new(backend.clone()),
            context.clone(),
            clock.clone(),
            &Config::default(),
        )
        .unwrap();
        Harness {
            backend,
            clock,
            context,
            manager: Arc::new(manager),
        }
    }

    fn llm() -> Instance {
        Instance::Llm(LlmInstance {
            class_name: "OpenAI".into(),
            model_name: Some("gpt-4o".into()),
            metadata: Payload::Null,
            function_calling: false,
        })
    }

    fn live_stream() -> Payload {
        Payload::Lazy(LazyValue::new("Generator", LazyKind::Generator).with_probe(StreamProbe::new(StreamState::NotStarted)))
    }

    fn delta(id: &str) -> Event {
        Event::new(id, EventPayload::StreamChatDelta { delta: "to".into() })
    }

    fn chat_end(id: &str) -> Event {
        Event::new(
            id,
            EventPayload::ChatEnd {
                messages: vec![],
                response: Some(ChatResponse {
                    message: ChatMessage::text(Role::Assistant, "token"),
                    raw: Payload::Null,
                    additional_kwargs: Payload::Null,
                    delta: None,
                }),
            },
        )
    }

    #[test]
    fn start_and_finish_export_once() {
        let h = harness();
        h.manager.start("Workflow.run-1", None, None, &Payload::from(json!({"q": "hi"})));
        h.manager.finish("Workflow.run-1", None, &Payload::from("done"));
        h.manager.finish("Workflow.run-1", None, &Payload::from("again"));
        h.manager.drop_span("Workflow.run-1", &ErrorInfo::new("ValueError", "late"));

        let spans = h.backend.finished();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "Workflow.run");
        assert_eq!(spans[0].attr_str(keys::OUTPUT_VALUE), Some("done"));
        assert_eq!(spans[0].attr_str(keys::INPUT_VALUE), Some(r#"{"q": "hi"}"#));
        assert_eq!(spans[0].attr_str(keys::SPAN_KIND), Some("CHAIN"));
        assert_eq!(h.manager.open_len(), 0);
    }

    #[test]
    fn children_link_to_open_parents_only() {
        let h = harness();
        h.manager.start("Agent.run-1", None, None, &Payload::Null);
        h.manager.start("OpenAI.chat-1", Some("Agent.run-1"), Some(&llm()), &Payload::Null);
        h.manager.start("Orphan.run-1", Some("missing"), None, &Payload::Null);
        h.manager.finish("OpenAI.chat-1", Some(&llm()), &Payload::Null);
        h.manager.finish("Orphan.run-1", None, &Payload::Null);
        h.manager.finish("Agent.run-1", None, &Payload::Null);

        let agent = h.backend.find("Agent.run").unwrap();
        let chat = h.backend.find("OpenAI.chat").unwrap();
        let orphan = h.backend.find("Orphan.run").unwrap();
        assert_eq!(chat.parent_span_id.as_deref(), Some(agent.context.span_id.as_str()));
        assert_eq!(chat.attr_str(keys::SPAN_KIND), Some("LLM"));
        assert_eq!(chat.attr_str(keys::LLM_MODEL_NAME), Some("gpt-4o"));
        assert_eq!(orphan.parent_span_id, None);
    }

    #[test]
    fn suppressed_context_creates_nothing() {
        let h = harness();
        h.context.set_suppressed(true);
        assert!(h.manager.start("X.run-1", None, None, &Payload::Null).is_none());
        h.manager.finish("X.run-1", None, &Payload::Null);
        assert!(h.backend.is_empty());
    }

    #[test]
    fn errors_are_classified_on_drop() {
        let h = harness();
        for id in ["a-1", "b-1", "c-1"] {
            h.manager.start(id, None, None, &Payload::Null);
        }
        h.manager.drop_span("a-1", &ErrorInfo::new("ValueError", "bad input"));
        h.manager.drop_span("b-1", &ErrorInfo::new("WorkflowDone", "cancelled"));
        h.manager.drop_span("c-1", &ErrorInfo::new("Command", "goto='next'"));

        let a = h.backend.find("a").unwrap();
        assert_eq!(a.status, Status::Error("ValueError: bad input".into()));
        let exc: Vec<_> = a.events_named(keys::EXCEPTION_EVENT).collect();
        assert_eq!(exc.len(), 1);
        assert_eq!(
            exc[0].attributes.get(keys::EXCEPTION_TYPE).and_then(AttributeValue::as_str),
            Some("ValueError")
        );
        assert_eq!(
            exc[0].attributes.get(keys::EXCEPTION_MESSAGE).and_then(AttributeValue::as_str),
            Some("bad input")
        );
        for name in ["b", "c"] {
            let span = h.backend.find(name).unwrap();
            assert_eq!(span.status, Status::Ok);
            assert_eq!(span.events_named(keys::EXCEPTION_EVENT).count(), 0);
        }
    }

    #[test]
    fn streaming_child_ends_waiting_parent() {
        let h = harness();
        h.manager.start("Agent.stream_chat-1", None, None, &Payload::Null);
        h.manager.start("OpenAI.stream_chat-1", Some("Agent.stream_chat-1"), Some(&llm()), &Payload::Null);
        h.manager.finish("OpenAI.stream_chat-1", Some(&llm()), &live_stream());
        h.manager.finish("Agent.stream_chat-1", None, &live_stream());
        assert!(h.backend.is_empty());
        assert_eq!(h.manager.queue().len(), 2);

        h.clock.advance_ns(10);
        h.manager.process_event(&delta("OpenAI.stream_chat-1"));
        h.clock.advance_ns(10);
        h.manager.process_event(&delta("OpenAI.stream_chat-1"));
        h.clock.advance_ns(10);
        h.manager.process_event(&chat_end("OpenAI.stream_chat-1"));

        let spans = h.backend.finished();
        assert_eq!(spans.len(), 2);
        let chat = h.backend.find("OpenAI.stream_chat").unwrap();
        assert_eq!(chat.events_named(keys::FIRST_TOKEN_EVENT).count(), 1);
        assert_eq!(chat.events_named(keys::FIRST_TOKEN_EVENT).next().unwrap().timestamp_ns, 1_010);
        assert_eq!(chat.attr_str("llm.output_messages.0.message.content"), Some("token"));
        assert_eq!(chat.end_ns, 1_030);
        assert!(h.backend.find("Agent.stream_chat").is_some());
        assert!(h.manager.queue().is_empty());
    }

    #[test]
    fn stream_exception_fails_the_waiting_span() {
        let h = harness();
        h.manager.start("OpenAI.stream_chat-1", None, Some(&llm()), &Payload::Null);
        h.manager.finish("OpenAI.stream_chat-1", Some(&llm()), &live_stream());
        h.manager.process_event(&Event::new(
            "OpenAI.stream_chat-1",
            EventPayload::Exception {
                error: ErrorInfo::new("APIError", "connection reset"),
            },
        ));
        let span = &h.backend.finished()[0];
        assert_eq!(span.status, Status::Error("APIError: connection reset".into()));
        assert_eq!(span.events_named(keys::EXCEPTION_EVENT).count(), 1);
        assert!(h.manager.queue().is_empty());
    }

    #[test]
    fn control_flow_stream_errors_are_not_recorded() {
        let h = harness();
        h.manager.start("OpenAI.stream_chat-1", None, Some(&llm()), &Payload::Null);
        for error in [ErrorInfo::new("WorkflowDone", "finished"), ErrorInfo::new("Command", "Command(goto='x')")] {
            h.manager.process_event(&Event::new("OpenAI.stream_chat-1", EventPayload::StreamChatError { error }));
        }
        h.manager.finish("OpenAI.stream_chat-1", Some(&llm()), &Payload::Null);
        let span = &h.backend.finished()[0];
        assert_eq!(span.status, Status::Ok);
        assert_eq!(span.events_named(keys::EXCEPTION_EVENT).count(), 0);

        h.manager.start("OpenAI.stream_chat-2", None, Some(&llm()), &Payload::Null);
        h.manager.process_event(&Event::new(
            "OpenAI.stream_chat-2",
            EventPayload::StreamChatError {
                error: ErrorInfo::new("TimeoutError", "stalled"),
            },
        ));
        h.manager.finish("OpenAI.stream_chat-2", Some(&llm()), &Payload::Null);
        let span = &h.backend.finished()[1];
        assert_eq!(span.events_named(keys::EXCEPTION_EVENT).count(), 1);
        assert_eq!(span.status, Status::Ok);
    }

    #[test]
    fn waiting_span_stays_reachable_across_finish() {
        let h = harness();
        h.manager.start("OpenAI.stream_chat-1", None, Some(&llm()), &Payload::Null);
        h.manager.finish("OpenAI.stream_chat-1", Some(&llm()), &live_stream());
        assert_eq!(h.manager.open_len(), 0);
        assert!(h.manager.find("OpenAI.stream_chat-1").is_some());

        let (logs, _guard) = capture_logs();
        let ids: Vec<String> = (0..16).map(|i| format!("OpenAI.stream_chat-{}", i + 2)).collect();
        for id in &ids {
            h.manager.start(id, None, Some(&llm()), &Payload::Null);
        }
        let workers: Vec<_> = ids
            .iter()
            .flat_map(|id| {
                let barrier = Arc::new(Barrier::new(2));
                let finished = Arc::new(AtomicBool::new(false));
                let finisher = {
                    let (manager, barrier, finished, logs) =
                        (h.manager.clone(), barrier.clone(), finished.clone(), logs.clone());
                    let id = id.clone();
                    thread::spawn(move || {
                        let _guard = capture_into(logs);
                        barrier.wait();
                        manager.finish(&id, Some(&llm()), &live_stream());
                        finished.store(true, Ordering::SeqCst);
                    })
                };
                let producer = {
                    let (manager, logs) = (h.manager.clone(), logs.clone());
                    let id = id.clone();
                    thread::spawn(move || {
                        let _guard = capture_into(logs);
                        barrier.wait();
                        while !finished.load(Ordering::SeqCst) {
                            manager.process_event(&delta(&id));
                        }
                        manager.process_event(&chat_end(&id));
                    })
                };
                [finisher, producer]
            })
            .collect();
        for w in workers {
            w.join().expect("worker panicked");
        }

        assert!(!logs.contains(Level::WARN, "no open span for event"));
        let spans = h.backend.finished();
        assert_eq!(spans.len(), ids.len());
        for span in &spans {
            assert_eq!(span.attr_str("llm.output_messages.0.message.content"), Some("token"));
        }
        assert_eq!(h.manager.queue().len(), 1);
    }

    #[test]
    fn stream_drained_before_finish_ends_at_finish() {
        let h = harness();
        h.manager.start("OpenAI.stream_chat-1", None, Some(&llm()), &Payload::Null);
        h.manager.process_event(&delta("OpenAI.stream_chat-1"));
        h.manager.process_event(&chat_end("OpenAI.stream_chat-1"));
        assert!(h.backend.is_empty());
        h.manager.finish("OpenAI.stream_chat-1", Some(&llm()), &live_stream());

        let span = &h.backend.finished()[0];
        assert_eq!(span.status, Status::Ok);
        assert_eq!(span.attr_str("llm.output_messages.0.message.content"), Some("token"));
        assert_eq!(span.attr_str(keys::OUTPUT_VALUE), Some("assistant: token"));
        assert!(h.manager.queue().is_empty());

        h.manager.start("OpenAI.stream_chat-2", None, Some(&llm()), &Payload::Null);
        h.manager.process_event(&Event::new(
            "OpenAI.stream_chat-2",
            EventPayload::Exception {
                error: ErrorInfo::new("APIError", "connection reset"),
            },
        ));
        h.manager.finish("OpenAI.stream_chat-2", Some(&llm()), &live_stream());
        let span = &h.backend.finished()[1];
        assert_eq!(span.status, Status::Error("APIError: connection reset".into()));
        assert!(span.attr_str(keys::OUTPUT_VALUE).is_none());
        assert!(h.manager.queue().is_empty());
    }

    #[test]
    fn abandoned_stream_is_swept_after_timeout() {
        let h = harness();
        h.manager.start("OpenAI.stream_chat-1", None, Some(&llm()), &Payload::Null);
        h.manager.finish("OpenAI.stream_chat-1", Some(&llm()), &live_stream());
        h.clock.advance_secs(1);
        h.manager.process_event(&delta("OpenAI.stream_chat-1"));

        h.clock.advance_secs(59);
        assert_eq!(h.manager.sweep_now(), 0);
        h.clock.advance_secs(2);
        assert_eq!(h.manager.sweep_now(), 1);

        let span = &h.backend.finished()[0];
        assert_eq!(span.attr_str(keys::LLM_MODEL_NAME), Some("gpt-4o"));
        assert_eq!(span.events_named(keys::FIRST_TOKEN_EVENT).count(), 1);
        assert!(h.manager.find("OpenAI.stream_chat-1").is_none());
    }

    #[test]
    fn exhausted_lazy_results_finish_immediately() {
        let h = harness();
        h.manager.start("Gen.run-1", None, None, &Payload::Null);
        let done = Payload::Lazy(
            LazyValue::new("Generator", LazyKind::Generator).with_probe(StreamProbe::new(StreamState::Exhausted)),
        );
        h.manager.finish("Gen.run-1", None, &done);
        let span = &h.backend.finished()[0];
        assert_eq!(span.attr_str(keys::OUTPUT_VALUE), Some("<generator object Generator>"));
    }

    #[test]
    fn events_for_unknown_spans_warn() {
        let (logs, _guard) = capture_logs();
        let h = harness();
        h.manager.process_event(&delta("nobody-1"));
        assert!(logs.contains(Level::WARN, "no open span for event"));

        let mut orphan = delta("x");
        orphan.span_id = None;
        h.manager.process_event(&orphan);
        assert_eq!(logs.count(Level::WARN), 1);
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let h = harness();
        h.manager.start("Embedding.batch-1", None, None, &Payload::Null);
        let writers: Vec<_> = (0..8)
            .map(|t| {
                let manager = h.manager.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        manager.process_event(&Event::new(
                            "Embedding.batch-1",
                            EventPayload::EmbeddingEnd {
                                chunks: vec![format!("t{t}-{i}")],
                                embeddings: vec![vec![t as f64, i as f64]],
                            },
                        ));
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().expect("writer panicked");
        }
        h.manager.finish("Embedding.batch-1", None, &Payload::Null);

        let span = &h.backend.finished()[0];
        let texts = span
            .attributes
            .keys()
            .filter(|k| k.starts_with("embedding.embeddings.") && k.ends_with(".embedding.text"))
            .count();
        assert_eq!(texts, 200);
        assert!(span.attributes.contains_key("embedding.embeddings.199.embedding.vector"));
    }

    #[test]
    fn custom_router_handles_host_events() {
        let h = harness();
        let mut router = EventRouter::with_default_rules();
        router.register(crate::event::EventKind::Custom("workflow.step".into()), |node, payload, _| {
            if let EventPayload::Custom { payload, .. } = payload {
                node.set("workflow.step", payload.as_str().unwrap_or_default());
            }
            Ok(())
        });
        let manager = SpanManager::new(
            Arc::new(h.backend.clone()),
            h.context.clone(),
            h.clock.clone(),
            &Config::default(),
        )
        .unwrap()
        .with_router(router);
        manager.start("Workflow.run-1", None, None, &Payload::Null);
        manager.process_event(&Event::new(
            "Workflow.run-1",
            EventPayload::Custom {
                name: "workflow.step".into(),
                payload: Payload::from("plan"),
            },
        ));
        manager.finish("Workflow.run-1", None, &Payload::Null);
        assert_eq!(h.backend.finished()[0].attr_str("workflow.step"), Some("plan"));
    }

    #[test]
    fn reused_open_id_ends_the_earlier_span() {
        let h = harness();
        h.manager.start("Tool.call-1", None, None, &Payload::Null);
        h.manager.start("Tool.call-1", None, None, &Payload::Null);
        assert_eq!(h.backend.len(), 1);
        h.manager.finish("Tool.call-1", None, &Payload::Null);
        assert_eq!(h.backend.len(), 2);
        assert_eq!(h.manager.open_len(), 0);
    }

    #[test]
    fn context_attributes_merge_at_end() {
        let h = harness();
        h.context.set_attribute(keys::SESSION_ID, "sess-1");
        h.manager.start("Q.query-1", None, None, &Payload::Null);
        h.manager.finish("Q.query-1", None, &Payload::Null);
        assert_eq!(h.backend.finished()[0].attr_str(keys::SESSION_ID), Some("sess-1"));
    }
}
