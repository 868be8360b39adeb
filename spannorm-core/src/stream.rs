//! Streaming responses and the wrapper that traces them.
//!
//! Contract of a response stream:
//! - 0..n `Delta` events, optionally interleaved with `Usage` updates.
//! - At most one terminal event, `Final` or `Error`. A stream may also just
//!   end; the span is then finished without a response.
//!
//! [`TracedStream`] forwards every event unchanged and reports it to the span
//! the stream belongs to.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;

use crate::event::{Event, EventPayload};
use crate::lifecycle::SpanManager;
use crate::model::{ChatResponse, ErrorInfo};
use crate::payload::{LazyKind, LazyValue, Payload, StreamProbe};

/// What the caller receives incrementally.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Partial assistant text.
    Delta(String),
    /// Token usage, usually once near the end.
    Usage {
        prompt: Option<u32>,
        completion: Option<u32>,
    },
    /// Final synthesized response.
    Final(ChatResponse),
    /// Transport/parse error surfaced mid-stream; stream ends after this.
    Error(ErrorInfo),
}

impl StreamEvent {
    /// Returns true if this event terminates the stream (`Final` or `Error`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final(_) | Self::Error(_))
    }

    /// Convenience accessor for `Delta` contents.
    pub fn as_text_delta(&self) -> Option<&str> {
        match self {
            Self::Delta(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Boxed stream of streaming events.
pub type BoxStreamEv = futures::stream::BoxStream<'static, StreamEvent>;

pub struct TracedStream<S> {
    inner: S,
    manager: Arc<SpanManager>,
    span_id: String,
    probe: StreamProbe,
    usage: Option<(Option<u32>, Option<u32>)>,
    finished: bool,
}

impl<S> std::fmt::Debug for TracedStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracedStream")
            .field("span_id", &self.span_id)
            .field("state", &self.probe.state())
            .finish()
    }
}

impl<S> TracedStream<S>
where
    S: Stream<Item = StreamEvent> + Unpin,
{
    pub fn new(manager: Arc<SpanManager>, span_id: impl Into<String>, inner: S) -> Self {
        Self {
            inner,
            manager,
            span_id: span_id.into(),
            probe: StreamProbe::default(),
            usage: None,
            finished: false,
        }
    }

    /// The value the traced operation returns to its caller. Shares its
    /// progress with this stream, so the span waits until it drains.
    pub fn result_payload(&self) -> Payload {
        Payload::Lazy(LazyValue::new("TracedStream", LazyKind::AsyncGenerator).with_probe(self.probe.clone()))
    }

    fn dispatch(&self, payload: EventPayload) {
        self.manager.process_event(&Event::new(self.span_id.clone(), payload));
    }

    fn with_usage(&self, mut response: ChatResponse) -> ChatResponse {
        let Some((prompt, completion)) = self.usage else {
            return response;
        };
        if response.raw.get("usage").is_some() {
            return response;
        }
        let mut usage = Vec::new();
        if let Some(p) = prompt {
            usage.push(("prompt_tokens", Payload::from(i64::from(p))));
        }
        if let Some(c) = completion {
            usage.push(("completion_tokens", Payload::from(i64::from(c))));
        }
        if let (Some(p), Some(c)) = (prompt, completion) {
            usage.push(("total_tokens", Payload::from(i64::from(p) + i64::from(c))));
        }
        let usage = Payload::map(usage);
        if response.raw.is_null() {
            response.raw = Payload::map([("usage", usage)]);
        } else if let Payload::Map(entries) = &mut response.raw {
            entries.push(("usage".into(), usage));
        }
        response
    }

    fn observe(&mut self, event: &StreamEvent) {
        if self.finished {
            return;
        }
        let terminal = event.is_terminal();
        self.finished = terminal;
        match event {
            StreamEvent::Delta(delta) => self.dispatch(EventPayload::StreamChatDelta { delta: delta.clone() }),
            StreamEvent::Usage { prompt, completion } => self.usage = Some((*prompt, *completion)),
            StreamEvent::Final(response) => {
                let response = self.with_usage(response.clone());
                self.dispatch(EventPayload::ChatEnd {
                    messages: Vec::new(),
                    response: Some(response),
                });
            }
            StreamEvent::Error(error) => self.dispatch(EventPayload::Exception { error: error.clone() }),
        }
        // Only after the span has seen the terminal event.
        if terminal {
            self.probe.mark_exhausted();
        }
    }

    fn end_without_response(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.dispatch(EventPayload::StreamChatEnd);
        self.probe.mark_exhausted();
    }
}

impl<S> Stream for TracedStream<S>
where
    S: Stream<Item = StreamEvent> + Unpin,
{
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        this.probe.mark_active();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(event)) => {
                this.observe(&event);
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.end_without_response();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attributes;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::model::{ChatMessage, Role};
    use crate::payload::StreamState;
    use crate::telemetry::{InMemoryBackend, StaticContext, Status, keys};
    use futures::StreamExt;

    fn manager(backend: &InMemoryBackend) -> Arc<SpanManager> {
        Arc::new(
            SpanManager::new(
                Arc::new(backend.clone()),
                Arc::new(StaticContext::new(Attributes::new())),
                Arc::new(ManualClock::new(1)),
                &Config::default(),
            )
            .unwrap(),
        )
    }

    fn response(text: &str) -> ChatResponse {
        ChatResponse {
            message: ChatMessage::text(Role::Assistant, text),
            raw: Payload::Null,
            additional_kwargs: Payload::Null,
            delta: None,
        }
    }

    #[test]
    fn helpers_work() {
        let d = StreamEvent::Delta("hi".into());
        assert!(!d.is_terminal());
        assert_eq!(d.as_text_delta(), Some("hi"));

        let f = StreamEvent::Final(response("hi"));
        assert!(f.is_terminal());
        assert_eq!(f.as_text_delta(), None);
    }

    #[tokio::test]
    async fn drained_stream_finishes_the_span() {
        let backend = InMemoryBackend::new();
        let manager = manager(&backend);
        manager.start("OpenAI.astream_chat-1", None, None, &Payload::Null);

        let events = vec![
            StreamEvent::Delta("Hel".into()),
            StreamEvent::Delta("lo".into()),
            StreamEvent::Usage {
                prompt: Some(4),
                completion: Some(2),
            },
            StreamEvent::Final(response("Hello")),
        ];
        let mut traced = TracedStream::new(manager.clone(), "OpenAI.astream_chat-1", futures::stream::iter(events));
        let result = traced.result_payload();
        manager.finish("OpenAI.astream_chat-1", None, &result);
        assert!(backend.is_empty());

        let mut text = String::new();
        while let Some(ev) = traced.next().await {
            if let Some(d) = ev.as_text_delta() {
                text.push_str(d);
            }
        }
        assert_eq!(text, "Hello");
        assert_eq!(result.as_lazy().unwrap().probe.state(), StreamState::Exhausted);

        let span = &backend.finished()[0];
        assert_eq!(span.status, Status::Ok);
        assert_eq!(span.attr_str(keys::OUTPUT_VALUE), Some("assistant: Hello"));
        assert_eq!(span.attr_i64(keys::LLM_TOKEN_COUNT_TOTAL), Some(6));
        assert_eq!(span.events_named(keys::FIRST_TOKEN_EVENT).count(), 1);
        assert!(manager.queue().is_empty());
    }

    #[tokio::test]
    async fn stream_error_fails_the_span() {
        let backend = InMemoryBackend::new();
        let manager = manager(&backend);
        manager.start("OpenAI.astream_chat-1", None, None, &Payload::Null);
        let events = vec![
            StreamEvent::Delta("partial".into()),
            StreamEvent::Error(ErrorInfo::new("APIConnectionError", "reset")),
        ];
        let traced = TracedStream::new(manager.clone(), "OpenAI.astream_chat-1", futures::stream::iter(events));
        manager.finish("OpenAI.astream_chat-1", None, &traced.result_payload());

        let seen: Vec<StreamEvent> = traced.collect().await;
        assert_eq!(seen.len(), 2);
        assert!(seen[1].is_terminal());
        let span = &backend.finished()[0];
        assert_eq!(span.status, Status::Error("APIConnectionError: reset".into()));
        assert_eq!(span.events_named(keys::EXCEPTION_EVENT).count(), 1);
    }

    #[tokio::test]
    async fn events_after_a_terminal_one_are_not_reported() {
        let backend = InMemoryBackend::new();
        let manager = manager(&backend);
        manager.start("OpenAI.astream_chat-1", None, None, &Payload::Null);
        let events = vec![
            StreamEvent::Final(response("done")),
            StreamEvent::Error(ErrorInfo::new("APIError", "late")),
            StreamEvent::Delta("stray".into()),
        ];
        let traced = TracedStream::new(manager.clone(), "OpenAI.astream_chat-1", futures::stream::iter(events));
        let result = traced.result_payload();
        manager.finish("OpenAI.astream_chat-1", None, &result);

        let seen: Vec<StreamEvent> = traced.collect().await;
        assert_eq!(seen.len(), 3);
        assert_eq!(result.as_lazy().unwrap().probe.state(), StreamState::Exhausted);
        let span = &backend.finished()[0];
        assert_eq!(span.status, Status::Ok);
        assert_eq!(span.events_named(keys::EXCEPTION_EVENT).count(), 0);
        assert_eq!(span.attr_str(keys::OUTPUT_VALUE), Some("assistant: done"));
    }

    #[tokio::test]
    async fn stream_ending_without_a_response_still_finishes() {
        let backend = InMemoryBackend::new();
        let manager = manager(&backend);
        manager.start("OpenAI.astream_chat-1", None, None, &Payload::Null);
        let traced = TracedStream::new(
            manager.clone(),
            "OpenAI.astream_chat-1",
            futures::stream::iter(vec![StreamEvent::Delta("x".into())]),
        );
        manager.finish("OpenAI.astream_chat-1", None, &traced.result_payload());
        let _: Vec<StreamEvent> = traced.collect().await;

        assert_eq!(backend.len(), 1);
        assert_eq!(backend.finished()[0].status, Status::Ok);
    }
}
