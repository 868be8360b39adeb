//! Front-end for frameworks that report whole runs instead of typed events.
//!
//! A run opens a span on start and is summarized in one go when it ends or
//! errors; see [`crate::extract::run::summarize`] for the attribute rules.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error};
use uuid::Uuid;

use crate::extract::run::summarize;
use crate::lifecycle::SpanManager;
use crate::locked_map::LockedMap;
use crate::model::{ErrorInfo, RunRecord};
use crate::payload::Payload;
use crate::span::{EndReason, SharedNode};

pub struct RunTracer {
    manager: Arc<SpanManager>,
    runs: LockedMap<Uuid, (RunRecord, SharedNode)>,
}

impl std::fmt::Debug for RunTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunTracer")
            .field("open_runs", &self.runs.len())
            .finish()
    }
}

fn timestamp_ns(t: Option<DateTime<Utc>>) -> Option<u64> {
    t.and_then(|t| t.timestamp_nanos_opt())
        .and_then(|ns| u64::try_from(ns).ok())
}

/// Fields the update left empty keep their value from the start event.
fn merge_run(mut stored: RunRecord, update: &RunRecord) -> RunRecord {
    fn take(slot: &mut Payload, update: &Payload) {
        if !update.is_null() {
            *slot = update.clone();
        }
    }
    take(&mut stored.inputs, &update.inputs);
    take(&mut stored.outputs, &update.outputs);
    take(&mut stored.extra, &update.extra);
    take(&mut stored.serialized, &update.serialized);
    if update.error.is_some() {
        stored.error = update.error.clone();
    }
    if update.end_time.is_some() {
        stored.end_time = update.end_time;
    }
    stored
}

/// `ValueError('bad')` or `ValueError: bad` become typed errors; anything
/// else is a plain `Error`.
fn parse_error(text: &str) -> ErrorInfo {
    let split = text.find(['(', ':']).map(|i| (&text[..i], &text[i..]));
    match split {
        Some((head, rest)) if !head.is_empty() && !head.contains(char::is_whitespace) => {
            let message = match rest.strip_prefix('(') {
                Some(inner) => inner.strip_suffix(')').unwrap_or(inner),
                None => rest.trim_start_matches(':').trim_start(),
            };
            ErrorInfo::new(head, message)
        }
        _ => ErrorInfo::new("Error", text),
    }
}

impl RunTracer {
    pub fn new(manager: Arc<SpanManager>) -> Self {
        Self {
            manager,
            runs: LockedMap::new(),
        }
    }

    pub fn open_runs(&self) -> usize {
        self.runs.len()
    }

    pub fn on_run_start(&self, run: &RunRecord) {
        let contained = catch_unwind(AssertUnwindSafe(|| {
            let id = run.id.to_string();
            let parent = run.parent_run_id.map(|p| p.to_string());
            let Some(node) = self
                .manager
                .open_node(&id, parent.as_deref(), &run.name, timestamp_ns(run.start_time))
            else {
                return;
            };
            self.runs.insert(run.id, (run.clone(), node));
        }));
        if contained.is_err() {
            error!(run_id = %run.id, "run start panicked");
        }
    }

    /// A streamed token: first-token marker and activity only.
    pub fn on_new_token(&self, run_id: Uuid) {
        let Some((_, node)) = self.runs.get(&run_id) else {
            debug!(run_id = %run_id, "token for unknown run");
            return;
        };
        let now = self.manager.clock().now_ns();
        let mut n = node.lock();
        n.mark_first_token(now);
        n.touch(now);
    }

    pub fn on_run_end(&self, run: &RunRecord) {
        self.finalize(run);
    }

    pub fn on_run_error(&self, run: &RunRecord) {
        self.finalize(run);
    }

    fn finalize(&self, update: &RunRecord) {
        let Some((stored, node)) = self.runs.pop(&update.id) else {
            debug!(run_id = %update.id, "end for unknown run");
            return;
        };
        let contained = catch_unwind(AssertUnwindSafe(|| {
            let run = merge_run(stored, update);
            let summary = summarize(&run, self.manager.classifier(), &self.manager.context().attributes());
            let end_ns = timestamp_ns(run.end_time).unwrap_or_else(|| self.manager.clock().now_ns());
            {
                let mut n = node.lock();
                if summary.status.is_error() {
                    if let Some(text) = &run.error {
                        n.record_exception(&parse_error(text), end_ns);
                    }
                }
                n.force_kind(summary.kind);
                n.extend(summary.attributes);
            }
            self.manager
                .end_with(&run.id.to_string(), EndReason::Status(summary.status), Some(end_ns));
        }));
        if contained.is_err() {
            error!(run_id = %update.id, "run end panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attributes;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::telemetry::{InMemoryBackend, StaticContext, Status, keys};
    use chrono::TimeZone;
    use serde_json::json;

    fn tracer() -> (InMemoryBackend, Arc<StaticContext>, RunTracer) {
        let backend = InMemoryBackend::new();
        let context = Arc::new(StaticContext::new(Attributes::new()));
        let manager = SpanManager::new(
            Arc::new(backend.clone()),
            context.clone(),
            Arc::new(ManualClock::new(5)),
            &Config::default(),
        )
        .unwrap();
        (backend, context, RunTracer::new(Arc::new(manager)))
    }

    #[test]
    fn llm_run_is_summarized_on_end() {
        let (backend, _, tracer) = tracer();
        let mut run = RunRecord::new("ChatOpenAI", "llm");
        run.start_time = Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        run.inputs = Payload::from(json!({"prompts": ["Hello"]}));
        run.extra = Payload::from(json!({
            "invocation_params": {"model_name": "gpt-4o-mini", "temperature": 0.1},
            "metadata": {"ls_provider": "openai", "session_id": "s-9"}
        }));
        tracer.on_run_start(&run);
        tracer.on_new_token(run.id);
        assert_eq!(tracer.open_runs(), 1);

        let mut done = run.clone();
        done.inputs = Payload::Null;
        done.outputs = Payload::from(json!({
            "generations": [[{"text": "Hi!", "message": {"kwargs": {"content": "Hi!", "type": "ai"}}}]],
            "llm_output": {"token_usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}}
        }));
        done.end_time = Some(Utc.timestamp_opt(1_700_000_002, 0).unwrap());
        tracer.on_run_end(&done);

        let span = &backend.finished()[0];
        assert_eq!(span.name, "ChatOpenAI");
        assert_eq!(span.status, Status::Ok);
        assert_eq!(span.start_ns, 1_700_000_000_000_000_000);
        assert_eq!(span.end_ns, 1_700_000_002_000_000_000);
        assert_eq!(span.attr_str(keys::SPAN_KIND), Some("LLM"));
        assert_eq!(span.attr_str(keys::LLM_MODEL_NAME), Some("gpt-4o-mini"));
        assert_eq!(span.attr_str(keys::LLM_PROVIDER), Some("openai"));
        assert_eq!(span.attr_str(keys::LLM_SYSTEM), Some("openai"));
        assert_eq!(span.attr_str(keys::SESSION_ID), Some("s-9"));
        assert_eq!(span.attr_i64(keys::LLM_TOKEN_COUNT_TOTAL), Some(5));
        assert!(span.attr_str(keys::INPUT_VALUE).is_some());
        assert_eq!(span.events_named(keys::FIRST_TOKEN_EVENT).count(), 1);
        assert_eq!(tracer.open_runs(), 0);
    }

    #[test]
    fn child_runs_nest_under_their_parent() {
        let (backend, _, tracer) = tracer();
        let parent = RunRecord::new("AgentExecutor", "chain");
        let mut child = RunRecord::new("search", "tool");
        child.parent_run_id = Some(parent.id);
        tracer.on_run_start(&parent);
        tracer.on_run_start(&child);
        tracer.on_run_end(&child);
        tracer.on_run_end(&parent);

        let agent = backend.find("AgentExecutor").unwrap();
        let tool = backend.find("search").unwrap();
        assert_eq!(agent.attr_str(keys::SPAN_KIND), Some("AGENT"));
        assert_eq!(tool.attr_str(keys::SPAN_KIND), Some("TOOL"));
        assert_eq!(tool.parent_span_id.as_deref(), Some(agent.context.span_id.as_str()));
    }

    #[test]
    fn errored_runs_record_the_exception_unless_ignored() {
        let (backend, _, tracer) = tracer();
        let failing = RunRecord::new("step", "chain");
        let routed = RunRecord::new("router", "chain");
        tracer.on_run_start(&failing);
        tracer.on_run_start(&routed);

        let mut f = failing.clone();
        f.error = Some("ValueError('bad input')".into());
        tracer.on_run_error(&f);
        let mut r = routed.clone();
        r.error = Some("Command(goto='next')".into());
        tracer.on_run_error(&r);

        let step = backend.find("step").unwrap();
        assert_eq!(step.status, Status::Error("ValueError('bad input')".into()));
        let exc = step.events_named(keys::EXCEPTION_EVENT).next().unwrap();
        assert_eq!(
            exc.attributes.get(keys::EXCEPTION_TYPE).and_then(|v| v.as_str()),
            Some("ValueError")
        );
        let router = backend.find("router").unwrap();
        assert_eq!(router.status, Status::Ok);
        assert_eq!(router.events_named(keys::EXCEPTION_EVENT).count(), 0);
    }

    #[test]
    fn suppressed_and_unknown_runs_are_ignored() {
        let (backend, context, tracer) = tracer();
        context.set_suppressed(true);
        let run = RunRecord::new("quiet", "chain");
        tracer.on_run_start(&run);
        tracer.on_new_token(run.id);
        tracer.on_run_end(&run);
        assert!(backend.is_empty());
        assert_eq!(tracer.open_runs(), 0);
    }

    #[test]
    fn error_text_parsing() {
        let e = parse_error("KeyError: 'x'");
        assert_eq!((e.type_name.as_str(), e.message.as_str()), ("KeyError", "'x'"));
        let e = parse_error("TimeoutError('slow')");
        assert_eq!((e.type_name.as_str(), e.message.as_str()), ("TimeoutError", "'slow'"));
        let e = parse_error("something broke: badly");
        assert_eq!(e.type_name, "Error");
    }
}
