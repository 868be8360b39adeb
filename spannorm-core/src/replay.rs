//! Replays a recorded JSON-lines log of host notifications through the
//! engine, with the in-memory backend and a manual clock.
//!
//! ```text
//! {"op":"start","id":"OpenAI.chat-1","instance":{"type":"llm","class_name":"OpenAI"}}
//! {"op":"event","span_id":"OpenAI.chat-1","kind":"stream_chat_delta","delta":"Hi"}
//! {"op":"advance","secs":61}
//! ```

use std::io::BufRead;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::clock::ManualClock;
use crate::config::Config;
use crate::error::{CoreResult, SpanNormError};
use crate::event::Event;
use crate::handler::SpanHandler;
use crate::hooks::{Callbacks, OperationEnd, OperationError, OperationStart};
use crate::model::RunRecord;
use crate::run_tracer::RunTracer;
use crate::telemetry::{FinishedSpan, InMemoryBackend, NoContext};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplayRecord {
    Start(OperationStart),
    Event(Event),
    Finish(OperationEnd),
    Drop(OperationError),
    RunStart(RunRecord),
    RunToken { run_id: Uuid },
    RunEnd(RunRecord),
    RunError(RunRecord),
    /// Move the clock forward, then run one sweep pass.
    Advance {
        #[serde(default)]
        ns: u64,
        #[serde(default)]
        secs: u64,
    },
}

pub struct Replayer {
    backend: InMemoryBackend,
    clock: Arc<ManualClock>,
    handler: SpanHandler,
    runs: RunTracer,
}

impl std::fmt::Debug for Replayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replayer")
            .field("handler", &self.handler)
            .field("runs", &self.runs)
            .finish()
    }
}

impl Replayer {
    pub fn new(cfg: &Config, start_ns: u64) -> CoreResult<Self> {
        let backend = InMemoryBackend::new();
        let clock = Arc::new(ManualClock::new(start_ns));
        let handler = SpanHandler::without_sweeper(Arc::new(backend.clone()), Arc::new(NoContext), clock.clone(), cfg)?;
        let runs = RunTracer::new(handler.manager().clone());
        Ok(Self {
            backend,
            clock,
            handler,
            runs,
        })
    }

    pub fn apply(&self, record: &ReplayRecord) {
        match record {
            ReplayRecord::Start(op) => self.handler.on_start(op),
            ReplayRecord::Event(event) => self.handler.on_progress(event),
            ReplayRecord::Finish(op) => self.handler.on_end(op),
            ReplayRecord::Drop(op) => self.handler.on_error(op),
            ReplayRecord::RunStart(run) => self.runs.on_run_start(run),
            ReplayRecord::RunToken { run_id } => self.runs.on_new_token(*run_id),
            ReplayRecord::RunEnd(run) => self.runs.on_run_end(run),
            ReplayRecord::RunError(run) => self.runs.on_run_error(run),
            ReplayRecord::Advance { ns, secs } => {
                self.clock.advance_ns(ns.saturating_add(secs.saturating_mul(1_000_000_000)));
                let ended = self.handler.manager().sweep_now();
                debug!(ended, "replay sweep");
            }
        }
    }

    /// Apply every line of `input` and return the spans finished so far.
    /// Blank lines are skipped; a malformed line aborts with its number.
    pub fn run(&self, input: impl BufRead) -> CoreResult<Vec<FinishedSpan>> {
        for (n, line) in input.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ReplayRecord = serde_json::from_str(&line)
                .map_err(|e| SpanNormError::Validation(format!("line {}: {e}", n + 1)))?;
            self.apply(&record);
        }
        Ok(self.backend.take())
    }

    /// Spans still open or waiting on a stream.
    pub fn pending(&self) -> usize {
        let manager = self.handler.manager();
        manager.open_len() + manager.queue().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Status, keys};

    const LOG: &str = r#"
{"op":"start","id":"Agent.stream_chat-1"}
{"op":"start","id":"OpenAI.stream_chat-1","parent_id":"Agent.stream_chat-1","instance":{"type":"llm","class_name":"OpenAI","model_name":"gpt-4o"}}
{"op":"finish","id":"OpenAI.stream_chat-1","result":null}
{"op":"start","id":"Retriever.retrieve-1","parent_id":"Agent.stream_chat-1","instance":{"type":"retriever","class_name":"VectorIndexRetriever"}}
{"op":"event","span_id":"Retriever.retrieve-1","kind":"retrieval_end","nodes":[{"id":"n1","content":"Rust is a language","score":0.9}]}
{"op":"drop","id":"Retriever.retrieve-1","error":{"type_name":"WorkflowDone","message":"stop"}}
{"op":"advance","secs":1}
{"op":"finish","id":"Agent.stream_chat-1","result":"ok"}
"#;

    #[test]
    fn replays_a_log_into_finished_spans() {
        let replayer = Replayer::new(&Config::default(), 1_000).unwrap();
        let spans = replayer.run(LOG.as_bytes()).unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(replayer.pending(), 0);

        let llm = spans.iter().find(|s| s.name == "OpenAI.stream_chat").unwrap();
        assert_eq!(llm.attr_str(keys::LLM_MODEL_NAME), Some("gpt-4o"));
        let retriever = spans.iter().find(|s| s.name == "Retriever.retrieve").unwrap();
        assert_eq!(retriever.status, Status::Ok);
        assert_eq!(retriever.attr_str("retrieval.documents.0.document.id"), Some("n1"));
        let agent = spans.iter().find(|s| s.name == "Agent.stream_chat").unwrap();
        assert_eq!(agent.end_ns, 1_000_001_000);
    }

    #[test]
    fn run_records_replay_too() {
        let replayer = Replayer::new(&Config::default(), 0).unwrap();
        let id = Uuid::new_v4();
        let log = format!(
            "{}\n{}\n",
            serde_json::json!({"op": "run_start", "id": id, "name": "RunnableSequence", "run_type": "chain"}),
            serde_json::json!({"op": "run_end", "id": id, "name": "RunnableSequence", "run_type": "chain", "outputs": {"output": "done"}}),
        );
        let spans = replayer.run(log.as_bytes()).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].attr_str(keys::SPAN_KIND), Some("CHAIN"));
        assert_eq!(spans[0].attr_str(keys::OUTPUT_VALUE), Some("done"));
    }

    #[test]
    fn malformed_lines_report_their_number() {
        let replayer = Replayer::new(&Config::default(), 0).unwrap();
        let err = replayer.run("\n{\"op\":\"advance\"}\n{\"op\":\"nope\"}\n".as_bytes()).unwrap_err();
        match err {
            SpanNormError::Validation(msg) => assert!(msg.starts_with("line 3:"), "{msg}"),
            other => panic!("expected Validation, got {other:?}"),
        }
    }
}
