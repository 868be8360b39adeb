use std::sync::Arc;

use parking_lot::Mutex;

use super::{Parent, SpanContext, SpanEventRecord, SpanHandle, Status, TracingBackend, FinishedSpan};
use crate::attributes::Attributes;

/// Backend that keeps finished spans in memory, in end order.
///
/// Used by tests and by the replay CLI. Cloning shares the same store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    finished: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finished(&self) -> Vec<FinishedSpan> {
        self.finished.lock().clone()
    }

    pub fn take(&self) -> Vec<FinishedSpan> {
        std::mem::take(&mut *self.finished.lock())
    }

    pub fn len(&self) -> usize {
        self.finished.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First finished span with this name.
    pub fn find(&self, name: &str) -> Option<FinishedSpan> {
        self.finished.lock().iter().find(|s| s.name == name).cloned()
    }
}

impl TracingBackend for InMemoryBackend {
    fn start_span(
        &self,
        name: &str,
        parent: Parent,
        start_ns: u64,
        attributes: &Attributes,
    ) -> Box<dyn SpanHandle> {
        let (trace_id, parent_span_id) = match parent {
            Parent::Span(ctx) => (ctx.trace_id, Some(ctx.span_id)),
            Parent::Ambient | Parent::Root => (uuid::Uuid::new_v4().simple().to_string(), None),
        };
        let mut span_id = uuid::Uuid::new_v4().simple().to_string();
        span_id.truncate(16);
        Box::new(MemorySpan {
            span: FinishedSpan {
                name: name.to_string(),
                context: SpanContext { trace_id, span_id },
                parent_span_id,
                start_ns,
                end_ns: start_ns,
                attributes: attributes.clone(),
                events: Vec::new(),
                status: Status::Unset,
            },
            sink: self.finished.clone(),
            ended: false,
        })
    }
}

struct MemorySpan {
    span: FinishedSpan,
    sink: Arc<Mutex<Vec<FinishedSpan>>>,
    ended: bool,
}

impl SpanHandle for MemorySpan {
    fn context(&self) -> SpanContext {
        self.span.context.clone()
    }

    fn set_attributes(&mut self, attributes: &Attributes) {
        if self.ended {
            return;
        }
        self.span
            .attributes
            .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    fn add_event(&mut self, name: &str, attributes: Attributes, timestamp_ns: u64) {
        if self.ended {
            return;
        }
        self.span.events.push(SpanEventRecord {
            name: name.to_string(),
            timestamp_ns,
            attributes,
        });
    }

    fn set_status(&mut self, status: Status) {
        if !self.ended {
            self.span.status = status;
        }
    }

    fn end(&mut self, end_ns: u64) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.span.end_ns = end_ns;
        self.sink.lock().push(self.span.clone());
    }

    fn is_recording(&self) -> bool {
        !self.ended
    }
}
