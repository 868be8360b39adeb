//! Seams to the tracing backend and the ambient runtime context.
//!
//! The engine never talks to an exporter directly. It starts spans through a
//! [`TracingBackend`], fills them through the returned [`SpanHandle`], and
//! reads suppression and extra attributes from a [`ContextProvider`].

pub mod keys;
pub mod memory;
#[cfg(test)]
pub mod test_span;
pub mod types;

pub use memory::InMemoryBackend;
pub use types::*;

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::attributes::{AttributeValue, Attributes};
use crate::model::ErrorInfo;

/// A started span. Calls after `end` are ignored by well-behaved backends.
pub trait SpanHandle: Send + Sync {
    fn context(&self) -> SpanContext;
    fn set_attributes(&mut self, attributes: &Attributes);
    fn add_event(&mut self, name: &str, attributes: Attributes, timestamp_ns: u64);
    fn record_exception(&mut self, error: &ErrorInfo, timestamp_ns: u64) {
        self.add_event(keys::EXCEPTION_EVENT, exception_attributes(error), timestamp_ns);
    }
    fn set_status(&mut self, status: Status);
    fn end(&mut self, end_ns: u64);
    fn is_recording(&self) -> bool;
}

/// Implement this to receive spans.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - `start_span` **may** be called from any thread; implementations should avoid panicking.
pub trait TracingBackend: Send + Sync + 'static {
    fn start_span(
        &self,
        name: &str,
        parent: Parent,
        start_ns: u64,
        attributes: &Attributes,
    ) -> Box<dyn SpanHandle>;
}

/// Ambient runtime context as the host propagates it.
pub trait ContextProvider: Send + Sync + 'static {
    /// Instrumentation is switched off for the current operation.
    fn is_suppressed(&self) -> bool {
        false
    }

    /// Extra attributes merged into every span (never overriding span keys).
    fn attributes(&self) -> Attributes {
        Attributes::new()
    }
}

/// No suppression, no extra attributes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContext;

impl ContextProvider for NoContext {}

/// Context with a settable attribute set and suppression flag.
#[derive(Debug, Default)]
pub struct StaticContext {
    attributes: RwLock<Attributes>,
    suppressed: AtomicBool,
}

impl StaticContext {
    pub fn new(attributes: Attributes) -> Self {
        Self {
            attributes: RwLock::new(attributes),
            suppressed: AtomicBool::new(false),
        }
    }

    pub fn set_suppressed(&self, suppressed: bool) {
        self.suppressed.store(suppressed, Ordering::SeqCst);
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.write().insert(key.into(), value.into());
    }
}

impl ContextProvider for StaticContext {
    fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    fn attributes(&self) -> Attributes {
        self.attributes.read().clone()
    }
}

/// Attributes of an `exception` span event.
pub fn exception_attributes(error: &ErrorInfo) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(keys::EXCEPTION_TYPE.into(), error.type_name.clone().into());
    attrs.insert(keys::EXCEPTION_MESSAGE.into(), error.message.clone().into());
    attrs.insert(keys::EXCEPTION_ESCAPED.into(), false.into());
    if let Some(trace) = &error.stacktrace {
        attrs.insert(keys::EXCEPTION_STACKTRACE.into(), trace.clone().into());
    }
    attrs
}
