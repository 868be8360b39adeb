#![cfg(test)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{Event, Level, Subscriber};
use tracing_core::field::{Field, Visit};
use tracing_subscriber::registry;
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

/// One `tracing` event as the engine emitted it.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>, // stringified values
}

#[derive(Default, Debug)]
pub struct LogStore {
    pub records: Mutex<Vec<LogRecord>>,
}

impl LogStore {
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.level == level && r.message.contains(needle))
    }

    pub fn count(&self, level: Level) -> usize {
        self.records.lock().unwrap().iter().filter(|r| r.level == level).count()
    }
}

#[derive(Clone)]
pub struct CaptureLayer {
    pub store: Arc<LogStore>,
}

struct MapVisitor<'a> {
    message: &'a mut String,
    map: &'a mut HashMap<String, String>,
}

impl<'a> Visit for MapVisitor<'a> {
    fn record_debug(&mut self, field: &Field, value: &dyn core::fmt::Debug) {
        if field.name() == "message" {
            *self.message = format!("{value:?}");
        } else {
            self.map.insert(field.name().to_string(), format!("{value:?}"));
        }
    }
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = value.to_string();
        } else {
            self.map.insert(field.name().to_string(), value.to_string());
        }
    }
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        let mut fields = HashMap::new();
        event.record(&mut MapVisitor {
            message: &mut message,
            map: &mut fields,
        });
        self.store.records.lock().unwrap().push(LogRecord {
            level: *event.metadata().level(),
            message,
            fields,
        });
    }
}

/// Capture events emitted on the current thread until the guard drops.
pub fn capture_logs() -> (Arc<LogStore>, tracing::subscriber::DefaultGuard) {
    let store = Arc::new(LogStore::default());
    let guard = capture_into(store.clone());
    (store, guard)
}

/// Like [`capture_logs`], into an existing store. Lets worker threads share one.
pub fn capture_into(store: Arc<LogStore>) -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::prelude::*;
    let subscriber = registry::Registry::default().with(CaptureLayer { store });
    tracing::subscriber::set_default(subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_level_message_and_fields() {
        let (store, _guard) = capture_logs();
        tracing::warn!(span_id = "abc", "no open span for event");
        tracing::debug!(count = 3u64, "sweep pass");
        assert!(store.contains(Level::WARN, "no open span"));
        assert_eq!(store.count(Level::DEBUG), 1);
        let records = store.records.lock().unwrap();
        assert_eq!(records[0].fields.get("span_id").map(String::as_str), Some("abc"));
        assert_eq!(records[1].fields.get("count").map(String::as_str), Some("3"));
    }
}
