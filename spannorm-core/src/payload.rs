//! Dynamic representation of framework payloads.
//!
//! Host adapters translate whatever their framework hands them (callback
//! arguments, response objects, serialized runs) into a [`Payload`] tree.
//! Extraction rules only ever read payloads; they never mutate or execute
//! them, which is why lazy values carry a shared probe instead of the stream
//! itself.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// One field of a record or model.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub value: Payload,
    /// Declared as optional; a record drops it when the value is null.
    pub optional: bool,
    /// Explicitly assigned by the caller (as opposed to a model default).
    pub explicitly_set: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<Payload>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            optional: false,
            explicitly_set: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn defaulted(mut self) -> Self {
        self.explicitly_set = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LazyKind {
    Generator,
    AsyncGenerator,
    Iterator,
    Callable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    NotStarted,
    Active,
    Exhausted,
}

impl StreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::NotStarted,
            1 => Self::Active,
            _ => Self::Exhausted,
        }
    }
}

/// Shared view of a lazy result's progress, updated by whoever drives it.
#[derive(Debug, Clone, Default)]
pub struct StreamProbe(Arc<AtomicU8>);

impl StreamProbe {
    pub fn new(state: StreamState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// NotStarted -> Active. No effect once exhausted.
    pub fn mark_active(&self) {
        let _ = self.0.compare_exchange(
            StreamState::NotStarted as u8,
            StreamState::Active as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn mark_exhausted(&self) {
        self.0.store(StreamState::Exhausted as u8, Ordering::SeqCst);
    }
}

/// A generator, iterator or callable. Never materialized, never called.
#[derive(Debug, Clone)]
pub struct LazyValue {
    pub type_name: String,
    pub kind: LazyKind,
    pub probe: StreamProbe,
}

impl LazyValue {
    pub fn new(type_name: impl Into<String>, kind: LazyKind) -> Self {
        Self {
            type_name: type_name.into(),
            kind,
            probe: StreamProbe::new(StreamState::NotStarted),
        }
    }

    pub fn with_probe(mut self, probe: StreamProbe) -> Self {
        self.probe = probe;
        self
    }

    /// True for a generator-like stream that has not been drained yet.
    pub fn is_live(&self) -> bool {
        matches!(self.kind, LazyKind::Generator | LazyKind::AsyncGenerator)
            && self.probe.state() != StreamState::Exhausted
    }

    pub fn placeholder(&self) -> String {
        match self.kind {
            LazyKind::Generator => format!("<generator object {}>", self.type_name),
            LazyKind::AsyncGenerator => format!("<async_generator object {}>", self.type_name),
            LazyKind::Iterator => format!("<{} iterator>", self.type_name),
            LazyKind::Callable => format!("<function {}>", self.type_name),
        }
    }
}

/// An object the adapter could not translate structurally.
pub trait ForeignValue: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &str;

    /// Best-effort deep copy into a payload tree.
    fn snapshot(&self) -> Option<Payload> {
        None
    }

    fn repr(&self) -> String {
        format!("<{} object>", self.type_name())
    }
}

#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Payload>),
    Set(Vec<Payload>),
    Map(Vec<(String, Payload)>),
    /// Dataclass-like aggregate.
    Record {
        type_name: String,
        fields: Vec<Field>,
    },
    /// Aggregate with a model-dump capability.
    Model {
        type_name: String,
        fields: Vec<Field>,
    },
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
    Duration(chrono::Duration),
    Uuid(uuid::Uuid),
    Decimal(String),
    Path(PathBuf),
    Complex {
        re: f64,
        im: f64,
    },
    Enum {
        type_name: String,
        value: Box<Payload>,
    },
    Lazy(LazyValue),
    Opaque(Arc<dyn ForeignValue>),
}

impl Payload {
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Payload)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn record(type_name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self::Record {
            type_name: type_name.into(),
            fields,
        }
    }

    pub fn model(type_name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self::Model {
            type_name: type_name.into(),
            fields,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Mapping-like payloads: plain maps, records and models.
    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::Map(_) | Self::Record { .. } | Self::Model { .. })
    }

    /// Look up a key, treating a null value the same as a missing one.
    pub fn get(&self, key: &str) -> Option<&Payload> {
        self.get_raw(key).filter(|v| !v.is_null())
    }

    /// Look up a key, returning present-but-null values too.
    pub fn get_raw(&self, key: &str) -> Option<&Payload> {
        match self {
            Self::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            Self::Record { fields, .. } | Self::Model { fields, .. } => {
                fields.iter().find(|f| f.name == key).map(|f| &f.value)
            }
            _ => None,
        }
    }

    pub fn index(&self, i: usize) -> Option<&Payload> {
        self.as_list().and_then(|items| items.get(i))
    }

    /// Walk a path of keys; numeric segments index into lists.
    pub fn path(&self, segments: &[&str]) -> Option<&Payload> {
        let mut cur = self;
        for seg in segments {
            cur = match cur {
                Self::List(_) | Self::Set(_) => cur.index(seg.parse().ok()?)?,
                _ => cur.get(seg)?,
            };
        }
        Some(cur)
    }

    /// Key/value view of mapping-like payloads, in declaration order.
    pub fn entries(&self) -> Option<Vec<(&str, &Payload)>> {
        match self {
            Self::Map(entries) => Some(entries.iter().map(|(k, v)| (k.as_str(), v)).collect()),
            Self::Record { fields, .. } | Self::Model { fields, .. } => {
                Some(fields.iter().map(|f| (f.name.as_str(), &f.value)).collect())
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integers, and floats with no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Payload]> {
        match self {
            Self::List(items) | Self::Set(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_lazy(&self) -> Option<&LazyValue> {
        match self {
            Self::Lazy(l) => Some(l),
            _ => None,
        }
    }

    /// Empty strings, lists, maps and null are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(v) | Self::Set(v) => !v.is_empty(),
            Self::Map(v) => !v.is_empty(),
            _ => true,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Null => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "dict",
            Self::Record { type_name, .. }
            | Self::Model { type_name, .. }
            | Self::Enum { type_name, .. } => type_name,
            Self::DateTime(_) => "datetime",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Duration(_) => "timedelta",
            Self::Uuid(_) => "UUID",
            Self::Decimal(_) => "Decimal",
            Self::Path(_) => "Path",
            Self::Complex { .. } => "complex",
            Self::Lazy(l) => &l.type_name,
            Self::Opaque(o) => o.type_name(),
        }
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::Str(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Payload {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Payload {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(items: Vec<Payload>) -> Self {
        Self::List(items)
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        crate::serialize::to_json_safe(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_treats_null_as_missing() {
        let p = Payload::from(json!({"a": null, "b": 1}));
        assert!(p.get("a").is_none());
        assert!(p.get_raw("a").is_some_and(Payload::is_null));
        assert_eq!(p.get("b").and_then(Payload::as_i64), Some(1));
    }

    #[test]
    fn path_walks_maps_and_lists() {
        let p = Payload::from(json!({"generations": [[{"text": "hi"}]]}));
        let text = p.path(&["generations", "0", "0", "text"]).and_then(Payload::as_str);
        assert_eq!(text, Some("hi"));
        assert!(p.path(&["generations", "1"]).is_none());
    }

    #[test]
    fn records_expose_fields_by_name() {
        let p = Payload::record(
            "Usage",
            vec![Field::new("prompt_tokens", 3i64), Field::new("note", Payload::Null).optional()],
        );
        assert_eq!(p.get("prompt_tokens").and_then(Payload::as_i64), Some(3));
        assert_eq!(p.type_name(), "Usage");
        assert!(p.is_mapping());
    }

    #[test]
    fn lazy_liveness_follows_probe() {
        let probe = StreamProbe::new(StreamState::NotStarted);
        let lazy = LazyValue::new("ChatStream", LazyKind::AsyncGenerator).with_probe(probe.clone());
        assert!(lazy.is_live());
        probe.mark_active();
        assert_eq!(probe.state(), StreamState::Active);
        probe.mark_exhausted();
        assert!(!lazy.is_live());
        // exhausted never goes back to active
        probe.mark_active();
        assert_eq!(probe.state(), StreamState::Exhausted);

        let callable = LazyValue::new("tool_fn", LazyKind::Callable);
        assert!(!callable.is_live());
        assert_eq!(callable.placeholder(), "<function tool_fn>");
    }

    #[test]
    fn integral_floats_read_as_ints() {
        assert_eq!(Payload::Float(12.0).as_i64(), Some(12));
        assert_eq!(Payload::Float(1.5).as_i64(), None);
        assert_eq!(Payload::Str("3".into()).as_i64(), None);
    }
}
