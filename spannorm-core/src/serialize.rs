//! Never-failing conversion of payloads into JSON.
//!
//! [`to_json_safe`] first tries a strict encoder that applies the conversion
//! rules in order and fails on values JSON cannot represent (non-finite
//! floats, runaway nesting). On failure the permissive encoder stringifies the
//! offending leaves instead. Nothing in this module panics or returns an
//! error to callers.

use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Map, Number, Value};

use crate::error::{CoreResult, SpanNormError};
use crate::payload::{Field, Payload};

const MAX_DEPTH: usize = 64;

pub fn to_json_safe(p: &Payload) -> Value {
    match encode(p, 0) {
        Ok(v) => v,
        Err(err) => {
            tracing::debug!(error = %err, type_name = p.type_name(), "strict encoding failed, using permissive encoder");
            permissive(p, 0)
        }
    }
}

/// JSON text of any payload with `", "` / `": "` separators.
pub fn safe_json_dumps(p: &Payload) -> String {
    dumps(&to_json_safe(p))
}

/// Model payloads dumped with unset fields excluded; `None` for anything else.
pub fn model_json(p: &Payload) -> Option<String> {
    match p {
        Payload::Model { fields, .. } => {
            let v = dump_fields(fields, true, 0).unwrap_or_else(|_| permissive(p, 0));
            Some(dumps(&v))
        }
        _ => None,
    }
}

/// Render an already-safe JSON value.
pub fn dumps(v: &Value) -> String {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    match v.serialize(&mut ser) {
        Ok(()) => String::from_utf8(buf).unwrap_or_else(|_| v.to_string()),
        Err(_) => v.to_string(),
    }
}

/// Human-readable text of a payload: strings verbatim, scalars as text,
/// everything else as JSON.
pub fn display_string(p: &Payload) -> String {
    match p {
        Payload::Str(s) => s.clone(),
        Payload::Null => "None".to_string(),
        Payload::Bool(true) => "True".to_string(),
        Payload::Bool(false) => "False".to_string(),
        Payload::Int(i) => i.to_string(),
        Payload::Float(f) => float_text(*f),
        Payload::Lazy(l) => l.placeholder(),
        Payload::Opaque(o) => o.repr(),
        _ => safe_json_dumps(p),
    }
}

fn encode(p: &Payload, depth: usize) -> CoreResult<Value> {
    if depth > MAX_DEPTH {
        return Err(SpanNormError::Serialize(format!(
            "nesting deeper than {MAX_DEPTH} levels"
        )));
    }
    let v = match p {
        Payload::Null => Value::Null,
        Payload::Bool(b) => Value::Bool(*b),
        Payload::Int(i) => Value::from(*i),
        Payload::Float(f) => finite(*f)?,
        Payload::Str(s) => Value::String(s.clone()),
        Payload::List(items) | Payload::Set(items) => Value::Array(
            items
                .iter()
                .map(|item| encode(item, depth + 1))
                .collect::<CoreResult<Vec<_>>>()?,
        ),
        Payload::Map(entries) => {
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), encode(v, depth + 1)?);
            }
            Value::Object(out)
        }
        Payload::Model { fields, .. } => dump_fields(fields, false, depth)?,
        Payload::Record { fields, .. } => {
            let mut out = Map::new();
            for f in fields.iter().filter(|f| !(f.optional && f.value.is_null())) {
                out.insert(f.name.clone(), encode(&f.value, depth + 1)?);
            }
            Value::Object(out)
        }
        Payload::DateTime(dt) => Value::String(dt.to_rfc3339()),
        Payload::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        Payload::Time(t) => Value::String(t.format("%H:%M:%S%.f").to_string()),
        Payload::Duration(d) => {
            let secs = match d.num_microseconds() {
                Some(us) => us as f64 / 1_000_000.0,
                None => d.num_milliseconds() as f64 / 1_000.0,
            };
            finite(secs)?
        }
        Payload::Uuid(u) => Value::String(u.to_string()),
        Payload::Decimal(s) => Value::String(s.clone()),
        Payload::Path(path) => Value::String(path.to_string_lossy().into_owned()),
        Payload::Complex { re, im } => Value::String(complex_text(*re, *im)),
        Payload::Enum { value, .. } => encode(value, depth + 1)?,
        Payload::Lazy(l) => Value::String(l.placeholder()),
        Payload::Opaque(o) => match o.snapshot() {
            Some(copy) => encode(&copy, depth + 1)?,
            None => Value::String(o.repr()),
        },
    };
    Ok(v)
}

fn dump_fields(fields: &[Field], exclude_unset: bool, depth: usize) -> CoreResult<Value> {
    let mut out = Map::new();
    for f in fields.iter().filter(|f| !exclude_unset || f.explicitly_set) {
        out.insert(f.name.clone(), encode(&f.value, depth + 1)?);
    }
    Ok(Value::Object(out))
}

fn permissive(p: &Payload, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String(format!("<{} ...>", p.type_name()));
    }
    match p {
        Payload::Float(f) if !f.is_finite() => Value::String(float_text(*f)),
        Payload::List(items) | Payload::Set(items) => {
            Value::Array(items.iter().map(|i| permissive(i, depth + 1)).collect())
        }
        Payload::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), permissive(v, depth + 1)))
                .collect(),
        ),
        Payload::Record { fields, .. } => Value::Object(
            fields
                .iter()
                .filter(|f| !(f.optional && f.value.is_null()))
                .map(|f| (f.name.clone(), permissive(&f.value, depth + 1)))
                .collect(),
        ),
        Payload::Model { fields, .. } => Value::Object(
            fields
                .iter()
                .map(|f| (f.name.clone(), permissive(&f.value, depth + 1)))
                .collect(),
        ),
        Payload::Enum { value, .. } => permissive(value, depth + 1),
        Payload::Opaque(o) => match o.snapshot() {
            Some(copy) => permissive(&copy, depth + 1),
            None => Value::String(o.repr()),
        },
        other => encode(other, depth).unwrap_or_else(|_| Value::String(display_string(other))),
    }
}

fn finite(f: f64) -> CoreResult<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| SpanNormError::Serialize(format!("non-finite float {f}")))
}

fn float_text(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        let text = if f > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

fn complex_text(re: f64, im: f64) -> String {
    let part = |x: f64| {
        if x.fract() == 0.0 && x.abs() < 1e16 {
            format!("{}", x as i64)
        } else {
            x.to_string()
        }
    };
    if re == 0.0 {
        format!("{}j", part(im))
    } else {
        let sign = if im < 0.0 { '-' } else { '+' };
        format!("({}{}{}j)", part(re), sign, part(im.abs()))
    }
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}
