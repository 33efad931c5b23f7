//! Typed property values.
//!
//! A `Value` is the unit stored in a `NamedValueSet` and compared by
//! the expression engine. The comparison rules match the store's query
//! semantics:
//! - integers and floats compare numerically with each other
//! - strings compare case-insensitively
//! - offset-aware and wall-clock timestamps normalize before comparing,
//!   so equal instants compare equal regardless of representation
//! - values of unrelated types do not compare (the caller decides
//!   whether that is a mismatch or an evaluation error)

use crate::{CoreError, CoreResult};
use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    Uuid(Uuid),
    /// An offset-aware instant.
    DateTime(DateTime<Utc>),
    /// A wall-clock timestamp without offset information. Normalized
    /// as UTC when compared against `DateTime`.
    LocalDateTime(NaiveDateTime),
    /// A relative duration, serialized as whole milliseconds.
    Duration(#[serde(with = "duration_millis")] chrono::Duration),
    /// A homogeneous list of values. Lists do not compare; the
    /// expression layer expands them into OR alternatives instead.
    List(Vec<Value>),
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &chrono::Duration, s: S) -> Result<S::Ok, S::Error> {
        d.num_milliseconds().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<chrono::Duration, D::Error> {
        let millis = i64::deserialize(d)?;
        Ok(chrono::Duration::milliseconds(millis))
    }
}

impl Value {
    /// The type tag used in serialized text form (`name|Type=text`).
    pub fn type_name(&self) -> String {
        match self {
            Value::Bool(_) => "Bool".into(),
            Value::I64(_) => "I64".into(),
            Value::F64(_) => "F64".into(),
            Value::Str(_) => "Str".into(),
            Value::Uuid(_) => "Uuid".into(),
            Value::DateTime(_) => "DateTime".into(),
            Value::LocalDateTime(_) => "LocalDateTime".into(),
            Value::Duration(_) => "Duration".into(),
            Value::List(items) => match items.first() {
                Some(first) => format!("{}[]", first.type_name()),
                None => "Str[]".into(),
            },
        }
    }

    /// Renders the value portion of the serialized text form.
    pub fn to_text(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::I64(i) => i.to_string(),
            Value::F64(f) => f.to_string(),
            Value::Str(s) => escape_text(s),
            Value::Uuid(u) => u.to_string(),
            Value::DateTime(dt) => dt.to_rfc3339(),
            Value::LocalDateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            Value::Duration(d) => d.num_milliseconds().to_string(),
            Value::List(items) => items
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Parses a value from its type tag and text form.
    pub fn parse_typed(type_name: &str, text: &str) -> CoreResult<Value> {
        if let Some(elem_type) = type_name.strip_suffix("[]") {
            if text.is_empty() {
                return Ok(Value::List(Vec::new()));
            }
            let items = text
                .split(',')
                .map(|part| Value::parse_typed(elem_type, part))
                .collect::<CoreResult<Vec<_>>>()?;
            return Ok(Value::List(items));
        }
        let bad = |what: &str| CoreError::Serialization(format!("invalid {what}: '{text}'"));
        match type_name {
            "Bool" => text.parse().map(Value::Bool).map_err(|_| bad("Bool")),
            "I64" => text.parse().map(Value::I64).map_err(|_| bad("I64")),
            "F64" => text.parse().map(Value::F64).map_err(|_| bad("F64")),
            "Str" => Ok(Value::Str(unescape_text(text))),
            "Uuid" => text.parse().map(Value::Uuid).map_err(|_| bad("Uuid")),
            "DateTime" => DateTime::parse_from_rfc3339(text)
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                .map_err(|_| bad("DateTime")),
            "LocalDateTime" => NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .map(Value::LocalDateTime)
                .map_err(|_| bad("LocalDateTime")),
            "Duration" => text
                .parse()
                .map(|ms| Value::Duration(chrono::Duration::milliseconds(ms)))
                .map_err(|_| bad("Duration")),
            other => Err(CoreError::Serialization(format!(
                "unknown value type: '{other}'"
            ))),
        }
    }

    /// Whether the value is numeric (integer or float).
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::I64(_) | Value::F64(_))
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(i) => Some(*i as f64),
            Value::F64(f) => Some(*f),
            _ => None,
        }
    }

    fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            // wall-clock values normalize as UTC
            Value::LocalDateTime(dt) => Some(dt.and_utc()),
            _ => None,
        }
    }

    /// Compares two values, or `None` when the types are unrelated.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if self.is_numeric() && other.is_numeric() {
            return self.as_f64()?.partial_cmp(&other.as_f64()?);
        }
        if let (Some(a), Some(b)) = (self.as_instant(), other.as_instant()) {
            return Some(a.cmp(&b));
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// The date portion of a timestamp value as a midnight instant.
    pub fn date_part(&self) -> Option<Value> {
        let instant = self.as_instant()?;
        let midnight = instant.date_naive().and_hms_opt(0, 0, 0)?;
        Some(Value::DateTime(midnight.and_utc()))
    }

    /// The weekday name ("Monday".."Sunday") of a timestamp value.
    pub fn day_of_week(&self) -> Option<Value> {
        let instant = self.as_instant()?;
        Some(Value::Str(format!("{:?}", instant.weekday())))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "'{s}'"),
            other => write!(f, "{{{}}}", other.to_text()),
        }
    }
}

// Escaping for the text form: the pair separator, list separator and
// line breaks must not leak into serialized values.
fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '|' => out.push_str("%7C"),
            ',' => out.push_str("%2C"),
            '\r' => out.push_str("%0D"),
            '\n' => out.push_str("%0A"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let hex: String = chars.by_ref().take(2).collect();
        match u8::from_str_radix(&hex, 16) {
            Ok(byte) => out.push(byte as char),
            Err(_) => {
                out.push('%');
                out.push_str(&hex);
            }
        }
    }
    out
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I64(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::LocalDateTime(v)
    }
}

impl From<chrono::Duration> for Value {
    fn from(v: chrono::Duration) -> Self {
        Value::Duration(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}
