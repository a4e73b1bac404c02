//! The attribute value model: a closed set of semantic kinds and a tagged
//! value union over it.
//!
//! Inputs reach the engine as loosely typed [`serde_json::Value`]s (form
//! fields, imported documents, module props). The transformation pipeline
//! coerces them into [`AttributeValue`] variants; validation is a match
//! over the tag.

use crate::parse;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The semantic kind of an attribute.
///
/// `Custom` is the open escape hatch: any kind name outside the built-in
/// set deserializes to it and gets no built-in validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Text,
    Number,
    Integer,
    Boolean,
    Email,
    Url,
    Date,
    Array,
    Object,
    Custom(String),
}

impl ValueKind {
    /// The canonical kind name, as it appears in serialized attributes.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Number => "number",
            ValueKind::Integer => "integer",
            ValueKind::Boolean => "boolean",
            ValueKind::Email => "email",
            ValueKind::Url => "url",
            ValueKind::Date => "date",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Custom(name) => name,
        }
    }

    /// Parses a kind name. `"string"` is accepted as an alias of `text`;
    /// unknown names become [`ValueKind::Custom`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "text" | "string" => ValueKind::Text,
            "number" => ValueKind::Number,
            "integer" => ValueKind::Integer,
            "boolean" => ValueKind::Boolean,
            "email" => ValueKind::Email,
            "url" => ValueKind::Url,
            "date" => ValueKind::Date,
            "array" => ValueKind::Array,
            "object" => ValueKind::Object,
            other => ValueKind::Custom(other.to_string()),
        }
    }

    /// Text, email and url values all carry trimmed strings.
    #[must_use]
    pub fn is_string_family(&self) -> bool {
        matches!(self, ValueKind::Text | ValueKind::Email | ValueKind::Url)
    }

    /// The intrinsic default for the kind, as a JSON seed value.
    #[must_use]
    pub fn default_json(&self) -> Value {
        match self {
            ValueKind::Text | ValueKind::Email | ValueKind::Url => Value::String(String::new()),
            ValueKind::Number | ValueKind::Integer => Value::from(0),
            ValueKind::Boolean => Value::Bool(false),
            ValueKind::Array => Value::Array(Vec::new()),
            ValueKind::Object => Value::Object(serde_json::Map::new()),
            ValueKind::Date => Value::String(
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            ValueKind::Custom(_) => Value::Null,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for ValueKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ValueKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(ValueKind::parse(&name))
    }
}

/// A typed attribute value.
///
/// `Null` is the unset state; every other variant satisfies (or is checked
/// against) its kind's conformance rules.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Text(String),
    Number(f64),
    Integer(i64),
    Boolean(bool),
    Email(String),
    Url(String),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Object(serde_json::Map<String, Value>),
    Custom(Value),
}

impl AttributeValue {
    /// Maps a JSON value into the variant its kind expects, without
    /// validating. Used when loading serialized attributes: well-formed
    /// payloads land in the right variant, anything else falls back to
    /// the loose mapping and is caught by validation later.
    #[must_use]
    pub fn from_json(kind: &ValueKind, value: Value) -> Self {
        if value.is_null() {
            return AttributeValue::Null;
        }
        match (kind, value) {
            (ValueKind::Text, Value::String(s)) => AttributeValue::Text(s),
            (ValueKind::Email, Value::String(s)) => AttributeValue::Email(s),
            (ValueKind::Url, Value::String(s)) => AttributeValue::Url(s),
            (ValueKind::Number, Value::Number(n)) => {
                AttributeValue::Number(n.as_f64().unwrap_or_default())
            }
            (ValueKind::Integer, Value::Number(n)) => match integral_of(&n) {
                Some(i) => AttributeValue::Integer(i),
                None => AttributeValue::Number(n.as_f64().unwrap_or_default()),
            },
            (ValueKind::Boolean, Value::Bool(b)) => AttributeValue::Boolean(b),
            (ValueKind::Date, Value::String(s)) => match parse::parse_date(&s) {
                Some(dt) => AttributeValue::Date(dt),
                None => AttributeValue::Text(s),
            },
            (ValueKind::Array, Value::Array(items)) => AttributeValue::Array(items),
            (ValueKind::Object, Value::Object(map)) => AttributeValue::Object(map),
            (ValueKind::Custom(_), v) => AttributeValue::Custom(v),
            (_, v) => AttributeValue::from_json_loose(v),
        }
    }

    /// Maps a JSON value by its own shape, ignoring any declared kind.
    #[must_use]
    pub fn from_json_loose(value: Value) -> Self {
        match value {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Boolean(b),
            Value::Number(n) => match integral_of(&n) {
                Some(i) => AttributeValue::Integer(i),
                None => AttributeValue::Number(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => AttributeValue::Text(s),
            Value::Array(items) => AttributeValue::Array(items),
            Value::Object(map) => AttributeValue::Object(map),
        }
    }

    /// Projects the value back to JSON. Dates serialize as RFC 3339.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::Null => Value::Null,
            AttributeValue::Text(s) | AttributeValue::Email(s) | AttributeValue::Url(s) => {
                Value::String(s.clone())
            }
            AttributeValue::Number(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            AttributeValue::Integer(i) => Value::from(*i),
            AttributeValue::Boolean(b) => Value::Bool(*b),
            AttributeValue::Date(dt) => {
                Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            AttributeValue::Array(items) => Value::Array(items.clone()),
            AttributeValue::Object(map) => Value::Object(map.clone()),
            AttributeValue::Custom(v) => v.clone(),
        }
    }

    /// Whether the value counts as empty for required-field checks.
    ///
    /// Only `Null` and empty strings are empty. `Boolean(false)`,
    /// `Integer(0)`, `Number(0.0)` and empty collections are NOT empty;
    /// callers depend on that asymmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            AttributeValue::Null => true,
            AttributeValue::Text(s) | AttributeValue::Email(s) | AttributeValue::Url(s) => {
                s.is_empty()
            }
            _ => false,
        }
    }

    /// The string content, when the value carries one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) | AttributeValue::Email(s) | AttributeValue::Url(s) => Some(s),
            _ => None,
        }
    }

    /// The numeric content, when the value is a number or integer.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(f) => Some(*f),
            AttributeValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl Default for AttributeValue {
    fn default() -> Self {
        AttributeValue::Null
    }
}

/// Infers the semantic kind of a raw JSON value.
///
/// The order is significant and fixed: null, boolean, number (integer when
/// whole), array, object, then string heuristics — email pattern, URL
/// parse, date parse (requiring length > 8), else text.
#[must_use]
pub fn infer_kind(value: &Value) -> ValueKind {
    match value {
        Value::Null => ValueKind::Text,
        Value::Bool(_) => ValueKind::Boolean,
        Value::Number(n) => {
            if integral_of(n).is_some() {
                ValueKind::Integer
            } else {
                ValueKind::Number
            }
        }
        Value::Array(_) => ValueKind::Array,
        Value::Object(_) => ValueKind::Object,
        Value::String(s) => {
            if parse::is_email(s) {
                ValueKind::Email
            } else if parse::is_url(s) {
                ValueKind::Url
            } else if parse::is_date_like(s) {
                ValueKind::Date
            } else {
                ValueKind::Text
            }
        }
    }
}

/// The integral value of a JSON number, when it is whole.
fn integral_of(n: &serde_json::Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 => Some(f as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_names_round_trip() {
        for name in [
            "text", "number", "integer", "boolean", "email", "url", "date", "array", "object",
        ] {
            assert_eq!(ValueKind::parse(name).name(), name);
        }
        assert_eq!(ValueKind::parse("string"), ValueKind::Text);
        assert_eq!(
            ValueKind::parse("color"),
            ValueKind::Custom("color".to_string())
        );
    }

    #[test]
    fn inference_follows_the_fixed_order() {
        assert_eq!(infer_kind(&json!("a@b.com")), ValueKind::Email);
        assert_eq!(infer_kind(&json!("https://x.com")), ValueKind::Url);
        assert_eq!(infer_kind(&json!("2024-01-01")), ValueKind::Date);
        assert_eq!(infer_kind(&json!("hello")), ValueKind::Text);
        assert_eq!(infer_kind(&json!(true)), ValueKind::Boolean);
        assert_eq!(infer_kind(&json!(3)), ValueKind::Integer);
        assert_eq!(infer_kind(&json!(3.5)), ValueKind::Number);
        assert_eq!(infer_kind(&json!([1, 2])), ValueKind::Array);
        assert_eq!(infer_kind(&json!({"a": 1})), ValueKind::Object);
        assert_eq!(infer_kind(&Value::Null), ValueKind::Text);
    }

    #[test]
    fn whole_floats_infer_as_integers() {
        assert_eq!(infer_kind(&json!(3.0)), ValueKind::Integer);
    }

    #[test]
    fn emptiness_asymmetry_is_preserved() {
        assert!(AttributeValue::Null.is_empty());
        assert!(AttributeValue::Text(String::new()).is_empty());
        assert!(!AttributeValue::Boolean(false).is_empty());
        assert!(!AttributeValue::Integer(0).is_empty());
        assert!(!AttributeValue::Number(0.0).is_empty());
        assert!(!AttributeValue::Array(Vec::new()).is_empty());
    }

    #[test]
    fn date_json_round_trip() {
        let v = AttributeValue::from_json(&ValueKind::Date, json!("2024-06-15T08:00:00Z"));
        assert!(matches!(v, AttributeValue::Date(_)));
        let back = AttributeValue::from_json(&ValueKind::Date, v.to_json());
        assert_eq!(v, back);
    }

    #[test]
    fn custom_kind_keeps_raw_json() {
        let v = AttributeValue::from_json(
            &ValueKind::Custom("color".into()),
            json!({"r": 255, "g": 0, "b": 0}),
        );
        assert!(matches!(v, AttributeValue::Custom(_)));
    }
}
