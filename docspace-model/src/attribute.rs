//! A single named, typed, validated value cell.
//!
//! Values enter as loose JSON, pass through kind-specific coercion plus
//! any registered transformers, then through validation. Only values that
//! survive both are committed; a failed set leaves the cell untouched.

use crate::error::{ModelError, ModelResult};
use chrono::{DateTime, Utc};
use docspace_types::{AttributeValue, SharedSink, ValueKind, parse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::rc::Rc;

/// Where an attribute came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributeSource {
    User,
    Module,
    System,
    AutoDiscovery,
    Entity,
}

impl Default for AttributeSource {
    fn default() -> Self {
        AttributeSource::User
    }
}

/// Attribute metadata: provenance, timestamps, and optional constraints.
///
/// Unknown metadata keys survive round trips through `extra`, since module
/// definitions attach their own annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeMetadata {
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub source: AttributeSource,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub editable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Regular expression the (string) value must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Default for AttributeMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            source: AttributeSource::default(),
            required: false,
            editable: true,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            pattern: None,
            default_value: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl AttributeMetadata {
    /// Fresh metadata with the given provenance.
    #[must_use]
    pub fn with_source(source: AttributeSource) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }
}

/// Outcome of validating a value against an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Options for [`Attribute::set_value`].
#[derive(Debug, Clone, Copy)]
pub struct SetValueOptions {
    /// Turn a validation failure into a [`ModelError::Validation`] instead
    /// of a `false` return.
    pub throw_on_error: bool,
    /// Publish an `attribute:change` notification on success.
    pub notify: bool,
}

impl Default for SetValueOptions {
    fn default() -> Self {
        Self {
            throw_on_error: false,
            notify: true,
        }
    }
}

/// Custom validation rule: `Ok(())` passes, `Err(message)` is collected.
pub type Validator = Rc<dyn Fn(&AttributeValue, &Attribute) -> Result<(), String>>;

/// Custom transformation step, applied in registration order after the
/// built-in kind coercion. Failures are logged and skipped; the pipeline
/// continues with the previous value.
pub type Transformer = Rc<dyn Fn(AttributeValue, &Attribute) -> Result<AttributeValue, String>>;

/// Serialized shape of an attribute: `{name, value, type, metadata}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeData {
    pub name: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub kind: ValueKind,
    #[serde(default)]
    pub metadata: AttributeMetadata,
}

/// A typed, named, validated value cell.
pub struct Attribute {
    name: String,
    kind: ValueKind,
    value: AttributeValue,
    pub metadata: AttributeMetadata,
    validators: Vec<Validator>,
    transformers: Vec<Transformer>,
    sink: Option<SharedSink>,
}

impl Attribute {
    /// Creates an attribute, mapping the initial value into the kind's
    /// variant without validating it.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        initial: Value,
        kind: ValueKind,
        metadata: AttributeMetadata,
    ) -> Self {
        let value = AttributeValue::from_json(&kind, initial);
        Self {
            name: name.into(),
            kind,
            value,
            metadata,
            validators: Vec::new(),
            transformers: Vec::new(),
            sink: None,
        }
    }

    /// An unset attribute of the given kind.
    #[must_use]
    pub fn empty(name: impl Into<String>, kind: ValueKind) -> Self {
        Self::new(name, Value::Null, kind, AttributeMetadata::default())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    /// The stored value, verbatim.
    #[must_use]
    pub fn value(&self) -> &AttributeValue {
        &self.value
    }

    /// Routes this attribute's change notifications to a sink.
    pub fn set_sink(&mut self, sink: SharedSink) {
        self.sink = Some(sink);
    }

    /// Appends a custom validation rule.
    pub fn add_validator(
        &mut self,
        validator: impl Fn(&AttributeValue, &Attribute) -> Result<(), String> + 'static,
    ) {
        self.validators.push(Rc::new(validator));
    }

    /// Appends a custom transformation step.
    pub fn add_transformer(
        &mut self,
        transformer: impl Fn(AttributeValue, &Attribute) -> Result<AttributeValue, String> + 'static,
    ) {
        self.transformers.push(Rc::new(transformer));
    }

    /// Sets the value: transform, validate, commit.
    ///
    /// On validation failure the stored value is unchanged and the result
    /// is `Ok(false)` — or [`ModelError::Validation`] under
    /// `throw_on_error`. On success the value is committed, `updated_at`
    /// refreshes, and (unless suppressed) an `attribute:change`
    /// notification goes to the sink.
    pub fn set_value(&mut self, input: Value, options: &SetValueOptions) -> ModelResult<bool> {
        let old = self.value.clone();
        let transformed = self.transform(input);
        let report = self.validate(&transformed);
        if !report.is_valid {
            if options.throw_on_error {
                return Err(ModelError::Validation {
                    attribute: self.name.clone(),
                    errors: report.errors,
                });
            }
            tracing::warn!(
                attribute = %self.name,
                errors = ?report.errors,
                "validation failed; value unchanged"
            );
            return Ok(false);
        }

        self.value = transformed;
        self.metadata.updated_at = Utc::now();

        if options.notify {
            if let Some(sink) = &self.sink {
                sink.publish(
                    "attribute:change",
                    &serde_json::json!({
                        "name": self.name,
                        "oldValue": old.to_json(),
                        "newValue": self.value.to_json(),
                        "timestamp": Utc::now(),
                    }),
                );
            }
        }
        Ok(true)
    }

    /// The display projection of the stored value: booleans become
    /// yes/no, dates format as `%Y-%m-%d`, arrays join with `", "`,
    /// unset values show as an empty string.
    #[must_use]
    pub fn display_value(&self) -> Value {
        match &self.value {
            AttributeValue::Null => Value::String(String::new()),
            AttributeValue::Boolean(b) => {
                Value::String(if *b { "yes" } else { "no" }.to_string())
            }
            AttributeValue::Date(dt) => Value::String(dt.format("%Y-%m-%d").to_string()),
            AttributeValue::Array(items) => {
                let joined = items
                    .iter()
                    .map(display_element)
                    .collect::<Vec<_>>()
                    .join(", ");
                Value::String(joined)
            }
            other => other.to_json(),
        }
    }

    /// Validates a candidate value: required check, kind conformance,
    /// metadata constraints, then custom validators in order. Errors are
    /// collected, never propagated.
    #[must_use]
    pub fn validate(&self, value: &AttributeValue) -> ValidationReport {
        let mut errors = Vec::new();

        if self.metadata.required && value.is_empty() {
            errors.push(format!("{} is required", self.name));
        }

        self.check_kind(value, &mut errors);
        self.check_constraints(value, &mut errors);

        for validator in &self.validators {
            if let Err(message) = validator(value, self) {
                errors.push(message);
            }
        }

        ValidationReport {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    fn check_kind(&self, value: &AttributeValue, errors: &mut Vec<String>) {
        if matches!(value, AttributeValue::Null) {
            return;
        }
        let ok = match &self.kind {
            ValueKind::Text => matches!(value, AttributeValue::Text(_)),
            ValueKind::Number => match value {
                AttributeValue::Number(f) => f.is_finite(),
                AttributeValue::Integer(_) => true,
                _ => false,
            },
            ValueKind::Integer => match value {
                AttributeValue::Integer(_) => true,
                AttributeValue::Number(f) => f.is_finite() && f.fract() == 0.0,
                _ => false,
            },
            ValueKind::Boolean => matches!(value, AttributeValue::Boolean(_)),
            // An empty string is an unset cell, not a malformed address.
            ValueKind::Email => match value {
                AttributeValue::Email(s) => s.is_empty() || parse::is_email(s),
                _ => false,
            },
            ValueKind::Url => match value {
                AttributeValue::Url(s) => s.is_empty() || parse::is_url(s),
                _ => false,
            },
            ValueKind::Date => match value {
                AttributeValue::Date(_) => true,
                AttributeValue::Text(s) => parse::parse_date(s).is_some(),
                _ => false,
            },
            ValueKind::Array => matches!(value, AttributeValue::Array(_)),
            ValueKind::Object => matches!(value, AttributeValue::Object(_)),
            ValueKind::Custom(_) => true,
        };
        if !ok {
            errors.push(match &self.kind {
                ValueKind::Text => format!("{} must be a string", self.name),
                ValueKind::Number => format!("{} must be a valid number", self.name),
                ValueKind::Integer => format!("{} must be an integer", self.name),
                ValueKind::Boolean => format!("{} must be true or false", self.name),
                ValueKind::Email => format!("{} must be a valid email address", self.name),
                ValueKind::Url => format!("{} must be a valid URL", self.name),
                ValueKind::Date => format!("{} must be a valid date", self.name),
                ValueKind::Array => format!("{} must be an array", self.name),
                ValueKind::Object => format!("{} must be an object", self.name),
                ValueKind::Custom(_) => String::new(),
            });
        }
    }

    fn check_constraints(&self, value: &AttributeValue, errors: &mut Vec<String>) {
        if let Some(s) = value.as_str() {
            if let Some(max) = self.metadata.max_length {
                if s.chars().count() > max {
                    errors.push(format!("{} cannot exceed {} characters", self.name, max));
                }
            }
            if let Some(min) = self.metadata.min_length {
                if s.chars().count() < min {
                    errors.push(format!("{} must have at least {} characters", self.name, min));
                }
            }
            if let Some(pattern) = &self.metadata.pattern {
                match regex::Regex::new(pattern) {
                    Ok(re) => {
                        if !re.is_match(s) {
                            errors.push(format!("{} does not match the required format", self.name));
                        }
                    }
                    Err(_) => {
                        errors.push(format!(
                            "{} has an invalid pattern constraint",
                            self.name
                        ));
                    }
                }
            }
        }
        if let Some(n) = value.as_f64() {
            if let Some(min) = self.metadata.min {
                if n < min {
                    errors.push(format!("{} must be at least {}", self.name, min));
                }
            }
            if let Some(max) = self.metadata.max {
                if n > max {
                    errors.push(format!("{} cannot exceed {}", self.name, max));
                }
            }
        }
    }

    /// Runs the coercion pipeline: kind-specific conversion, then custom
    /// transformers in order. Transformer failures are logged and skipped.
    #[must_use]
    pub fn transform(&self, input: Value) -> AttributeValue {
        let mut value = self.coerce(input);
        for transformer in &self.transformers {
            match transformer(value.clone(), self) {
                Ok(next) => value = next,
                Err(message) => {
                    tracing::warn!(
                        attribute = %self.name,
                        %message,
                        "transformer failed; keeping previous value"
                    );
                }
            }
        }
        value
    }

    fn coerce(&self, input: Value) -> AttributeValue {
        if input.is_null() {
            return AttributeValue::Null;
        }
        match &self.kind {
            ValueKind::Number => match input {
                Value::String(s) => {
                    if s.trim().is_empty() {
                        AttributeValue::Text(s)
                    } else {
                        match parse::parse_float_prefix(&s) {
                            Some(f) => AttributeValue::Number(f),
                            None => AttributeValue::Text(s),
                        }
                    }
                }
                v => AttributeValue::from_json(&self.kind, v),
            },
            ValueKind::Integer => match input {
                Value::String(s) => {
                    if s.trim().is_empty() {
                        AttributeValue::Text(s)
                    } else {
                        // Truncating parse: "3.9" commits as 3.
                        match parse::parse_integer_prefix(&s) {
                            Some(i) => AttributeValue::Integer(i),
                            None => AttributeValue::Text(s),
                        }
                    }
                }
                v => AttributeValue::from_json(&self.kind, v),
            },
            ValueKind::Boolean => match input {
                Value::String(s) => {
                    AttributeValue::Boolean(s.to_lowercase() == "true" || s == "1")
                }
                v => AttributeValue::from_json(&self.kind, v),
            },
            ValueKind::Date => match input {
                Value::String(s) => match parse::parse_date(&s) {
                    Some(dt) => AttributeValue::Date(dt),
                    None => AttributeValue::Text(s),
                },
                v => AttributeValue::from_json_loose(v),
            },
            kind if kind.is_string_family() => {
                let s = stringify_trimmed(input);
                match kind {
                    ValueKind::Email => AttributeValue::Email(s),
                    ValueKind::Url => AttributeValue::Url(s),
                    _ => AttributeValue::Text(s),
                }
            }
            _ => AttributeValue::from_json(&self.kind, input),
        }
    }

    /// Whether the stored value counts as unset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Restores the explicit metadata default, or the kind's intrinsic
    /// default. Goes through [`Attribute::set_value`] with notification.
    pub fn reset(&mut self) -> bool {
        let default = self
            .metadata
            .default_value
            .clone()
            .unwrap_or_else(|| self.kind.default_json());
        self.set_value(default, &SetValueOptions::default())
            .unwrap_or(false)
    }

    /// The serializable shape of this attribute.
    #[must_use]
    pub fn to_data(&self) -> AttributeData {
        AttributeData {
            name: self.name.clone(),
            value: self.value.to_json(),
            kind: self.kind.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Serializes to the `{name, value, type, metadata}` JSON shape.
    pub fn serialize(&self) -> ModelResult<Value> {
        Ok(serde_json::to_value(self.to_data())?)
    }

    /// Rebuilds an attribute from its serialized data.
    #[must_use]
    pub fn from_data(data: AttributeData) -> Self {
        Self::new(data.name, data.value, data.kind, data.metadata)
    }

    /// Rebuilds an attribute from serialized JSON. Malformed payloads are
    /// a hard error.
    pub fn deserialize(value: Value) -> ModelResult<Self> {
        let data: AttributeData = serde_json::from_value(value)?;
        Ok(Self::from_data(data))
    }
}

impl Clone for Attribute {
    /// Structural clone via the serialized shape: name, value, kind and
    /// metadata survive; custom validators and transformers do not.
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind.clone(),
            value: self.value.clone(),
            metadata: self.metadata.clone(),
            validators: Vec::new(),
            transformers: Vec::new(),
            sink: self.sink.clone(),
        }
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("required", &self.metadata.required)
            .field("validators", &self.validators.len())
            .field("transformers", &self.transformers.len())
            .finish()
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Attribute({}: {} = {})",
            self.name,
            self.kind,
            self.value.to_json()
        )
    }
}

fn display_element(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn stringify_trimmed(value: Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(&other).unwrap_or_default(),
    }
}
