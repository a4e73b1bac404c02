//! Identifier types used throughout the docspace core.
//!
//! Entity ids are human-readable strings of the form
//! `{type}_{timestamp}_{random}` so that persisted documents stay
//! greppable. Attribute keys are the composite `{entityId}::{attributeName}`
//! format the registry and any external index rely on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const KEY_SEPARATOR: &str = "::";

/// Unique identifier for an entity.
///
/// Generated ids embed the entity type, a base-36 millisecond timestamp and
/// a short random suffix, e.g. `task_m1x2y3z4_a9f3k`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Generates a fresh id for the given entity type.
    #[must_use]
    pub fn generate(entity_type: &str) -> Self {
        let prefix = if entity_type.is_empty() {
            "entity".to_string()
        } else {
            entity_type.to_lowercase()
        };
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self(format!(
            "{}_{}_{}",
            prefix,
            to_base36(millis),
            random_suffix()
        ))
    }

    /// Wraps an existing id string.
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Composite key addressing one attribute of one entity: `{entityId}::{name}`.
///
/// The format is stable; external indexes may rely on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeKey(String);

impl AttributeKey {
    /// Builds the key for an entity id / attribute name pair.
    #[must_use]
    pub fn new(entity_id: &str, attribute_name: &str) -> Self {
        Self(format!("{entity_id}{KEY_SEPARATOR}{attribute_name}"))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the key back into `(entity_id, attribute_name)`.
    ///
    /// Splits on the first `::`, so attribute names may themselves
    /// contain the separator.
    #[must_use]
    pub fn parts(&self) -> Option<(&str, &str)> {
        self.0.split_once(KEY_SEPARATOR)
    }

    /// The entity-id half of the key.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.parts().map(|(id, _)| id)
    }

    /// The attribute-name half of the key.
    #[must_use]
    pub fn attribute_name(&self) -> Option<&str> {
        self.parts().map(|(_, name)| name)
    }

    /// The prefix matching every key of the given entity.
    #[must_use]
    pub fn entity_prefix(entity_id: &str) -> String {
        format!("{entity_id}{KEY_SEPARATOR}")
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AttributeKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

fn random_suffix() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    let n = u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]);
    let digits = to_base36(n);
    digits[..5.min(digits.len())].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_carries_type_prefix() {
        let id = EntityId::generate("Task");
        assert!(id.as_str().starts_with("task_"));
        assert_eq!(id.as_str().split('_').count(), 3);
    }

    #[test]
    fn empty_type_falls_back_to_entity() {
        let id = EntityId::generate("");
        assert!(id.as_str().starts_with("entity_"));
    }

    #[test]
    fn attribute_key_round_trips() {
        let key = AttributeKey::new("task_1", "title");
        assert_eq!(key.as_str(), "task_1::title");
        assert_eq!(key.parts(), Some(("task_1", "title")));
    }

    #[test]
    fn attribute_key_splits_on_first_separator() {
        let key = AttributeKey::new("e1", "a::b");
        assert_eq!(key.entity_id(), Some("e1"));
        assert_eq!(key.attribute_name(), Some("a::b"));
    }
}
