//! Subscription tokens and the notification payload delivered to
//! subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::rc::Rc;

/// The single argument every subscriber receives.
///
/// Which optional fields are present depends on the event: attribute
/// changes carry entity id, type, attribute name and old/new display
/// values; registration events carry the serialized object in `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    /// Event-specific extra payload (serialized attribute/entity,
    /// batch summary).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl ChangeNotification {
    /// A bare notification of the given event type, stamped now.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            entity_id: None,
            entity_type: None,
            attribute_name: None,
            old_value: None,
            new_value: None,
            payload: Value::Null,
            timestamp: Utc::now(),
        }
    }
}

/// Subscriber callback. `Err` is logged and isolated; sibling subscribers
/// still run.
pub type ChangeCallback = Rc<dyn Fn(&ChangeNotification) -> Result<(), String>>;

/// Which of the four notification scopes a subscription belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Tier {
    Attribute,
    Entity,
    EntityType,
    Global,
}

/// Opaque handle for one subscription; pass it back to
/// `AttributeSpace::unsubscribe`. Unsubscribing twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub(crate) tier: Tier,
    pub(crate) key: Option<String>,
    pub(crate) id: u64,
}
