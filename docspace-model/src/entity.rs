//! A dynamically-typed record composed of attributes.
//!
//! Attributes are created explicitly or discovered lazily the first time
//! they are requested (kind inferred from context). Every mutation emits a
//! local event; listeners run synchronously in registration order and a
//! copy of every emission goes to the external sink.

use crate::attribute::{
    Attribute, AttributeData, AttributeMetadata, AttributeSource, SetValueOptions,
};
use crate::error::{ModelError, ModelResult};
use chrono::{DateTime, Utc};
use docspace_types::{EntityId, SharedSink, ValueKind, infer_kind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

/// Entity-level metadata. Unknown keys survive round trips via `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMetadata {
    #[serde(default)]
    pub source: AttributeSource,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for EntityMetadata {
    fn default() -> Self {
        Self {
            source: AttributeSource::User,
            tags: Vec::new(),
            description: String::new(),
            extra: serde_json::Map::new(),
        }
    }
}

/// A local entity event, delivered to listeners and the sink.
#[derive(Debug, Clone)]
pub struct EntityEvent {
    pub entity_id: EntityId,
    pub entity_type: String,
    pub kind: EntityEventKind,
}

/// What happened.
#[derive(Debug, Clone)]
pub enum EntityEventKind {
    /// An attribute came into existence; carries its serialized shape.
    AttributeCreated { name: String, attribute: Value },
    /// A committed value actually changed. `old_value`/`new_value` are
    /// display projections; `new_raw` is the raw committed value.
    AttributeChanged {
        name: String,
        old_value: Value,
        new_value: Value,
        new_raw: Value,
    },
    /// An attribute was removed; carries its last serialized shape.
    AttributeRemoved { name: String, attribute: Value },
    MetadataUpdated { metadata: Value },
    TagAdded { tag: String },
    TagRemoved { tag: String },
}

impl EntityEvent {
    /// The event name listeners register under.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self.kind {
            EntityEventKind::AttributeCreated { .. } => "attribute:created",
            EntityEventKind::AttributeChanged { .. } => "attribute:changed",
            EntityEventKind::AttributeRemoved { .. } => "attribute:removed",
            EntityEventKind::MetadataUpdated { .. } => "metadata:updated",
            EntityEventKind::TagAdded { .. } => "tag:added",
            EntityEventKind::TagRemoved { .. } => "tag:removed",
        }
    }

    /// The sink payload for this event.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut payload = serde_json::Map::new();
        payload.insert("entityId".into(), Value::String(self.entity_id.to_string()));
        payload.insert("entityType".into(), Value::String(self.entity_type.clone()));
        match &self.kind {
            EntityEventKind::AttributeCreated { name, attribute } => {
                payload.insert("attributeName".into(), Value::String(name.clone()));
                payload.insert("attribute".into(), attribute.clone());
            }
            EntityEventKind::AttributeChanged {
                name,
                old_value,
                new_value,
                ..
            } => {
                payload.insert("attributeName".into(), Value::String(name.clone()));
                payload.insert("oldValue".into(), old_value.clone());
                payload.insert("newValue".into(), new_value.clone());
            }
            EntityEventKind::AttributeRemoved { name, attribute } => {
                payload.insert("attributeName".into(), Value::String(name.clone()));
                payload.insert("attribute".into(), attribute.clone());
            }
            EntityEventKind::MetadataUpdated { metadata } => {
                payload.insert("metadata".into(), metadata.clone());
            }
            EntityEventKind::TagAdded { tag } | EntityEventKind::TagRemoved { tag } => {
                payload.insert("tag".into(), Value::String(tag.clone()));
            }
        }
        payload.insert("timestamp".into(), serde_json::json!(Utc::now()));
        Value::Object(payload)
    }
}

/// Token for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Local event listener. Failures are logged and isolated; they never
/// prevent later listeners from running.
pub type EntityListener = Rc<dyn Fn(&EntityEvent) -> Result<(), String>>;

/// Outcome of validating a whole entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Structural diff between two entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<AttributeChange>,
}

/// One changed attribute in a diff, with display-projected values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    pub name: String,
    pub old_value: Value,
    pub new_value: Value,
}

/// Options for [`Entity::apply_changes`]: three independent merge passes.
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    pub overwrite_existing: bool,
    pub add_new: bool,
    pub remove_deleted: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            overwrite_existing: true,
            add_new: true,
            remove_deleted: false,
        }
    }
}

/// Aggregate numbers about an entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityStats {
    pub id: EntityId,
    pub entity_type: String,
    pub attribute_count: usize,
    pub kind_distribution: HashMap<String, usize>,
    pub required_count: usize,
    pub empty_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

/// Serialized entity shape:
/// `{id, type, attributes, createdAt, updatedAt, schemaVersion, metadata}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityData {
    id: EntityId,
    #[serde(rename = "type")]
    entity_type: String,
    attributes: BTreeMap<String, AttributeData>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    schema_version: u32,
    #[serde(default)]
    metadata: EntityMetadata,
}

fn default_schema_version() -> u32 {
    1
}

/// A record with a free-form type tag and dynamically discovered,
/// exclusively owned attributes.
pub struct Entity {
    id: EntityId,
    entity_type: String,
    attributes: HashMap<String, Attribute>,
    /// Attribute insertion order; `attribute_names` and iteration follow it.
    order: Vec<String>,
    pub metadata: EntityMetadata,
    schema_version: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    listeners: HashMap<String, Vec<(ListenerId, EntityListener)>>,
    next_listener_id: u64,
    sink: Option<SharedSink>,
}

impl Entity {
    /// Creates an entity with a generated id.
    #[must_use]
    pub fn new(entity_type: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let id = EntityId::generate(&entity_type);
        Self::with_id(entity_type, id)
    }

    /// Creates an entity with an explicit id.
    #[must_use]
    pub fn with_id(entity_type: impl Into<String>, id: EntityId) -> Self {
        let now = Utc::now();
        Self {
            id,
            entity_type: entity_type.into(),
            attributes: HashMap::new(),
            order: Vec::new(),
            metadata: EntityMetadata::default(),
            schema_version: 1,
            created_at: now,
            updated_at: now,
            listeners: HashMap::new(),
            next_listener_id: 0,
            sink: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Routes this entity's (and its attributes') notifications to a sink.
    pub fn set_sink(&mut self, sink: SharedSink) {
        for attribute in self.attributes.values_mut() {
            attribute.set_sink(sink.clone());
        }
        self.sink = Some(sink);
    }

    // ── Local events ─────────────────────────────────────────────

    /// Registers a listener for a local event name.
    pub fn on(
        &mut self,
        event: &str,
        listener: impl Fn(&EntityEvent) -> Result<(), String> + 'static,
    ) -> ListenerId {
        self.next_listener_id += 1;
        let id = ListenerId(self.next_listener_id);
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push((id, Rc::new(listener)));
        id
    }

    /// Removes a listener. Removing twice is a no-op.
    pub fn off(&mut self, event: &str, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(listener_id, _)| *listener_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.listeners.remove(event);
        }
        removed
    }

    /// Delivers an event to local listeners (registration order, failures
    /// isolated) and re-broadcasts it to the sink as `entity:{event}`.
    pub fn emit(&self, event: &EntityEvent) {
        let name = event.name();
        let snapshot: Vec<EntityListener> = self
            .listeners
            .get(name)
            .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        tracing::debug!(entity = %self.id, event = name, listeners = snapshot.len(), "emit");
        for listener in snapshot {
            if let Err(message) = listener(event) {
                tracing::error!(entity = %self.id, event = name, %message, "listener failed");
            }
        }
        if let Some(sink) = &self.sink {
            sink.publish(&format!("entity:{name}"), &event.to_json());
        }
    }

    fn event(&self, kind: EntityEventKind) -> EntityEvent {
        EntityEvent {
            entity_id: self.id.clone(),
            entity_type: self.entity_type.clone(),
            kind,
        }
    }

    // ── Attribute access ─────────────────────────────────────────

    /// Returns the attribute, creating it on first request
    /// (auto-discovery: text kind, no value) and emitting
    /// `attribute:created`.
    pub fn get_attribute(&mut self, name: &str) -> &mut Attribute {
        if !self.attributes.contains_key(name) {
            let metadata = AttributeMetadata::with_source(AttributeSource::AutoDiscovery);
            self.insert_attribute(Attribute::new(name, Value::Null, ValueKind::Text, metadata));
        }
        self.attributes
            .get_mut(name)
            .expect("attribute just ensured")
    }

    /// Returns the attribute if present; never creates.
    #[must_use]
    pub fn get_attribute_opt(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    fn insert_attribute(&mut self, mut attribute: Attribute) {
        if let Some(sink) = &self.sink {
            attribute.set_sink(sink.clone());
        }
        let name = attribute.name().to_string();
        let payload = attribute.serialize().unwrap_or(Value::Null);
        self.order.push(name.clone());
        self.attributes.insert(name.clone(), attribute);
        self.updated_at = Utc::now();
        let event = self.event(EntityEventKind::AttributeCreated {
            name,
            attribute: payload,
        });
        self.emit(&event);
    }

    /// Create-or-update. New attributes get metadata source `entity` and an
    /// `attribute:created` event. The value goes through the attribute's
    /// own pipeline with its notification suppressed — the entity controls
    /// emission, and `attribute:changed` fires only when the display value
    /// actually changed, so repeated identical writes stay silent.
    pub fn set_attribute(
        &mut self,
        name: &str,
        value: Value,
        kind: ValueKind,
        metadata: AttributeMetadata,
    ) -> bool {
        let old_display = if self.attributes.contains_key(name) {
            self.attributes
                .get(name)
                .map(|a| a.display_value())
                .unwrap_or(Value::Null)
        } else {
            let mut meta = metadata;
            meta.source = AttributeSource::Entity;
            self.insert_attribute(Attribute::new(name, Value::Null, kind, meta));
            Value::Null
        };

        let (success, changed) = {
            let Some(attribute) = self.attributes.get_mut(name) else {
                return false;
            };
            let options = SetValueOptions {
                notify: false,
                throw_on_error: false,
            };
            match attribute.set_value(value, &options) {
                Ok(true) => {
                    let new_display = attribute.display_value();
                    let new_raw = attribute.value().to_json();
                    let changed =
                        (old_display != new_display).then_some((new_display, new_raw));
                    (true, changed)
                }
                _ => (false, None),
            }
        };

        if success {
            self.updated_at = Utc::now();
            if let Some((new_value, new_raw)) = changed {
                let event = self.event(EntityEventKind::AttributeChanged {
                    name: name.to_string(),
                    old_value: old_display,
                    new_value,
                    new_raw,
                });
                self.emit(&event);
            }
        }
        success
    }

    /// Shorthand set with the kind inferred from the value.
    pub fn set_attribute_value(&mut self, name: &str, value: Value) -> bool {
        let kind = infer_kind(&value);
        self.set_attribute(name, value, kind, AttributeMetadata::default())
    }

    /// The display value of an attribute, creating it on demand.
    pub fn get_attribute_value(&mut self, name: &str) -> Value {
        self.get_attribute(name).display_value()
    }

    /// Removes an attribute, emitting `attribute:removed`.
    pub fn remove_attribute(&mut self, name: &str) -> bool {
        match self.attributes.remove(name) {
            Some(attribute) => {
                self.order.retain(|n| n != name);
                self.updated_at = Utc::now();
                let payload = attribute.serialize().unwrap_or(Value::Null);
                let event = self.event(EntityEventKind::AttributeRemoved {
                    name: name.to_string(),
                    attribute: payload,
                });
                self.emit(&event);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Attribute names in insertion order.
    #[must_use]
    pub fn attribute_names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Attributes in insertion order.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.order
            .iter()
            .filter_map(|name| self.attributes.get(name))
    }

    #[must_use]
    pub fn attributes_by_kind(&self, kind: &ValueKind) -> Vec<&Attribute> {
        self.attributes().filter(|a| a.kind() == kind).collect()
    }

    #[must_use]
    pub fn required_attributes(&self) -> Vec<&Attribute> {
        self.attributes().filter(|a| a.metadata.required).collect()
    }

    #[must_use]
    pub fn empty_attributes(&self) -> Vec<&Attribute> {
        self.attributes().filter(|a| a.is_empty()).collect()
    }

    // ── Validation ───────────────────────────────────────────────

    /// Validates every attribute plus the required-and-empty check.
    #[must_use]
    pub fn validate(&self) -> EntityValidation {
        let mut errors = Vec::new();
        for attribute in self.attributes() {
            let report = attribute.validate(attribute.value());
            if !report.is_valid {
                errors.extend(report.errors);
            }
        }
        for attribute in self.required_attributes() {
            if attribute.is_empty() {
                errors.push(format!("{} is required", attribute.name()));
            }
        }
        EntityValidation {
            is_valid: errors.is_empty(),
            errors,
            warnings: Vec::new(),
        }
    }

    // ── Metadata ─────────────────────────────────────────────────

    /// Replaces entity metadata and emits `metadata:updated`.
    pub fn update_metadata(&mut self, metadata: EntityMetadata) {
        self.metadata = metadata;
        self.updated_at = Utc::now();
        let payload = serde_json::to_value(&self.metadata).unwrap_or(Value::Null);
        let event = self.event(EntityEventKind::MetadataUpdated { metadata: payload });
        self.emit(&event);
    }

    /// Adds a tag if absent.
    pub fn add_tag(&mut self, tag: &str) {
        if !self.has_tag(tag) {
            self.metadata.tags.push(tag.to_string());
            self.updated_at = Utc::now();
            let event = self.event(EntityEventKind::TagAdded {
                tag: tag.to_string(),
            });
            self.emit(&event);
        }
    }

    /// Removes a tag if present.
    pub fn remove_tag(&mut self, tag: &str) {
        let before = self.metadata.tags.len();
        self.metadata.tags.retain(|t| t != tag);
        if self.metadata.tags.len() != before {
            self.updated_at = Utc::now();
            let event = self.event(EntityEventKind::TagRemoved {
                tag: tag.to_string(),
            });
            self.emit(&event);
        }
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata.tags.iter().any(|t| t == tag)
    }

    // ── Diff & merge ─────────────────────────────────────────────

    /// Structural diff against another entity, over display values.
    #[must_use]
    pub fn compare(&self, other: &Entity) -> EntityDiff {
        let mut diff = EntityDiff::default();
        for name in other.attribute_names() {
            if !self.has_attribute(name) {
                diff.added.push(name.to_string());
            }
        }
        for name in self.attribute_names() {
            let Some(theirs) = other.get_attribute_opt(name) else {
                diff.removed.push(name.to_string());
                continue;
            };
            let Some(ours) = self.get_attribute_opt(name) else {
                continue;
            };
            let old_value = ours.display_value();
            let new_value = theirs.display_value();
            if old_value != new_value {
                diff.changed.push(AttributeChange {
                    name: name.to_string(),
                    old_value,
                    new_value,
                });
            }
        }
        diff
    }

    /// Applies another entity's attributes in three independent passes:
    /// add new, overwrite existing, optionally remove deleted. Finishes
    /// with a metadata merge.
    pub fn apply_changes(&mut self, other: &Entity, options: &MergeOptions) {
        if options.add_new {
            for attribute in other.attributes() {
                if !self.has_attribute(attribute.name()) {
                    self.set_attribute(
                        attribute.name(),
                        attribute.value().to_json(),
                        attribute.kind().clone(),
                        attribute.metadata.clone(),
                    );
                }
            }
        }

        if options.overwrite_existing {
            for attribute in other.attributes() {
                if self.has_attribute(attribute.name()) {
                    self.set_attribute_value(attribute.name(), attribute.value().to_json());
                }
            }
        }

        if options.remove_deleted {
            let stale: Vec<String> = self
                .attribute_names()
                .into_iter()
                .filter(|name| !other.has_attribute(name))
                .map(str::to_string)
                .collect();
            for name in stale {
                self.remove_attribute(&name);
            }
        }

        self.update_metadata(other.metadata.clone());
    }

    // ── Serialization ────────────────────────────────────────────

    /// Serializes to the entity JSON shape.
    pub fn serialize(&self) -> ModelResult<Value> {
        let attributes: BTreeMap<String, AttributeData> = self
            .attributes()
            .map(|a| (a.name().to_string(), a.to_data()))
            .collect();
        let data = EntityData {
            id: self.id.clone(),
            entity_type: self.entity_type.clone(),
            attributes,
            created_at: self.created_at,
            updated_at: self.updated_at,
            schema_version: self.schema_version,
            metadata: self.metadata.clone(),
        };
        Ok(serde_json::to_value(data)?)
    }

    /// Rebuilds an entity from its serialized shape. Malformed payloads
    /// are a hard error.
    pub fn deserialize(value: Value) -> ModelResult<Self> {
        let data: EntityData = serde_json::from_value(value)?;
        let mut entity = Entity::with_id(data.entity_type, data.id);
        entity.created_at = data.created_at;
        entity.updated_at = data.updated_at;
        entity.schema_version = data.schema_version;
        entity.metadata = data.metadata;
        for (name, attr_data) in data.attributes {
            entity.order.push(name.clone());
            entity.attributes.insert(name, Attribute::from_data(attr_data));
        }
        Ok(entity)
    }

    /// Structural copy with a fresh (or given) id and fresh timestamps.
    /// Listeners and sink wiring do not carry over.
    pub fn duplicate(&self, new_id: Option<EntityId>) -> ModelResult<Entity> {
        let mut copy = Entity::deserialize(self.serialize()?)?;
        copy.id = new_id.unwrap_or_else(|| EntityId::generate(&self.entity_type));
        let now = Utc::now();
        copy.created_at = now;
        copy.updated_at = now;
        Ok(copy)
    }

    /// Aggregate numbers about this entity.
    #[must_use]
    pub fn stats(&self) -> EntityStats {
        let mut kind_distribution: HashMap<String, usize> = HashMap::new();
        for attribute in self.attributes() {
            *kind_distribution
                .entry(attribute.kind().name().to_string())
                .or_insert(0) += 1;
        }
        EntityStats {
            id: self.id.clone(),
            entity_type: self.entity_type.clone(),
            attribute_count: self.attributes.len(),
            kind_distribution,
            required_count: self.required_attributes().len(),
            empty_count: self.empty_attributes().len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            tags: self.metadata.tags.clone(),
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("type", &self.entity_type)
            .field("attributes", &self.order)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Entity({}#{}, {} attributes)",
            self.entity_type,
            self.id,
            self.attributes.len()
        )
    }
}
