//! The process-wide attribute registry and change router.
//!
//! Entities are moved into the space at registration; from then on the
//! space is the root they are reached through. Registration installs
//! forwarders on the entity's local events, so any mutation made through
//! `entity_mut` propagates automatically through the four subscription
//! tiers in fixed order: attribute, entity, type, global, then the
//! external sink.
//!
//! Router state (subscriber sets, history, the composite-key index) lives
//! behind an `Rc` so the forwarders installed on entities can reach it.
//! The engine is single-threaded; subscriber lists are snapshotted before
//! invocation so callbacks may subscribe and unsubscribe reentrantly.

use crate::batch::Batch;
use crate::error::{SpaceError, SpaceResult};
use crate::history::{ChangeRecord, HistoryFilter};
use crate::subscription::{ChangeCallback, ChangeNotification, Subscription, Tier};
use chrono::{DateTime, Utc};
use docspace_model::{Attribute, Entity, EntityEventKind};
use docspace_types::{AttributeKey, SharedSink, ValueKind, null_sink};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

const DEFAULT_HISTORY_CAP: usize = 1000;

pub(crate) struct SubscriberEntry {
    id: u64,
    callback: ChangeCallback,
}

/// Router state shared with the forwarders installed on registered
/// entities.
pub(crate) struct SpaceShared {
    /// Composite key → attribute snapshot, refreshed on every change
    /// event. Covers imported attributes that have no backing entity.
    index: RefCell<HashMap<String, Attribute>>,
    attribute_subs: RefCell<HashMap<String, Vec<SubscriberEntry>>>,
    entity_subs: RefCell<HashMap<String, Vec<SubscriberEntry>>>,
    type_subs: RefCell<HashMap<String, Vec<SubscriberEntry>>>,
    global_subs: RefCell<Vec<SubscriberEntry>>,
    history: RefCell<VecDeque<ChangeRecord>>,
    history_cap: usize,
    suppressed: Cell<bool>,
    sink: RefCell<SharedSink>,
    next_subscription: Cell<u64>,
}

impl SpaceShared {
    fn new(history_cap: usize) -> Self {
        Self {
            index: RefCell::new(HashMap::new()),
            attribute_subs: RefCell::new(HashMap::new()),
            entity_subs: RefCell::new(HashMap::new()),
            type_subs: RefCell::new(HashMap::new()),
            global_subs: RefCell::new(Vec::new()),
            history: RefCell::new(VecDeque::new()),
            history_cap,
            suppressed: Cell::new(false),
            sink: RefCell::new(null_sink()),
            next_subscription: Cell::new(0),
        }
    }

    fn next_id(&self) -> u64 {
        let id = self.next_subscription.get() + 1;
        self.next_subscription.set(id);
        id
    }

    /// Swaps the suppression flag, returning the previous state.
    pub(crate) fn set_suppressed(&self, suppressed: bool) -> bool {
        self.suppressed.replace(suppressed)
    }

    /// The central fan-out. Order is fixed: history, attribute tier,
    /// entity tier, type tier, global tier, sink. Suppression (during a
    /// batch) skips the tiers and the sink but still records history.
    pub(crate) fn notify(&self, note: ChangeNotification) {
        {
            let mut history = self.history.borrow_mut();
            history.push_back(ChangeRecord::of(&note));
            while history.len() > self.history_cap {
                history.pop_front();
            }
        }
        if self.suppressed.get() {
            return;
        }

        if let (Some(entity_id), Some(attribute_name)) = (&note.entity_id, &note.attribute_name) {
            let key = AttributeKey::new(entity_id, attribute_name);
            self.invoke(self.snapshot(&self.attribute_subs, key.as_str()), &note);
        }
        if let Some(entity_id) = &note.entity_id {
            self.invoke(self.snapshot(&self.entity_subs, entity_id), &note);
        }
        if let Some(entity_type) = &note.entity_type {
            self.invoke(self.snapshot(&self.type_subs, entity_type), &note);
        }
        let globals: Vec<ChangeCallback> = self
            .global_subs
            .borrow()
            .iter()
            .map(|entry| entry.callback.clone())
            .collect();
        self.invoke(globals, &note);

        let payload = serde_json::to_value(&note).unwrap_or(Value::Null);
        let sink = self.sink.borrow().clone();
        sink.publish(&format!("attributespace:{}", note.event_type), &payload);
    }

    fn snapshot(
        &self,
        map: &RefCell<HashMap<String, Vec<SubscriberEntry>>>,
        key: &str,
    ) -> Vec<ChangeCallback> {
        map.borrow()
            .get(key)
            .map(|entries| entries.iter().map(|e| e.callback.clone()).collect())
            .unwrap_or_default()
    }

    fn invoke(&self, callbacks: Vec<ChangeCallback>, note: &ChangeNotification) {
        for callback in callbacks {
            if let Err(message) = callback(note) {
                tracing::error!(
                    event = %note.event_type,
                    %message,
                    "subscriber callback failed"
                );
            }
        }
    }

    /// Indexes an attribute snapshot and announces the registration.
    pub(crate) fn register_attribute(&self, entity_id: &str, attribute: &Attribute) {
        let key = AttributeKey::new(entity_id, attribute.name());
        self.index
            .borrow_mut()
            .insert(key.as_str().to_string(), attribute.clone());

        let mut note = ChangeNotification::new("attribute:registered");
        note.entity_id = Some(entity_id.to_string());
        note.attribute_name = Some(attribute.name().to_string());
        note.payload = attribute.serialize().unwrap_or(Value::Null);
        self.notify(note);
    }

    /// Drops an attribute from the index together with its dedicated
    /// subscriber set; announces the removal if it was present.
    pub(crate) fn unregister_attribute(&self, entity_id: &str, attribute_name: &str) -> bool {
        let key = AttributeKey::new(entity_id, attribute_name);
        let removed = self.index.borrow_mut().remove(key.as_str());
        self.attribute_subs.borrow_mut().remove(key.as_str());

        match removed {
            Some(attribute) => {
                let mut note = ChangeNotification::new("attribute:unregistered");
                note.entity_id = Some(entity_id.to_string());
                note.attribute_name = Some(attribute_name.to_string());
                note.payload = attribute.serialize().unwrap_or(Value::Null);
                self.notify(note);
                true
            }
            None => false,
        }
    }

    /// Refreshes the indexed snapshot's value after a change event.
    fn refresh_index_value(&self, key: &str, new_raw: &Value) {
        let mut index = self.index.borrow_mut();
        if let Some(snapshot) = index.get(key) {
            let mut data = snapshot.to_data();
            data.value = new_raw.clone();
            index.insert(key.to_string(), Attribute::from_data(data));
        }
    }

    fn subscribe_keyed(
        &self,
        map: &RefCell<HashMap<String, Vec<SubscriberEntry>>>,
        tier: Tier,
        key: String,
        callback: ChangeCallback,
    ) -> Subscription {
        let id = self.next_id();
        map.borrow_mut()
            .entry(key.clone())
            .or_default()
            .push(SubscriberEntry { id, callback });
        Subscription {
            tier,
            key: Some(key),
            id,
        }
    }

    pub(crate) fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let map = match subscription.tier {
            Tier::Global => {
                let mut subs = self.global_subs.borrow_mut();
                let before = subs.len();
                subs.retain(|entry| entry.id != subscription.id);
                return subs.len() != before;
            }
            Tier::Attribute => &self.attribute_subs,
            Tier::Entity => &self.entity_subs,
            Tier::EntityType => &self.type_subs,
        };
        let Some(key) = &subscription.key else {
            return false;
        };
        let mut map = map.borrow_mut();
        let Some(entries) = map.get_mut(key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != subscription.id);
        let removed = entries.len() != before;
        // prune empty sets so the maps cannot grow without bound
        if entries.is_empty() {
            map.remove(key);
        }
        removed
    }
}

/// Serialized registry state: the attribute map plus history.
#[derive(Debug, Serialize, Deserialize)]
struct SpaceExport {
    attributes: BTreeMap<String, Value>,
    #[serde(default)]
    stats: Value,
    #[serde(default)]
    history: Vec<ChangeRecord>,
    timestamp: DateTime<Utc>,
}

/// Aggregate numbers about the registry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceStats {
    pub total_attributes: usize,
    pub total_subscriptions: usize,
    pub entity_subscriptions: usize,
    pub type_subscriptions: usize,
    pub global_subscriptions: usize,
    pub kind_distribution: HashMap<String, usize>,
    pub entity_distribution: HashMap<String, usize>,
    pub history_size: usize,
}

/// The process-wide registry of entities and attributes, and the router
/// that fans their changes out to subscribers.
pub struct AttributeSpace {
    entities: HashMap<String, Entity>,
    shared: Rc<SpaceShared>,
}

impl Default for AttributeSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeSpace {
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAP)
    }

    /// A registry whose change history holds at most `cap` entries.
    #[must_use]
    pub fn with_history_capacity(cap: usize) -> Self {
        Self {
            entities: HashMap::new(),
            shared: Rc::new(SpaceShared::new(cap)),
        }
    }

    /// Routes a copy of every registry notification to the external sink.
    pub fn set_sink(&self, sink: SharedSink) {
        *self.shared.sink.borrow_mut() = sink;
    }

    // ── Entity lifecycle ─────────────────────────────────────────

    /// Moves an entity into the registry: indexes its current attributes
    /// (announcing each), installs forwarders on its local events so
    /// future mutations propagate automatically, and announces the
    /// entity itself.
    pub fn register_entity(&mut self, mut entity: Entity) -> docspace_types::EntityId {
        let entity_id = entity.id().clone();
        tracing::debug!(entity = %entity_id, entity_type = entity.entity_type(), "registering entity");

        for attribute in entity.attributes() {
            self.shared.register_attribute(entity_id.as_str(), attribute);
        }

        let shared = Rc::clone(&self.shared);
        entity.on("attribute:changed", move |event| {
            if let EntityEventKind::AttributeChanged {
                name,
                old_value,
                new_value,
                new_raw,
            } = &event.kind
            {
                let key = AttributeKey::new(event.entity_id.as_str(), name);
                shared.refresh_index_value(key.as_str(), new_raw);

                let mut note = ChangeNotification::new("attribute:changed");
                note.entity_id = Some(event.entity_id.to_string());
                note.entity_type = Some(event.entity_type.clone());
                note.attribute_name = Some(name.clone());
                note.old_value = Some(old_value.clone());
                note.new_value = Some(new_value.clone());
                shared.notify(note);
            }
            Ok(())
        });

        let shared = Rc::clone(&self.shared);
        entity.on("attribute:created", move |event| {
            if let EntityEventKind::AttributeCreated { attribute, .. } = &event.kind {
                match Attribute::deserialize(attribute.clone()) {
                    Ok(snapshot) => {
                        shared.register_attribute(event.entity_id.as_str(), &snapshot);
                    }
                    Err(error) => {
                        tracing::warn!(entity = %event.entity_id, %error, "unreadable attribute payload");
                    }
                }
            }
            Ok(())
        });

        let shared = Rc::clone(&self.shared);
        entity.on("attribute:removed", move |event| {
            if let EntityEventKind::AttributeRemoved { name, .. } = &event.kind {
                shared.unregister_attribute(event.entity_id.as_str(), name);
            }
            Ok(())
        });

        let entity_type = entity.entity_type().to_string();
        let payload = entity.serialize().unwrap_or(Value::Null);
        self.entities.insert(entity_id.to_string(), entity);

        let mut note = ChangeNotification::new("entity:registered");
        note.entity_id = Some(entity_id.to_string());
        note.entity_type = Some(entity_type);
        note.payload = payload;
        self.shared.notify(note);

        entity_id
    }

    /// Removes an entity and all of its attributes. The entity leaves the
    /// map before any observer runs, so callbacks never see a
    /// half-removed entity. Unknown ids are a no-op.
    pub fn unregister_entity(&mut self, entity_id: &str) -> bool {
        let Some(entity) = self.entities.remove(entity_id) else {
            return false;
        };
        tracing::debug!(entity = entity_id, "unregistering entity");

        let names: Vec<String> = entity
            .attribute_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        for name in names {
            self.shared.unregister_attribute(entity_id, &name);
        }
        self.shared.entity_subs.borrow_mut().remove(entity_id);

        let mut note = ChangeNotification::new("entity:unregistered");
        note.entity_id = Some(entity_id.to_string());
        note.entity_type = Some(entity.entity_type().to_string());
        note.payload = entity.serialize().unwrap_or(Value::Null);
        self.shared.notify(note);
        true
    }

    #[must_use]
    pub fn entity(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.get(entity_id)
    }

    /// Mutable access to a registered entity. Mutations made through this
    /// reference propagate via the installed forwarders.
    #[must_use]
    pub fn entity_mut(&mut self, entity_id: &str) -> Option<&mut Entity> {
        self.entities.get_mut(entity_id)
    }

    pub fn all_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn entities_by_type(&self, entity_type: &str) -> Vec<&Entity> {
        self.entities
            .values()
            .filter(|e| e.entity_type() == entity_type)
            .collect()
    }

    // ── Attribute registry ───────────────────────────────────────

    /// Indexes a standalone attribute snapshot under an entity id.
    pub fn register_attribute(&self, entity_id: &str, attribute: &Attribute) {
        self.shared.register_attribute(entity_id, attribute);
    }

    /// Drops an attribute from the index. Unknown keys are a no-op.
    pub fn unregister_attribute(&self, entity_id: &str, attribute_name: &str) -> bool {
        self.shared.unregister_attribute(entity_id, attribute_name)
    }

    /// Looks up an attribute: the live entity first, then the index
    /// (which also covers imported attributes without a backing entity).
    #[must_use]
    pub fn attribute(&self, entity_id: &str, attribute_name: &str) -> Option<Attribute> {
        if let Some(entity) = self.entities.get(entity_id) {
            if let Some(attribute) = entity.get_attribute_opt(attribute_name) {
                return Some(attribute.clone());
            }
        }
        let key = AttributeKey::new(entity_id, attribute_name);
        self.shared.index.borrow().get(key.as_str()).cloned()
    }

    #[must_use]
    pub fn has_attribute(&self, entity_id: &str, attribute_name: &str) -> bool {
        if self
            .entities
            .get(entity_id)
            .is_some_and(|e| e.has_attribute(attribute_name))
        {
            return true;
        }
        let key = AttributeKey::new(entity_id, attribute_name);
        self.shared.index.borrow().contains_key(key.as_str())
    }

    /// Every indexed attribute of one entity, as `(name, attribute)`.
    #[must_use]
    pub fn entity_attributes(&self, entity_id: &str) -> Vec<(String, Attribute)> {
        let prefix = AttributeKey::entity_prefix(entity_id);
        self.shared
            .index
            .borrow()
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, attribute)| (key[prefix.len()..].to_string(), attribute.clone()))
            .collect()
    }

    /// Every indexed attribute of one kind, as `(composite key, attribute)`.
    #[must_use]
    pub fn attributes_by_kind(&self, kind: &ValueKind) -> Vec<(String, Attribute)> {
        self.shared
            .index
            .borrow()
            .iter()
            .filter(|(_, attribute)| attribute.kind() == kind)
            .map(|(key, attribute)| (key.clone(), attribute.clone()))
            .collect()
    }

    /// Case-insensitive name search over the indexed attributes.
    pub fn search_attributes(&self, pattern: &str) -> SpaceResult<Vec<(String, Attribute)>> {
        let regex = regex::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()?;
        Ok(self
            .shared
            .index
            .borrow()
            .iter()
            .filter(|(_, attribute)| regex.is_match(attribute.name()))
            .map(|(key, attribute)| (key.clone(), attribute.clone()))
            .collect())
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Subscribes to one attribute of one entity.
    pub fn subscribe(
        &self,
        entity_id: &str,
        attribute_name: &str,
        callback: impl Fn(&ChangeNotification) -> Result<(), String> + 'static,
    ) -> Subscription {
        let key = AttributeKey::new(entity_id, attribute_name);
        self.shared.subscribe_keyed(
            &self.shared.attribute_subs,
            Tier::Attribute,
            key.as_str().to_string(),
            Rc::new(callback),
        )
    }

    /// Subscribes to every attribute of one entity.
    pub fn subscribe_to_entity(
        &self,
        entity_id: &str,
        callback: impl Fn(&ChangeNotification) -> Result<(), String> + 'static,
    ) -> Subscription {
        self.shared.subscribe_keyed(
            &self.shared.entity_subs,
            Tier::Entity,
            entity_id.to_string(),
            Rc::new(callback),
        )
    }

    /// Subscribes to every entity of one type.
    pub fn subscribe_to_type(
        &self,
        entity_type: &str,
        callback: impl Fn(&ChangeNotification) -> Result<(), String> + 'static,
    ) -> Subscription {
        self.shared.subscribe_keyed(
            &self.shared.type_subs,
            Tier::EntityType,
            entity_type.to_string(),
            Rc::new(callback),
        )
    }

    /// Subscribes to every change in the registry.
    pub fn subscribe_global(
        &self,
        callback: impl Fn(&ChangeNotification) -> Result<(), String> + 'static,
    ) -> Subscription {
        let id = self.shared.next_id();
        self.shared.global_subs.borrow_mut().push(SubscriberEntry {
            id,
            callback: Rc::new(callback),
        });
        Subscription {
            tier: Tier::Global,
            key: None,
            id,
        }
    }

    /// Removes a subscription. Removing twice is a safe no-op.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.shared.unsubscribe(subscription)
    }

    // ── Batch ────────────────────────────────────────────────────

    /// A batch that queues registry mutations and applies them with
    /// notifications suppressed.
    #[must_use]
    pub fn batch(&self) -> Batch {
        Batch::new(Rc::clone(&self.shared))
    }

    // ── History ──────────────────────────────────────────────────

    /// The change history, filtered conjunctively.
    #[must_use]
    pub fn history(&self, filter: &HistoryFilter) -> Vec<ChangeRecord> {
        let mut entries: Vec<ChangeRecord> = self
            .shared
            .history
            .borrow()
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            let start = entries.len().saturating_sub(limit);
            entries.drain(..start);
        }
        entries
    }

    /// Clears history entries from before `before`, or everything.
    pub fn clear_history(&self, before: Option<DateTime<Utc>>) {
        let mut history = self.shared.history.borrow_mut();
        match before {
            Some(cutoff) => history.retain(|record| record.timestamp >= cutoff),
            None => history.clear(),
        }
    }

    // ── Introspection & persistence seam ─────────────────────────

    /// Aggregate numbers about the registry.
    #[must_use]
    pub fn stats(&self) -> SpaceStats {
        let index = self.shared.index.borrow();
        let mut kind_distribution: HashMap<String, usize> = HashMap::new();
        let mut entity_distribution: HashMap<String, usize> = HashMap::new();
        for (key, attribute) in index.iter() {
            *kind_distribution
                .entry(attribute.kind().name().to_string())
                .or_insert(0) += 1;
            if let Some((entity_id, _)) = key.split_once("::") {
                *entity_distribution.entry(entity_id.to_string()).or_insert(0) += 1;
            }
        }
        SpaceStats {
            total_attributes: index.len(),
            total_subscriptions: self.shared.attribute_subs.borrow().len(),
            entity_subscriptions: self.shared.entity_subs.borrow().len(),
            type_subscriptions: self.shared.type_subs.borrow().len(),
            global_subscriptions: self.shared.global_subs.borrow().len(),
            kind_distribution,
            entity_distribution,
            history_size: self.shared.history.borrow().len(),
        }
    }

    /// Serializes the attribute index plus history — the seam a
    /// persistence collaborator stores.
    pub fn export(&self) -> SpaceResult<Value> {
        let attributes: SpaceResult<BTreeMap<String, Value>> = self
            .shared
            .index
            .borrow()
            .iter()
            .map(|(key, attribute)| Ok((key.clone(), attribute.serialize()?)))
            .collect();
        let export = SpaceExport {
            attributes: attributes?,
            stats: serde_json::to_value(self.stats())?,
            history: self.shared.history.borrow().iter().cloned().collect(),
            timestamp: Utc::now(),
        };
        Ok(serde_json::to_value(export)?)
    }

    /// Restores a previously exported state, replacing everything.
    /// Malformed payloads fail loudly and leave the space cleared.
    pub fn import(&mut self, data: Value) -> SpaceResult<()> {
        let export: SpaceExport = serde_json::from_value(data)?;
        self.clear();

        {
            let mut index = self.shared.index.borrow_mut();
            for (key, payload) in export.attributes {
                let attribute = Attribute::deserialize(payload)?;
                index.insert(key, attribute);
            }
        }
        {
            let mut history = self.shared.history.borrow_mut();
            *history = export.history.into_iter().collect();
            while history.len() > self.shared.history_cap {
                history.pop_front();
            }
        }
        Ok(())
    }

    /// Drops all entities, attributes, subscriptions and history.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.shared.index.borrow_mut().clear();
        self.shared.attribute_subs.borrow_mut().clear();
        self.shared.entity_subs.borrow_mut().clear();
        self.shared.type_subs.borrow_mut().clear();
        self.shared.global_subs.borrow_mut().clear();
        self.shared.history.borrow_mut().clear();
    }
}

impl std::fmt::Debug for AttributeSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeSpace")
            .field("entities", &self.entities.len())
            .field("attributes", &self.shared.index.borrow().len())
            .field("history", &self.shared.history.borrow().len())
            .finish()
    }
}
