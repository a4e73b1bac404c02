//! Entity lifecycle over the registry and an injected store.
//!
//! The manager loads persisted entities into an [`AttributeSpace`] at
//! startup, tracks which entities changed through a global subscription,
//! and writes them back on flush. Persistence stays behind the
//! [`KeyValueStore`] trait; the manager never assumes a backend.

use crate::store::{KeyValueStore, StoreError};
use chrono::Utc;
use docspace_model::{Entity, ModelError};
use docspace_space::{AttributeSpace, SpaceError, Subscription};
use docspace_types::EntityId;
use serde_json::{Value, json};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use thiserror::Error;

const ENTITY_PREFIX: &str = "entity:";
const METADATA_KEY: &str = "entities:metadata";

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors that can occur in entity lifecycle operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("registry error: {0}")]
    Space(#[from] SpaceError),
}

/// Aggregate numbers about managed entities.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ManagerStats {
    pub total_entities: usize,
    pub entities_by_type: HashMap<String, usize>,
    pub pending_saves: usize,
    pub initialized: bool,
}

/// Loads, saves and deletes entities against an injected store, keeping
/// the registry as the single source of truth in between.
pub struct EntityManager {
    space: AttributeSpace,
    store: Box<dyn KeyValueStore>,
    dirty: Rc<RefCell<HashSet<String>>>,
    dirty_subscription: Option<Subscription>,
    initialized: bool,
}

impl EntityManager {
    /// Wraps a registry and a store. Call [`EntityManager::initialize`]
    /// before use to load persisted entities and arm dirty tracking.
    pub fn new(space: AttributeSpace, store: impl KeyValueStore + 'static) -> Self {
        Self {
            space,
            store: Box::new(store),
            dirty: Rc::new(RefCell::new(HashSet::new())),
            dirty_subscription: None,
            initialized: false,
        }
    }

    #[must_use]
    pub fn space(&self) -> &AttributeSpace {
        &self.space
    }

    #[must_use]
    pub fn space_mut(&mut self) -> &mut AttributeSpace {
        &mut self.space
    }

    /// Read access to the underlying store.
    #[must_use]
    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// Loads every persisted entity into the registry, skipping (and
    /// logging) unreadable records, then subscribes for dirty tracking.
    /// Returns how many entities loaded. Idempotent.
    pub fn initialize(&mut self) -> ManagerResult<usize> {
        if self.initialized {
            return Ok(0);
        }

        let mut loaded = 0;
        for key in self.store.keys(ENTITY_PREFIX)? {
            let Some(payload) = self.store.load(&key)? else {
                continue;
            };
            match Entity::deserialize(payload) {
                Ok(entity) => {
                    self.space.register_entity(entity);
                    loaded += 1;
                }
                Err(error) => {
                    tracing::error!(key, %error, "skipping unreadable entity record");
                }
            }
        }

        // Armed after the load so freshly loaded entities don't count as
        // dirty.
        let dirty = Rc::clone(&self.dirty);
        let subscription = self.space.subscribe_global(move |change| {
            if matches!(
                change.event_type.as_str(),
                "attribute:changed" | "attribute:created" | "entity:registered"
            ) {
                if let Some(entity_id) = &change.entity_id {
                    dirty.borrow_mut().insert(entity_id.clone());
                }
            }
            Ok(())
        });
        self.dirty_subscription = Some(subscription);
        self.initialized = true;
        tracing::info!(loaded, "entity manager initialized");
        Ok(loaded)
    }

    /// Creates an entity, seeds it with `initial` values (kinds
    /// inferred), registers it and persists it immediately.
    pub fn create_entity(
        &mut self,
        entity_type: &str,
        id: Option<EntityId>,
        initial: serde_json::Map<String, Value>,
    ) -> ManagerResult<EntityId> {
        let mut entity = match id {
            Some(id) => Entity::with_id(entity_type, id),
            None => Entity::new(entity_type),
        };
        for (name, value) in initial {
            entity.set_attribute_value(&name, value);
        }

        let entity_id = self.space.register_entity(entity);
        self.save_entity(entity_id.as_str())?;
        tracing::debug!(entity = %entity_id, entity_type, "entity created");
        Ok(entity_id)
    }

    /// Persists one entity and refreshes the metadata index. Unknown ids
    /// are a logged no-op.
    pub fn save_entity(&mut self, entity_id: &str) -> ManagerResult<bool> {
        let (payload, metadata_entry) = match self.space.entity(entity_id) {
            Some(entity) => (
                entity.serialize()?,
                json!({
                    "type": entity.entity_type(),
                    "lastUpdated": Utc::now(),
                    "attributeCount": entity.attribute_names().len(),
                }),
            ),
            None => {
                tracing::warn!(entity = entity_id, "save requested for unknown entity");
                return Ok(false);
            }
        };

        self.store
            .save(&format!("{ENTITY_PREFIX}{entity_id}"), &payload)?;

        let mut metadata = self.store.load(METADATA_KEY)?.unwrap_or_else(|| json!({}));
        if let Some(map) = metadata.as_object_mut() {
            map.insert(entity_id.to_string(), metadata_entry);
        }
        self.store.save(METADATA_KEY, &metadata)?;

        self.dirty.borrow_mut().remove(entity_id);
        Ok(true)
    }

    /// Unregisters and deletes an entity. Unknown ids are a no-op.
    pub fn delete_entity(&mut self, entity_id: &str) -> ManagerResult<bool> {
        if !self.space.unregister_entity(entity_id) {
            return Ok(false);
        }
        self.store.delete(&format!("{ENTITY_PREFIX}{entity_id}"))?;

        let mut metadata = self.store.load(METADATA_KEY)?.unwrap_or_else(|| json!({}));
        if let Some(map) = metadata.as_object_mut() {
            map.remove(entity_id);
        }
        self.store.save(METADATA_KEY, &metadata)?;

        self.dirty.borrow_mut().remove(entity_id);
        tracing::debug!(entity = entity_id, "entity deleted");
        Ok(true)
    }

    /// Entities changed since their last save.
    #[must_use]
    pub fn pending_saves(&self) -> usize {
        self.dirty.borrow().len()
    }

    /// Persists every dirty entity, returning how many were written.
    /// Dirty ids whose entity has meanwhile disappeared are dropped.
    pub fn flush_dirty(&mut self) -> ManagerResult<usize> {
        let ids: Vec<String> = self.dirty.borrow_mut().drain().collect();
        let mut saved = 0;
        for id in ids {
            if self.save_entity(&id)? {
                saved += 1;
            }
        }
        Ok(saved)
    }

    /// Persists every registered entity regardless of dirty state.
    pub fn save_all(&mut self) -> ManagerResult<usize> {
        let ids: Vec<String> = self
            .space
            .all_entities()
            .map(|e| e.id().to_string())
            .collect();
        let mut saved = 0;
        for id in ids {
            if self.save_entity(&id)? {
                saved += 1;
            }
        }
        tracing::debug!(saved, "saved all entities");
        Ok(saved)
    }

    /// Deletes every managed entity and the metadata index.
    pub fn clear_all(&mut self) -> ManagerResult<usize> {
        let ids: Vec<String> = self
            .space
            .all_entities()
            .map(|e| e.id().to_string())
            .collect();
        let mut deleted = 0;
        for id in &ids {
            if self.delete_entity(id)? {
                deleted += 1;
            }
        }
        self.store.delete(METADATA_KEY)?;
        tracing::warn!(deleted, "cleared all entities");
        Ok(deleted)
    }

    /// Explicit teardown: stops dirty tracking and discards pending
    /// state. Explicit saves keep working afterwards.
    pub fn shutdown(&mut self) {
        if let Some(subscription) = self.dirty_subscription.take() {
            self.space.unsubscribe(&subscription);
        }
        self.dirty.borrow_mut().clear();
        tracing::debug!("entity manager shut down");
    }

    /// Aggregate numbers about managed entities.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        let mut entities_by_type: HashMap<String, usize> = HashMap::new();
        for entity in self.space.all_entities() {
            *entities_by_type
                .entry(entity.entity_type().to_string())
                .or_insert(0) += 1;
        }
        ManagerStats {
            total_entities: self.space.entity_count(),
            entities_by_type,
            pending_saves: self.dirty.borrow().len(),
            initialized: self.initialized,
        }
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("entities", &self.space.entity_count())
            .field("pending_saves", &self.dirty.borrow().len())
            .field("initialized", &self.initialized)
            .finish()
    }
}
