//! The persistence seam.
//!
//! The engine never talks to a concrete backend; collaborators implement
//! [`KeyValueStore`] over whatever they have (browser storage, a file, a
//! database) and hand it to the manager. [`MemoryStore`] backs tests and
//! ephemeral sessions.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors a store implementation can surface.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file system backends).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything backend-specific.
    #[error("backend error: {0}")]
    Backend(String),
}

/// A minimal key-value persistence interface.
pub trait KeyValueStore {
    /// Stores a value under a key, replacing any previous value.
    fn save(&mut self, key: &str, value: &Value) -> StoreResult<()>;

    /// Loads the value under a key, if present.
    fn load(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Deletes a key. Returns whether it existed.
    fn delete(&mut self, key: &str) -> StoreResult<bool>;

    /// Every stored key starting with `prefix`.
    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Value>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn save(&mut self, key: &str, value: &Value) -> StoreResult<()> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.entries.get(key).cloned())
    }

    fn delete(&mut self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }
}
