//! Pluggable persistence for plain stores
//!
//! A [`PersistStorage`] moves JSON text in and out of some backing medium.
//! [`Persistence`] binds a storage to one key and one state type: it merges
//! the persisted value into the initial state when the store is built, and
//! writes the designated part of the state after every change.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use entity_map::Record;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Storage strategy for persisted store state
pub trait PersistStorage: Send + Sync {
    /// Raw persisted text under `key`
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store raw text under `key`
    fn set(&self, key: &str, raw: String) -> Result<()>;

    fn serialize(&self, value: &Value) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize(&self, raw: &str) -> Result<Value> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The part of `state` to persist; the whole state by default
    fn get_store(&self, state: &Value, key: &str) -> Value {
        let _ = key;
        state.clone()
    }

    /// Fold a persisted value into `state`; a shallow merge by default
    fn set_store(&self, state: Value, persisted: Value, key: &str) -> Value {
        let _ = key;
        state.merge(&persisted)
    }
}

/// In-process [`PersistStorage`] keeping JSON text in a map
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries.write().remove(key)
    }
}

impl PersistStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, raw: String) -> Result<()> {
        self.entries.write().insert(key.to_string(), raw);
        Ok(())
    }
}

type LoadFn<S> = dyn Fn(S) -> Result<S> + Send + Sync;
type SaveFn<S> = dyn Fn(&S) -> Result<()> + Send + Sync;

/// A storage bound to a key and a state type
pub struct Persistence<S> {
    key: String,
    load: Arc<LoadFn<S>>,
    save: Arc<SaveFn<S>>,
}

impl<S> Persistence<S>
where
    S: Serialize + DeserializeOwned + 'static,
{
    pub fn new(key: impl Into<String>, storage: Arc<dyn PersistStorage>) -> Self {
        let key = key.into();

        let load = {
            let storage = Arc::clone(&storage);
            let key = key.clone();
            move |state: S| -> Result<S> {
                let Some(raw) = storage.get(&key)? else {
                    return Ok(state);
                };
                let persisted = storage.deserialize(&raw)?;
                let merged = storage.set_store(serde_json::to_value(&state)?, persisted, &key);
                Ok(serde_json::from_value(merged)?)
            }
        };

        let save = {
            let key = key.clone();
            move |state: &S| -> Result<()> {
                let value = storage.get_store(&serde_json::to_value(state)?, &key);
                let raw = storage.serialize(&value)?;
                storage.set(&key, raw)
            }
        };

        Self {
            key,
            load: Arc::new(load),
            save: Arc::new(save),
        }
    }
}

impl<S> Persistence<S> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn load(&self, state: S) -> Result<S> {
        (self.load)(state)
    }

    pub(crate) fn save(&self, state: &S) -> Result<()> {
        (self.save)(state)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(StoreError::Configuration("Persist key must not be empty".to_string()));
        }
        Ok(())
    }
}

impl<S> Clone for Persistence<S> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            load: Arc::clone(&self.load),
            save: Arc::clone(&self.save),
        }
    }
}

impl<S> fmt::Debug for Persistence<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence").field("key", &self.key).finish()
    }
}
