//! Configuration types for stores
//!
//! [`StoreConfig`] and [`EntityStoreConfig`] collect everything a store needs
//! at construction. Both are plain structs with fluent `with_*` builders and
//! a `validate()` that the store constructors call before building anything.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use entity_map::{EqFn, Id, IdGetter, MergeStrategy, Record};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::hooks::{DefaultHooks, EntityHooks};
use crate::persist::{PersistStorage, Persistence};

/// Whether stores validate their invariants after every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Check invariants after each transition and panic on violation
    Development,
    /// Skip the checks
    Production,
}

impl RuntimeMode {
    pub fn is_development(self) -> bool {
        self == RuntimeMode::Development
    }
}

impl Default for RuntimeMode {
    /// Development in debug builds, Production otherwise
    fn default() -> Self {
        if cfg!(debug_assertions) {
            RuntimeMode::Development
        } else {
            RuntimeMode::Production
        }
    }
}

/// Cache settings as they appear in host configuration files
///
/// ```rust
/// use entity_store::CacheSettings;
///
/// let settings: CacheSettings = serde_json::from_str(r#"{ "ttl_ms": 600000 }"#).unwrap();
/// assert_eq!(settings.ttl().unwrap().as_secs(), 600);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Cache lifetime in milliseconds; absent disables caching
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl CacheSettings {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

fn validate_common(name: &str, cache_ttl: Option<Duration>) -> Result<()> {
    if name.trim().is_empty() {
        return Err(StoreError::Configuration("Store name must not be empty".to_string()));
    }
    if cache_ttl == Some(Duration::ZERO) {
        return Err(StoreError::Configuration(
            "Cache TTL must be greater than 0 (use None to disable caching)".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// StoreConfig
// ============================================================================

/// Configuration for a plain [`Store`](crate::Store)
pub struct StoreConfig<S> {
    /// Name used in log output
    pub name: String,

    /// State the store starts from and returns to on `reset()`
    pub initial_state: S,

    /// How long `set_has_cache(true)` holds before expiring
    /// Default: None (caching disabled)
    pub cache_ttl: Option<Duration>,

    /// Optional persistence of the state under a key
    pub persistence: Option<Persistence<S>>,
}

impl<S> StoreConfig<S> {
    pub fn new(name: impl Into<String>, initial_state: S) -> Self {
        Self {
            name: name.into(),
            initial_state,
            cache_ttl: None,
            persistence: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_common(&self.name, self.cache_ttl)?;
        if let Some(persistence) = &self.persistence {
            persistence.validate()?;
        }
        Ok(())
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_cache(mut self, settings: CacheSettings) -> Self {
        self.cache_ttl = settings.ttl();
        self
    }

    pub fn with_persistence(mut self, persist_key: impl Into<String>, storage: Arc<dyn PersistStorage>) -> Self
    where
        S: Serialize + DeserializeOwned + 'static,
    {
        self.persistence = Some(Persistence::new(persist_key, storage));
        self
    }
}

impl<S: fmt::Debug> fmt::Debug for StoreConfig<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("name", &self.name)
            .field("initial_state", &self.initial_state)
            .field("cache_ttl", &self.cache_ttl)
            .field("persistence", &self.persistence)
            .finish()
    }
}

// ============================================================================
// EntityStoreConfig
// ============================================================================

/// Configuration for an [`EntityStore`](crate::EntityStore)
pub struct EntityStoreConfig<T> {
    /// Name used in log output
    /// Default: "entities"
    pub name: String,

    /// How entity keys are resolved
    /// Default: the `id` property
    pub id_getter: IdGetter<T>,

    /// Entities the store is seeded with, in order
    pub initial_entities: Vec<T>,

    /// Already-keyed seed entries; mutually exclusive with `initial_entities`
    pub initial_object: Vec<(String, T)>,

    /// Ids active after construction and `reset()`; absent ids are skipped
    pub initial_active: Vec<Id>,

    /// Default: None (caching disabled)
    pub cache_ttl: Option<Duration>,

    /// How partial updates are folded into stored entities
    /// Default: shallow
    pub merge: MergeStrategy<T>,

    /// Equality gating `select_entity` streams
    /// Default: None (same allocation or shallow field equality)
    pub equality: Option<EqFn<T>>,

    pub hooks: Arc<dyn EntityHooks<T>>,

    /// Default: Development in debug builds
    pub mode: RuntimeMode,
}

impl<T: Record> Default for EntityStoreConfig<T> {
    fn default() -> Self {
        Self {
            name: "entities".to_string(),
            id_getter: IdGetter::default(),
            initial_entities: Vec::new(),
            initial_object: Vec::new(),
            initial_active: Vec::new(),
            cache_ttl: None,
            merge: MergeStrategy::default(),
            equality: None,
            hooks: Arc::new(DefaultHooks),
            mode: RuntimeMode::default(),
        }
    }
}

impl<T: Record> EntityStoreConfig<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Production mode with a cache lifetime
    pub fn cached(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            cache_ttl: Some(ttl),
            mode: RuntimeMode::Production,
            ..Self::new(name)
        }
    }

    /// Development mode with recursive merging, for nested records
    pub fn nested(name: impl Into<String>) -> Self {
        Self {
            merge: MergeStrategy::Deep,
            mode: RuntimeMode::Development,
            ..Self::new(name)
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_common(&self.name, self.cache_ttl)?;
        self.id_getter.validate()?;
        if !self.initial_entities.is_empty() && !self.initial_object.is_empty() {
            return Err(StoreError::Configuration(
                "Seed either initial_entities or initial_object, not both".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_id_getter(mut self, id_getter: impl Into<IdGetter<T>>) -> Self {
        self.id_getter = id_getter.into();
        self
    }

    pub fn with_entities(mut self, entities: impl IntoIterator<Item = T>) -> Self {
        self.initial_entities = entities.into_iter().collect();
        self
    }

    pub fn with_object(mut self, entries: impl IntoIterator<Item = (String, T)>) -> Self {
        self.initial_object = entries.into_iter().collect();
        self
    }

    pub fn with_active<I: Into<Id>>(mut self, ids: impl IntoIterator<Item = I>) -> Self {
        self.initial_active = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_cache(mut self, settings: CacheSettings) -> Self {
        self.cache_ttl = settings.ttl();
        self
    }

    pub fn with_merge(mut self, merge: MergeStrategy<T>) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_equality(mut self, eq: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.equality = Some(Arc::new(eq));
        self
    }

    pub fn with_hooks(mut self, hooks: impl EntityHooks<T> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_mode(mut self, mode: RuntimeMode) -> Self {
        self.mode = mode;
        self
    }
}

impl<T> fmt::Debug for EntityStoreConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStoreConfig")
            .field("name", &self.name)
            .field("id_getter", &self.id_getter)
            .field("initial_entities", &self.initial_entities.len())
            .field("initial_object", &self.initial_object.len())
            .field("initial_active", &self.initial_active)
            .field("cache_ttl", &self.cache_ttl)
            .field("merge", &self.merge)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_default_config() {
        let config = EntityStoreConfig::<Value>::default();
        assert_eq!(config.name, "entities");
        assert!(config.cache_ttl.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let unnamed = EntityStoreConfig::<Value>::new("  ");
        assert!(unnamed.validate().is_err());

        let zero_ttl = EntityStoreConfig::<Value>::new("todos").with_cache_ttl(Duration::ZERO);
        assert!(zero_ttl.validate().is_err());

        let no_id = EntityStoreConfig::<Value>::new("todos").with_id_getter("");
        assert!(matches!(no_id.validate(), Err(StoreError::Map(_))));

        let both_seeds = EntityStoreConfig::new("todos")
            .with_entities(vec![json!({ "id": 1 })])
            .with_object(vec![("1".to_string(), json!({ "id": 1 }))]);
        assert!(both_seeds.validate().is_err());
    }

    #[test]
    fn test_config_presets() {
        let cached = EntityStoreConfig::<Value>::cached("todos", Duration::from_secs(60));
        assert_eq!(cached.cache_ttl, Some(Duration::from_secs(60)));
        assert_eq!(cached.mode, RuntimeMode::Production);
        assert!(cached.validate().is_ok());

        let nested = EntityStoreConfig::<Value>::nested("tree");
        assert!(matches!(nested.merge, MergeStrategy::Deep));
        assert!(nested.mode.is_development());
    }

    #[test]
    fn test_builder_pattern() {
        let config = EntityStoreConfig::new("todos")
            .with_id_getter("meta.key")
            .with_entities(vec![json!({ "meta": { "key": "a" } })])
            .with_active(["a"])
            .with_cache(CacheSettings { ttl_ms: Some(250) })
            .with_mode(RuntimeMode::Production);

        assert_eq!(config.id_getter.describe(), "meta.key");
        assert_eq!(config.initial_active, vec![Id::from("a")]);
        assert_eq!(config.cache_ttl, Some(Duration::from_millis(250)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_settings_deserialize() {
        let absent: CacheSettings = serde_json::from_str("{}").unwrap();
        assert!(absent.ttl().is_none());

        let mode: RuntimeMode = serde_json::from_str("\"production\"").unwrap();
        assert_eq!(mode, RuntimeMode::Production);
    }

    #[test]
    fn test_store_config() {
        let config = StoreConfig::new("session", json!({ "user": null })).with_cache_ttl(Duration::from_secs(1));
        assert!(config.validate().is_ok());
        assert!(StoreConfig::new("", 0u8).validate().is_err());
    }
}
