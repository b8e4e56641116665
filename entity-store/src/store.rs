//! Plain state store
//!
//! [`Store`] holds one caller-defined state value plus side-channel loading,
//! error and cache flags. Every mutation replaces the state wholesale and
//! notifies subscribers synchronously.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tracing::{debug, trace, warn};

use crate::cache::CacheFlag;
use crate::config::StoreConfig;
use crate::error::{same_error, Result, SharedError};
use crate::observable::{Observable, Subject};
use crate::persist::Persistence;

struct StoreInner<S> {
    name: String,
    state: Subject<S>,
    loading: Subject<bool>,
    error: Subject<Option<SharedError>>,
    cache: CacheFlag,
    initial: S,
    persistence: Option<Persistence<S>>,
    destroyed: AtomicBool,
    write: ReentrantMutex<()>,
}

/// Store for a single state record
///
/// Clones are handles to the same store.
///
/// # Example
///
/// ```rust
/// use entity_store::{Store, StoreConfig};
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct Session { user: Option<String> }
///
/// let store = Store::new(StoreConfig::new("session", Session { user: None })).unwrap();
/// store.update(|s| Session { user: Some("ana".into()), ..s.clone() });
/// assert_eq!(store.get_value().user.as_deref(), Some("ana"));
/// ```
pub struct Store<S> {
    inner: Arc<StoreInner<S>>,
}

impl<S: Clone + Send + Sync + 'static> Store<S> {
    /// Build a store, merging in any persisted state
    pub fn new(config: StoreConfig<S>) -> Result<Self> {
        config.validate()?;
        let StoreConfig {
            name,
            initial_state,
            cache_ttl,
            persistence,
        } = config;

        let state = match &persistence {
            Some(persistence) => persistence.load(initial_state.clone())?,
            None => initial_state.clone(),
        };

        debug!(store = %name, persisted = persistence.is_some(), "Created store");

        Ok(Self {
            inner: Arc::new(StoreInner {
                name,
                state: Subject::new(state),
                loading: Subject::new(false),
                error: Subject::new(None),
                cache: CacheFlag::new(cache_ttl),
                initial: initial_state,
                persistence,
                destroyed: AtomicBool::new(false),
                write: ReentrantMutex::new(()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current state
    pub fn get_value(&self) -> S {
        self.inner.state.value()
    }

    /// Stream of states, starting with the current one
    pub fn observable(&self) -> Observable<S> {
        self.inner.state.observable()
    }

    /// Replace the state with `f(current)`
    pub fn update(&self, f: impl FnOnce(&S) -> S) {
        if self.is_destroyed() {
            trace!(store = %self.inner.name, "Ignoring update on destroyed store");
            return;
        }
        let _write = self.inner.write.lock();
        let next = f(&self.inner.state.value());
        self.publish("update", next);
    }

    /// Replace the state
    pub fn set_state(&self, state: S) {
        if self.is_destroyed() {
            trace!(store = %self.inner.name, "Ignoring set_state on destroyed store");
            return;
        }
        let _write = self.inner.write.lock();
        self.publish("set_state", state);
    }

    fn publish(&self, op: &'static str, state: S) {
        if let Some(persistence) = &self.inner.persistence {
            if let Err(e) = persistence.save(&state) {
                warn!(store = %self.inner.name, key = persistence.key(), error = %e, "Failed to persist state");
            }
        }
        debug!(store = %self.inner.name, op, "State transition");
        self.inner.state.next(state);
    }

    pub fn get_loading(&self) -> bool {
        self.inner.loading.value()
    }

    pub fn set_loading(&self, loading: bool) {
        if self.is_destroyed() || self.inner.loading.value() == loading {
            return;
        }
        debug!(store = %self.inner.name, loading, "Loading changed");
        self.inner.loading.next(loading);
    }

    pub fn loading_observable(&self) -> Observable<bool> {
        self.inner.loading.observable().distinct_until_changed()
    }

    pub fn get_error(&self) -> Option<SharedError> {
        self.inner.error.value()
    }

    pub fn set_error(&self, error: Option<SharedError>) {
        if self.is_destroyed() || same_error(&self.inner.error.value(), &error) {
            return;
        }
        debug!(store = %self.inner.name, has_error = error.is_some(), "Error changed");
        self.inner.error.next(error);
    }

    pub fn error_observable(&self) -> Observable<Option<SharedError>> {
        self.inner.error.observable().distinct_until_changed_by(same_error)
    }

    pub fn has_cache(&self) -> bool {
        self.inner.cache.get()
    }

    /// Mark the cache valid (arming its expiry) or invalid
    ///
    /// Ignored when no cache TTL is configured.
    pub fn set_has_cache(&self, value: bool) {
        if self.is_destroyed() {
            return;
        }
        self.inner.cache.set(&self.inner.name, value);
    }

    pub fn has_cache_observable(&self) -> Observable<bool> {
        self.inner.cache.observable()
    }

    /// Restore the initial state and clear every flag
    pub fn reset(&self) {
        if self.is_destroyed() {
            return;
        }
        self.inner.cache.reset();
        self.set_loading(false);
        self.set_error(None);
        self.set_state(self.inner.initial.clone());
    }

    /// Complete every stream and make the store inert
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(store = %self.inner.name, "Destroying store");
        self.inner.cache.close();
        self.inner.state.complete();
        self.inner.loading.complete();
        self.inner.error.complete();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("destroyed", &self.inner.destroyed.load(Ordering::Acquire))
            .finish()
    }
}
