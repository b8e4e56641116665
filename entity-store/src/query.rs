//! Read layer over a plain [`Store`]

use serde_json::Value;

use entity_map::Record;

use crate::error::SharedError;
use crate::observable::Observable;
use crate::store::Store;

/// Derived views of a [`Store`]
///
/// Every `select*` stream starts with the current value and only emits again
/// when the projected value changes.
pub struct Query<S> {
    store: Store<S>,
}

impl<S: Clone + Send + Sync + 'static> Query<S> {
    pub fn new(store: &Store<S>) -> Self {
        Self { store: store.clone() }
    }

    pub fn store(&self) -> &Store<S> {
        &self.store
    }

    pub fn get_value(&self) -> S {
        self.store.get_value()
    }

    /// Every state, including ones equal to the previous
    pub fn select_all(&self) -> Observable<S> {
        self.store.observable()
    }

    /// A projection of the state, emitted when it changes
    pub fn select<U, F>(&self, project: F) -> Observable<U>
    where
        U: Clone + Send + PartialEq + 'static,
        F: Fn(&S) -> U + Send + Sync + 'static,
    {
        self.store.observable().map(project).distinct_until_changed()
    }

    /// One top-level field of the state
    pub fn select_field(&self, name: &str) -> Observable<Option<Value>>
    where
        S: Record,
    {
        let name = name.to_string();
        self.select(move |state: &S| state.field(&name))
    }

    pub fn get_loading(&self) -> bool {
        self.store.get_loading()
    }

    pub fn select_loading(&self) -> Observable<bool> {
        self.store.loading_observable()
    }

    pub fn get_error(&self) -> Option<SharedError> {
        self.store.get_error()
    }

    pub fn select_error(&self) -> Observable<Option<SharedError>> {
        self.store.error_observable()
    }

    pub fn get_has_cache(&self) -> bool {
        self.store.has_cache()
    }

    pub fn select_has_cache(&self) -> Observable<bool> {
        self.store.has_cache_observable()
    }
}

impl<S> Clone for Query<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}
