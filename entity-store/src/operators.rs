//! Wrappers tying asynchronous producers to a store's status flags
//!
//! ```rust,ignore
//! let todos = use_cache(&store, || async {
//!     set_loading(&store, set_error(&store, api.fetch_todos())).await
//! })
//! .await;
//!
//! if let Cached::Fresh(Ok(list)) = todos {
//!     store.set(list);
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use entity_map::Record;
use tracing::trace;

use crate::entity_store::EntityStore;
use crate::error::{share_error, SharedError};
use crate::state::EntityState;
use crate::store::Store;

/// A store the operators can drive
pub trait StatusTarget {
    /// What [`use_cache`] replays on a cache hit
    type Snapshot: Clone + Send + 'static;

    fn mark_loading(&self, loading: bool);

    fn record_error(&self, error: Option<SharedError>);

    fn cache_valid(&self) -> bool;

    fn snapshot(&self) -> Self::Snapshot;
}

impl<S: Clone + Send + Sync + 'static> StatusTarget for Store<S> {
    type Snapshot = S;

    fn mark_loading(&self, loading: bool) {
        self.set_loading(loading);
    }

    fn record_error(&self, error: Option<SharedError>) {
        self.set_error(error);
    }

    fn cache_valid(&self) -> bool {
        self.has_cache()
    }

    fn snapshot(&self) -> S {
        self.get_value()
    }
}

impl<T: Record> StatusTarget for EntityStore<T> {
    type Snapshot = Arc<EntityState<T>>;

    fn mark_loading(&self, loading: bool) {
        self.set_loading(loading);
    }

    fn record_error(&self, error: Option<SharedError>) {
        self.set_error(error);
    }

    fn cache_valid(&self) -> bool {
        self.has_cache()
    }

    fn snapshot(&self) -> Arc<EntityState<T>> {
        self.get_value()
    }
}

/// Clears the loading flag however the wrapped future ends
struct LoadingGuard<'a, X: StatusTarget> {
    target: &'a X,
}

impl<X: StatusTarget> Drop for LoadingGuard<'_, X> {
    fn drop(&mut self) {
        self.target.mark_loading(false);
    }
}

/// Hold the loading flag for exactly as long as `fut` runs
///
/// The flag is cleared on completion, on error and when the returned future
/// is dropped before finishing.
pub async fn set_loading<X, F, V, E>(target: &X, fut: F) -> Result<V, E>
where
    X: StatusTarget,
    F: Future<Output = Result<V, E>>,
{
    target.mark_loading(true);
    let _guard = LoadingGuard { target };
    fut.await
}

/// Mirror a failure of `fut` into the error slot
///
/// The error is shared once; the slot and the returned `Err` hold the same
/// [`SharedError`], so [`crate::same_error`] matches them. Use
/// `downcast_ref` to get the concrete type back.
pub async fn set_error<X, F, V, E>(target: &X, fut: F) -> Result<V, SharedError>
where
    X: StatusTarget,
    F: Future<Output = Result<V, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    fut.await.map_err(|e| {
        let shared = share_error(e);
        target.record_error(Some(Arc::clone(&shared)));
        shared
    })
}

/// Outcome of [`use_cache`]
#[derive(Debug, Clone, PartialEq)]
pub enum Cached<S, V> {
    /// The cache was valid; the producer never ran
    Hit(S),
    /// The producer ran and returned this
    Fresh(V),
}

impl<S, V> Cached<S, V> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Cached::Hit(_))
    }

    pub fn hit(self) -> Option<S> {
        match self {
            Cached::Hit(snapshot) => Some(snapshot),
            Cached::Fresh(_) => None,
        }
    }

    pub fn fresh(self) -> Option<V> {
        match self {
            Cached::Hit(_) => None,
            Cached::Fresh(value) => Some(value),
        }
    }
}

/// Skip `producer` entirely while the target's cache is valid
pub async fn use_cache<X, P, Fut, V>(target: &X, producer: P) -> Cached<X::Snapshot, V>
where
    X: StatusTarget,
    P: FnOnce() -> Fut,
    Fut: Future<Output = V>,
{
    if target.cache_valid() {
        trace!("Cache hit; skipping producer");
        return Cached::Hit(target.snapshot());
    }
    Cached::Fresh(producer().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EntityStoreConfig, StoreConfig};
    use crate::entity_query::EntityQuery;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::time::Duration;

    #[derive(Debug, PartialEq, thiserror::Error)]
    #[error("fetch failed: {0}")]
    struct FetchError(String);

    fn store() -> EntityStore<Value> {
        EntityStore::new(EntityStoreConfig::cached("todos", Duration::from_secs(60))).unwrap()
    }

    #[tokio::test]
    async fn test_set_loading_brackets_future() {
        let store = store();
        let query = EntityQuery::new(&store);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = query.select_loading().subscribe(move |l: &bool| sink.lock().push(*l));
        store.set_loading(false);

        let observer = store.clone();
        let result: Result<u8, FetchError> = set_loading(&store, async move {
            assert!(observer.get_value().loading);
            Ok(7)
        })
        .await;

        assert_eq!(result, Ok(7));
        assert!(!store.get_value().loading);
        assert_eq!(*seen.lock(), vec![true, false, true, false]);
    }

    #[tokio::test]
    async fn test_set_loading_clears_on_drop() {
        let store = store();
        store.set_loading(false);
        {
            let pending = set_loading(&store, std::future::pending::<Result<(), FetchError>>());
            let _ = tokio::time::timeout(Duration::from_millis(5), pending).await;
        }
        assert!(!store.get_value().loading);
    }

    #[tokio::test]
    async fn test_set_error_shares_one_error() {
        let store = store();
        let result = set_error(&store, async { Err::<(), _>(FetchError("timeout".into())) }).await;
        let returned = result.unwrap_err();
        assert_eq!(returned.to_string(), "fetch failed: timeout");
        assert_eq!(returned.downcast_ref::<FetchError>(), Some(&FetchError("timeout".into())));

        let slot = store.get_value().error.clone().unwrap();
        assert!(Arc::ptr_eq(&returned, &slot));

        let ok = set_error(&store, async { Ok::<_, FetchError>(1) }).await;
        assert_eq!(ok.ok(), Some(1));
    }

    #[tokio::test]
    async fn test_use_cache_skips_producer_when_valid() {
        let store = store();
        let calls = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&calls);
        let first = use_cache(&store, || async move {
            *counter.lock() += 1;
            vec![json!({ "id": 1 })]
        })
        .await;
        let list = first.fresh().unwrap();
        store.set(list);
        assert!(store.has_cache());

        let counter = Arc::clone(&calls);
        let second = use_cache(&store, || async move {
            *counter.lock() += 1;
            Vec::<Value>::new()
        })
        .await;
        assert!(second.is_hit());
        assert_eq!(second.hit().unwrap().entities.len(), 1);
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_plain_store_target() {
        let store = Store::new(StoreConfig::new("counter", 0u32)).unwrap();
        let result = set_loading(&store, async { Ok::<_, FetchError>(1u32) }).await;
        store.set_state(result.unwrap());
        assert!(!store.get_loading());
        let cached = use_cache(&store, || async { 5u32 }).await;
        assert_eq!(cached, Cached::Fresh(5));
    }
}
