//! Reactive Entity Store
//!
//! Observable stores built on the [`entity_map`] collection. An
//! [`EntityStore`] holds a normalized collection of entities plus an ordered
//! active set and loading/error/cache flags; every mutation produces a new
//! immutable snapshot and notifies subscribers exactly once.
//!
//! # Features
//!
//! - **Entity operations**: set, add, update, upsert, replace, map and remove
//!   with pluggable id resolution and merge strategy
//! - **Active set**: single or multi selection that never points at a removed
//!   entity
//! - **Distinct queries**: [`EntityQuery`] streams only emit when the selected
//!   value changes
//! - **Cache flag**: time-limited validity with automatic expiry
//! - **Operators**: tie async producers to loading, error and cache flags
//!
//! # Quick Start
//!
//! ```rust
//! use entity_store::{EntityQuery, EntityStore, EntityStoreConfig};
//! use parking_lot::Mutex;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! let store: EntityStore<Value> = EntityStore::new(EntityStoreConfig::new("todos")).unwrap();
//! let query = EntityQuery::new(&store);
//!
//! let titles = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&titles);
//! let _sub = query
//!     .select_entity_field(1, "title")
//!     .subscribe(move |title| sink.lock().push(title.clone()));
//!
//! store.set(vec![json!({ "id": 1, "title": "write" })]);
//! store.update(1, json!({ "done": true }));
//! store.update(1, json!({ "title": "ship" }));
//!
//! assert_eq!(
//!     *titles.lock(),
//!     vec![None, Some(json!("write")), Some(json!("ship"))]
//! );
//! ```
//!
//! # Iteration Patterns
//!
//! ```rust,ignore
//! // Blocking iteration over every change
//! for count in query.select_count().changes() {
//!     println!("{count} todos");
//! }
//!
//! // Drain whatever has been emitted so far
//! let changes = query.select_active_ids().changes();
//! for ids in changes.try_iter() {
//!     println!("active: {ids:?}");
//! }
//! ```

// Modules
mod cache;
pub mod config;
pub mod entity_query;
pub mod entity_store;
pub mod error;
pub mod hooks;
pub mod iter;
pub mod logging;
pub mod observable;
pub mod operators;
pub mod persist;
pub mod query;
pub mod state;
pub mod store;

// Re-exports - Public API
pub use config::{CacheSettings, EntityStoreConfig, RuntimeMode, StoreConfig};
pub use entity_query::{EntityQuery, SelectOptions};
pub use entity_store::EntityStore;
pub use error::{same_error, share_error, Result, SharedError, StoreError};
pub use hooks::{DefaultHooks, EntityHooks};
pub use iter::{ChangeIterator, TimeoutIter, TryIter};
pub use logging::{init_logging, init_logging_from_env, init_silent, is_initialized, LoggingError, LoggingMode};
pub use observable::{Callback, Observable, Subject, Subscription};
pub use operators::{set_error, set_loading, use_cache, Cached, StatusTarget};
pub use persist::{MemoryStorage, PersistStorage, Persistence};
pub use query::Query;
pub use state::{ActiveRef, EntityState, Transition};
pub use store::Store;

// Re-export the collection crate for callers that only depend on this one
pub use entity_map;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{EntityStoreConfig, RuntimeMode, StoreConfig};
    pub use crate::entity_query::{EntityQuery, SelectOptions};
    pub use crate::entity_store::EntityStore;
    pub use crate::hooks::EntityHooks;
    pub use crate::observable::{Observable, Subscription};
    pub use crate::query::Query;
    pub use crate::state::{ActiveRef, EntityState};
    pub use crate::store::Store;
    pub use entity_map::prelude::*;
}
