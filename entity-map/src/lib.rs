//! Normalized Entity Map
//!
//! An insertion-ordered, keyed collection of entities with a merge/upsert
//! algebra and copy-on-write snapshots. This crate has no notion of
//! observation; the reactive store in `entity-store` is built on top of it.
//!
//! # Features
//!
//! - **Pluggable identifiers**: resolve keys by property, dotted path or closure
//! - **Merge algebra**: merge, upsert, update and remove with shallow, deep or
//!   custom merge strategies
//! - **Copy-on-write**: pure operations on `Arc<StMap>` return the same `Arc`
//!   when nothing changed
//! - **Views**: filter, map, order, search and limit without touching the source
//!
//! # Quick Start
//!
//! ```rust
//! use entity_map::{Id, IdGetter, Select, StMap};
//! use serde_json::json;
//!
//! let mut map = StMap::new(IdGetter::default()).unwrap();
//! map.from_array(vec![json!({ "id": 1, "name": "A" }), json!({ "id": 2, "name": "B" })]);
//!
//! assert_eq!(map.len(), 2);
//! assert_eq!(**map.get(&Id::from(1)).unwrap(), json!({ "id": 1, "name": "A" }));
//!
//! map.remove(&Select::ids([1, 2]));
//! assert!(map.is_empty());
//! ```

// Modules
pub mod error;
pub mod id;
pub mod map;
pub mod record;
pub mod search;
pub mod select;

// Re-exports - Public API
pub use error::{MapError, Result};
pub use id::{Id, IdFn, IdGetter, DEFAULT_ID_KEY};
pub use map::StMap;
pub use record::{entities_eq, entity_eq, option_entity_eq, EqFn, MergeFn, MergeStrategy, Record};
pub use select::{
    compare_values, CompareFn, Direction, FilterBy, OrderBy, Patch, Predicate, SearchBy, Select,
    TextFn, TransformFn,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::id::{Id, IdGetter};
    pub use crate::map::StMap;
    pub use crate::record::{MergeStrategy, Record};
    pub use crate::select::{Direction, FilterBy, OrderBy, Patch, SearchBy, Select};
}
