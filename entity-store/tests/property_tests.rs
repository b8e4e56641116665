//! Property-based tests for the entity store
//!
//! These tests exercise the guarantees every published snapshot must keep:
//! an active set that only names stored entities, at most one emission per
//! mutation, and no emission for an upsert that changes nothing. The
//! collection-level properties live in `entity-map/tests`.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

use entity_map::{Id, Select};
use entity_store::{ActiveRef, EntityStore, EntityStoreConfig, RuntimeMode};
use parking_lot::Mutex;

// ============================================================================
// Test Helpers
// ============================================================================

fn todo(id: i64, title: &str) -> Value {
    json!({ "id": id, "title": title })
}

fn dev_store() -> EntityStore<Value> {
    EntityStore::new(EntityStoreConfig::new("props").with_mode(RuntimeMode::Development)).unwrap()
}

/// Count emissions of the store's state stream, excluding the replayed one
fn emission_counter(store: &EntityStore<Value>) -> (Arc<Mutex<usize>>, entity_store::Subscription) {
    let count = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&count);
    let sub = store.observable().subscribe(move |_| *sink.lock() += 1);
    *count.lock() = 0;
    (count, sub)
}

/// Strategy for entities drawn from a small id space so duplicates are common
fn todo_strategy() -> impl Strategy<Value = (i64, String)> {
    (0i64..20, "[a-z]{1,8}")
}

fn todos_strategy() -> impl Strategy<Value = Vec<(i64, String)>> {
    prop::collection::vec(todo_strategy(), 0..40)
}

fn ids_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..20, 0..10)
}

// ============================================================================
// Active set only names stored entities
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Removing any ids never leaves a dangling active id, and each remove
    /// publishes at most one snapshot.
    #[test]
    fn prop_active_subset_of_entities(
        todos in todos_strategy(),
        active in ids_strategy(),
        removals in prop::collection::vec(ids_strategy(), 0..5),
    ) {
        let store = dev_store();
        store.set(todos.iter().map(|(id, title)| todo(*id, title)));
        store.set_active(ActiveRef::ids(active));

        let (emissions, _sub) = emission_counter(&store);
        for batch in removals {
            let before = *emissions.lock();
            store.remove(Select::ids(batch));
            prop_assert!(*emissions.lock() - before <= 1);

            let state = store.get_value();
            let keys: HashSet<Id> = state.entities.keys_array().into_iter().collect();
            for id in state.active.iter() {
                prop_assert!(keys.contains(id), "dangling active id {}", id);
            }
            prop_assert!(state.check_invariants().is_ok());
        }
    }
}

// ============================================================================
// Idempotent upserts
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Upserting the same partial twice changes the store only once.
    #[test]
    fn prop_upsert_is_idempotent((id, title) in todo_strategy(), todos in todos_strategy()) {
        let store = dev_store();
        store.set(todos.iter().map(|(id, title)| todo(*id, title)));

        store.upsert(id, todo(id, &title));
        let after_first = store.get_value();
        let (emissions, _sub) = emission_counter(&store);

        store.upsert(id, todo(id, &title));
        prop_assert_eq!(*emissions.lock(), 0);
        let state = store.get_value();
        prop_assert!(Arc::ptr_eq(&after_first, &state));
        let stored = state.entities.get(&Id::from(id)).cloned();
        let expected = todo(id, &title);
        prop_assert_eq!(stored.as_deref(), Some(&expected));
    }
}
