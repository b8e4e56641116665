//! Entity store: a keyed collection plus an active set
//!
//! Every public mutation reads the current snapshot, assembles a
//! [`Transition`], lets the configured hooks adjust it and publishes the
//! result as one new snapshot. Calls that change nothing publish nothing.
//!
//! ```text
//!   update(id, patch)
//!        │
//!        ├─► pre_update per entity
//!        ├─► Transition { entities', active }
//!        ├─► post_update(tx, changed ids)
//!        ├─► invariant check (development)
//!        └─► state.next(snapshot)   ── one emission
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use entity_map::{EqFn, Id, IdGetter, Patch, Record, Select, StMap};
use indexmap::IndexSet;
use parking_lot::ReentrantMutex;
use tracing::{debug, trace};

use crate::cache::CacheFlag;
use crate::config::{EntityStoreConfig, RuntimeMode};
use crate::error::{same_error, Result, SharedError};
use crate::hooks::EntityHooks;
use crate::observable::{Observable, Subject};
use crate::state::{ActiveRef, EntityState, Transition};

struct EntityInner<T> {
    name: String,
    state: Subject<Arc<EntityState<T>>>,
    cache: CacheFlag,
    hooks: Arc<dyn EntityHooks<T>>,
    equality: Option<EqFn<T>>,
    mode: RuntimeMode,
    initial: Arc<EntityState<T>>,
    destroyed: AtomicBool,
    write: ReentrantMutex<()>,
}

/// Store for a collection of entities and the subset that is active
///
/// Clones are handles to the same store. Mutations are synchronous: when a
/// call returns, every subscriber has already seen the new snapshot.
///
/// # Example
///
/// ```rust
/// use entity_store::{EntityStore, EntityStoreConfig};
/// use entity_map::Id;
/// use serde_json::json;
///
/// let store = EntityStore::new(
///     EntityStoreConfig::new("todos").with_entities(vec![json!({ "id": 1 }), json!({ "id": 2 })]),
/// )
/// .unwrap();
///
/// store.set_active(1);
/// store.remove(1);
/// assert!(!store.get_value().active.contains(&Id::from(1)));
/// ```
pub struct EntityStore<T> {
    inner: Arc<EntityInner<T>>,
}

impl<T: Record> EntityStore<T> {
    /// Build a store from its configuration
    ///
    /// Fails if the configuration is invalid, or, in development mode, if the
    /// seed entities don't resolve to their keys.
    pub fn new(config: EntityStoreConfig<T>) -> Result<Self> {
        config.validate()?;
        let EntityStoreConfig {
            name,
            id_getter,
            initial_entities,
            initial_object,
            initial_active,
            cache_ttl,
            merge,
            equality,
            hooks,
            mode,
        } = config;

        let seeded = !initial_entities.is_empty() || !initial_object.is_empty();
        let mut entities = StMap::new(id_getter)?.with_merge(merge);
        if initial_object.is_empty() {
            entities.from_array(initial_entities);
        } else {
            entities.from_object(initial_object);
        }
        let active: IndexSet<Id> = initial_active.into_iter().filter(|id| entities.has(id)).collect();

        let mut initial = EntityState::new(entities, active);
        initial.loading = !seeded;
        if mode.is_development() {
            initial.check_invariants()?;
        }

        debug!(
            store = %name,
            entities = initial.entities.len(),
            active = initial.active.len(),
            ?mode,
            "Created entity store"
        );

        let initial = Arc::new(initial);
        Ok(Self {
            inner: Arc::new(EntityInner {
                name,
                state: Subject::new(Arc::clone(&initial)),
                cache: CacheFlag::new(cache_ttl),
                hooks,
                equality,
                mode,
                initial,
                destroyed: AtomicBool::new(false),
                write: ReentrantMutex::new(()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn mode(&self) -> RuntimeMode {
        self.inner.mode
    }

    /// Current snapshot
    pub fn get_value(&self) -> Arc<EntityState<T>> {
        self.inner.state.value()
    }

    /// Stream of snapshots, starting with the current one
    pub fn observable(&self) -> Observable<Arc<EntityState<T>>> {
        self.inner.state.observable()
    }

    pub fn id_getter(&self) -> IdGetter<T> {
        self.get_value().entities.id_getter().clone()
    }

    pub(crate) fn equality(&self) -> Option<EqFn<T>> {
        self.inner.equality.clone()
    }

    fn transition(&self, op: &'static str, build: impl FnOnce(&Arc<EntityState<T>>) -> Option<EntityState<T>>) {
        if self.is_destroyed() {
            trace!(store = %self.inner.name, op, "Ignoring mutation on destroyed store");
            return;
        }
        let _write = self.inner.write.lock();
        let current = self.inner.state.value();
        let next = match build(&current) {
            Some(next) if !next.same_as(&current) => next,
            _ => {
                trace!(store = %self.inner.name, op, "No change");
                return;
            }
        };
        if self.inner.mode.is_development() {
            if let Err(e) = next.check_invariants() {
                panic!("{op} on store '{}' broke an invariant: {e}", self.inner.name);
            }
        }
        debug!(
            store = %self.inner.name,
            op,
            entities = next.entities.len(),
            active = next.active.len(),
            loading = next.loading,
            "State transition"
        );
        self.inner.state.next(Arc::new(next));
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Replace the whole collection
    ///
    /// Also clears the loading flag and, when a cache TTL is configured,
    /// marks the cache valid.
    pub fn set(&self, entities: impl IntoIterator<Item = T>) {
        let hooks = Arc::clone(&self.inner.hooks);
        self.transition("set", |current| {
            let mut map = current.entities.empty_like();
            map.from_array(entities.into_iter().map(|e| hooks.pre_add(e)));
            Some(Self::finish_set(current, map, hooks.as_ref()))
        });
        self.set_has_cache(true);
    }

    /// Replace the whole collection from already-keyed entries
    ///
    /// See [`StMap::from_object`] for how keys are typed.
    pub fn set_object(&self, entries: impl IntoIterator<Item = (String, T)>) {
        let hooks = Arc::clone(&self.inner.hooks);
        self.transition("set_object", |current| {
            let mut map = current.entities.empty_like();
            map.from_object(entries.into_iter().map(|(k, e)| (k, hooks.pre_add(e))));
            Some(Self::finish_set(current, map, hooks.as_ref()))
        });
        self.set_has_cache(true);
    }

    fn finish_set(current: &Arc<EntityState<T>>, map: StMap<T>, hooks: &dyn EntityHooks<T>) -> EntityState<T> {
        let mut tx = Transition::new(current);
        tx.set_entities(Arc::new(map));
        hooks.post_set(&mut tx);
        let mut next = tx.finish().unwrap_or_else(|| (**current).clone());
        next.loading = false;
        next
    }

    /// Insert new entities and merge into existing ones
    ///
    /// Existing keys are merged with the configured [`MergeStrategy`](entity_map::MergeStrategy); every
    /// resolved id is passed to `post_add`. Entities without an id are skipped.
    pub fn add(&self, entities: impl IntoIterator<Item = T>) {
        let hooks = Arc::clone(&self.inner.hooks);
        self.transition("add", |current| {
            let mut map = (*current.entities).clone();
            let mut added = Vec::new();
            let mut changed = false;
            for entity in entities {
                let entity = hooks.pre_add(entity);
                let Some(id) = map.resolve_id(&entity) else {
                    trace!(store = %self.inner.name, "Skipping add of entity without id");
                    continue;
                };
                match map.get(&id).cloned() {
                    Some(before) => {
                        map.update(&id, &Patch::Merge(entity));
                        changed |= map.get(&id).is_some_and(|after| !Arc::ptr_eq(&before, after));
                    }
                    None => {
                        map.set(id.clone(), entity);
                        changed = true;
                    }
                }
                added.push(id);
            }
            if !changed {
                return None;
            }
            let mut tx = Transition::new(current);
            tx.set_entities(Arc::new(map));
            hooks.post_add(&mut tx, &added);
            tx.finish()
        });
    }

    /// Change the targeted entities
    ///
    /// Targets that don't exist are ignored; results shallowly equal to the
    /// stored entity leave it untouched.
    pub fn update(&self, select: impl Into<Select<T>>, patch: impl Into<Patch<T>>) {
        let select = select.into();
        let patch = patch.into();
        let hooks = Arc::clone(&self.inner.hooks);
        self.transition("update", |current| {
            let ids = current.entities.matching_ids(&select);
            let (map, changed) = Self::apply_updates(&current.entities, &ids, &patch, hooks.as_ref())?;
            let mut tx = Transition::new(current);
            tx.set_entities(Arc::new(map));
            hooks.post_update(&mut tx, &changed);
            tx.finish()
        });
    }

    /// Change every entity matching the predicate
    pub fn update_where(
        &self,
        predicate: impl Fn(&T, &Id) -> bool + Send + Sync + 'static,
        patch: impl Into<Patch<T>>,
    ) {
        self.update(Select::by(predicate), patch);
    }

    fn apply_updates(
        entities: &StMap<T>,
        ids: &[Id],
        patch: &Patch<T>,
        hooks: &dyn EntityHooks<T>,
    ) -> Option<(StMap<T>, Vec<Id>)> {
        let mut map: Option<StMap<T>> = None;
        let mut changed = Vec::new();
        for id in ids {
            let Some(current) = entities.get(id) else {
                continue;
            };
            let next = match patch {
                Patch::Merge(partial) => entities.merge_strategy().apply(current, partial),
                Patch::With(f) => f(current),
            };
            let next = hooks.pre_update(current, next);
            if next.shallow_eq(current) {
                continue;
            }
            map.get_or_insert_with(|| entities.clone()).replace(id, next);
            changed.push(id.clone());
        }
        map.map(|map| (map, changed))
    }

    /// Merge `partial` into `id`, or insert it when absent
    ///
    /// An absent key is only inserted when `partial` resolves to it.
    pub fn upsert(&self, id: impl Into<Id>, partial: T) {
        self.upsert_entries("upsert", vec![(id.into(), partial)], None);
    }

    /// Merge `partial` into `id`, or insert `create(id, partial)` when absent
    pub fn upsert_with(&self, id: impl Into<Id>, partial: T, create: impl Fn(&Id, &T) -> T) {
        self.upsert_entries("upsert", vec![(id.into(), partial)], Some(&create));
    }

    /// Upsert a batch under each entity's own key, in one emission
    ///
    /// Entities without a resolvable key are dropped.
    pub fn upsert_many(&self, entities: impl IntoIterator<Item = T>) {
        let id_getter = self.id_getter();
        let entries = entities
            .into_iter()
            .filter_map(|entity| match id_getter.resolve(&entity) {
                Some(id) => Some((id, entity)),
                None => {
                    trace!(store = %self.inner.name, "Dropping upsert entry without id");
                    None
                }
            })
            .collect();
        self.upsert_entries("upsert_many", entries, None);
    }

    fn upsert_entries(&self, op: &'static str, entries: Vec<(Id, T)>, create: Option<&dyn Fn(&Id, &T) -> T>) {
        if entries.is_empty() {
            return;
        }
        let hooks = Arc::clone(&self.inner.hooks);
        self.transition(op, |current| {
            let mut map = (*current.entities).clone();
            let mut affected = Vec::new();
            for (id, partial) in entries {
                if let Some(existing) = map.get(&id).cloned() {
                    let next = map.merge_strategy().apply(&existing, &partial);
                    let next = hooks.pre_update(&existing, next);
                    if !next.shallow_eq(&existing) {
                        map.replace(&id, next);
                        affected.push(id);
                    }
                    continue;
                }
                let entity = match create {
                    Some(create) => create(&id, &partial),
                    None => partial,
                };
                if map.resolve_id(&entity).as_ref() != Some(&id) {
                    trace!(store = %self.inner.name, id = %id, "Dropping upsert of new entity that does not carry its id");
                    continue;
                }
                map.set(id.clone(), hooks.pre_add(entity));
                affected.push(id);
            }
            if affected.is_empty() {
                return None;
            }
            let mut tx = Transition::new(current);
            tx.set_entities(Arc::new(map));
            hooks.post_upsert(&mut tx, &affected);
            tx.finish()
        });
    }

    /// Replace one entity wholesale, without merging
    pub fn replace(&self, id: impl Into<Id>, entity: T) {
        let id = id.into();
        let hooks = Arc::clone(&self.inner.hooks);
        self.transition("replace", |current| {
            if !current.entities.has(&id) {
                return None;
            }
            let mut tx = Transition::new(current);
            tx.set_entities(current.entities.replaced(&id, Arc::new(entity)));
            hooks.post_update(&mut tx, std::slice::from_ref(&id));
            tx.finish()
        });
    }

    /// Apply `f` to every entity, keeping keys and order
    pub fn map(&self, f: impl Fn(&T, &Id) -> T) {
        let hooks = Arc::clone(&self.inner.hooks);
        self.transition("map", |current| {
            let next = current.entities.transformed(f);
            if Arc::ptr_eq(&next, &current.entities) {
                return None;
            }
            let changed: Vec<Id> = next
                .entries()
                .filter(|(id, e)| !current.entities.get(id).is_some_and(|old| Arc::ptr_eq(old, e)))
                .map(|(id, _)| id.clone())
                .collect();
            let mut tx = Transition::new(current);
            tx.set_entities(next);
            hooks.post_update(&mut tx, &changed);
            tx.finish()
        });
    }

    /// Remove the targeted entities and drop them from the active set
    pub fn remove(&self, select: impl Into<Select<T>>) {
        let select = select.into();
        let hooks = Arc::clone(&self.inner.hooks);
        self.transition("remove", |current| {
            let removed = current.entities.matching_ids(&select);
            if removed.is_empty() {
                return None;
            }
            let mut tx = Transition::new(current);
            tx.set_entities(current.entities.removed(&Select::Ids(removed.clone())));
            hooks.post_remove(&mut tx, &removed);
            tx.finish()
        });
    }

    /// Remove every entity matching the predicate
    pub fn remove_where(&self, predicate: impl Fn(&T, &Id) -> bool + Send + Sync + 'static) {
        self.remove(Select::by(predicate));
    }

    /// Remove every entity
    pub fn remove_all(&self) {
        self.remove(Select::by(|_, _| true));
    }

    /// Remove every currently active entity
    pub fn remove_active_entities(&self) {
        let active: Vec<Id> = self.get_value().active.iter().cloned().collect();
        if active.is_empty() {
            return;
        }
        self.remove(Select::Ids(active));
    }

    // ========================================================================
    // Active set
    // ========================================================================

    /// Make exactly the referenced entities active
    ///
    /// References to absent entities are skipped.
    pub fn set_active(&self, target: impl Into<ActiveRef<T>>) {
        let target = target.into();
        self.transition("set_active", |current| {
            let mut tx = Transition::new(current);
            tx.set_active(target.resolve(&current.entities));
            tx.finish()
        });
    }

    pub fn add_active(&self, target: impl Into<ActiveRef<T>>) {
        let target = target.into();
        self.transition("add_active", |current| {
            let mut tx = Transition::new(current);
            tx.add_active(target.resolve(&current.entities));
            tx.finish()
        });
    }

    pub fn remove_active(&self, target: impl Into<ActiveRef<T>>) {
        let target = target.into();
        self.transition("remove_active", |current| {
            let mut tx = Transition::new(current);
            tx.remove_active(&target.resolve(&current.entities));
            tx.finish()
        });
    }

    /// Flip membership of each referenced entity in the active set
    pub fn toggle_active(&self, target: impl Into<ActiveRef<T>>) {
        let target = target.into();
        self.transition("toggle_active", |current| {
            let (on, off): (Vec<Id>, Vec<Id>) = target
                .resolve(&current.entities)
                .into_iter()
                .partition(|id| !current.active.contains(id));
            let mut tx = Transition::new(current);
            tx.remove_active(&off);
            tx.add_active(on);
            tx.finish()
        });
    }

    pub fn clear_active(&self) {
        self.transition("clear_active", |current| {
            let mut tx = Transition::new(current);
            tx.set_active(std::iter::empty());
            tx.finish()
        });
    }

    /// Move a single active entity to the next one in collection order
    ///
    /// A no-op unless exactly one entity is active. At the end of the
    /// collection, `wrap` continues from the start.
    pub fn set_active_next(&self, wrap: bool) {
        self.step_active("set_active_next", wrap, true);
    }

    /// Move a single active entity to the previous one in collection order
    pub fn set_active_prev(&self, wrap: bool) {
        self.step_active("set_active_prev", wrap, false);
    }

    fn step_active(&self, op: &'static str, wrap: bool, forward: bool) {
        self.transition(op, |current| {
            if current.active.len() != 1 {
                trace!(store = %self.inner.name, active = current.active.len(), "Stepping needs exactly one active entity");
                return None;
            }
            let index = current.entities.index_of(current.active.first()?)?;
            let len = current.entities.len();
            let target = match (forward, index + 1 == len, index == 0) {
                (true, false, _) => index + 1,
                (true, true, _) if wrap => 0,
                (false, _, false) => index - 1,
                (false, _, true) if wrap => len - 1,
                _ => return None,
            };
            let (id, _) = current.entities.get_index(target)?;
            let mut tx = Transition::new(current);
            tx.set_active([id.clone()]);
            tx.finish()
        });
    }

    /// Drop active ids that no longer name an entity
    pub fn sync_active(&self) {
        self.transition("sync_active", |current| {
            let mut tx = Transition::new(current);
            tx.sync_active();
            tx.finish()
        });
    }

    // ========================================================================
    // Flags
    // ========================================================================

    pub fn set_loading(&self, loading: bool) {
        self.transition("set_loading", |current| {
            (current.loading != loading).then(|| EntityState {
                loading,
                ..(**current).clone()
            })
        });
    }

    pub fn set_error(&self, error: Option<SharedError>) {
        self.transition("set_error", |current| {
            (!same_error(&current.error, &error)).then(|| EntityState {
                error,
                ..(**current).clone()
            })
        });
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

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Return to the snapshot the store was built with
    pub fn reset(&self) {
        if self.is_destroyed() {
            return;
        }
        self.inner.cache.reset();
        let initial = Arc::clone(&self.inner.initial);
        self.transition("reset", |_| Some((*initial).clone()));
    }

    /// Complete every stream and make the store inert
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(store = %self.inner.name, "Destroying entity store");
        self.inner.cache.close();
        self.inner.state.complete();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }
}

impl<T> Clone for EntityStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for EntityStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("name", &self.inner.name)
            .field("mode", &self.inner.mode)
            .field("destroyed", &self.inner.destroyed.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{share_error, StoreError};
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    fn store(ids: &[i64]) -> EntityStore<Value> {
        let entities = ids.iter().map(|id| json!({ "id": id, "name": format!("e{id}") }));
        EntityStore::new(EntityStoreConfig::new("test").with_entities(entities)).unwrap()
    }

    fn emissions(store: &EntityStore<Value>) -> (Arc<Mutex<usize>>, crate::Subscription) {
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        let sub = store.observable().subscribe(move |_| *sink.lock() += 1);
        *count.lock() = 0;
        (count, sub)
    }

    fn active_ids(store: &EntityStore<Value>) -> Vec<Id> {
        store.get_value().active.iter().cloned().collect()
    }

    #[test]
    fn test_seeded_store_is_not_loading() {
        assert!(!store(&[1]).get_value().loading);
        assert!(store(&[]).get_value().loading);
    }

    #[test]
    fn test_set_replaces_and_clears_loading() {
        let s = store(&[]);
        s.set(vec![json!({ "id": 3 }), json!({ "id": 4 })]);
        let state = s.get_value();
        assert_eq!(state.entities.keys_array(), vec![Id::from(3), Id::from(4)]);
        assert!(!state.loading);
    }

    #[test]
    fn test_set_drops_stale_active() {
        let s = store(&[1, 2]);
        s.set_active(ActiveRef::ids([1, 2]));
        s.set(vec![json!({ "id": 2 })]);
        assert_eq!(active_ids(&s), vec![Id::from(2)]);
    }

    #[test]
    fn test_add_merges_existing() {
        let s = store(&[1]);
        let (count, _sub) = emissions(&s);
        s.add(vec![json!({ "id": 1, "other": "T" }), json!({ "id": 2 })]);
        let state = s.get_value();
        assert_eq!(state.entities.keys_array(), vec![Id::from(1), Id::from(2)]);
        assert_eq!(**state.entities.get(&Id::from(1)).unwrap(), json!({ "id": 1, "name": "e1", "other": "T" }));
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_add_existing_unchanged_does_not_emit() {
        let s = store(&[1]);
        let (count, _sub) = emissions(&s);
        s.add(vec![json!({ "id": 1, "name": "e1" })]);
        assert_eq!(*count.lock(), 0);
    }

    #[test]
    fn test_noop_mutations_do_not_emit() {
        let s = store(&[1]);
        let before = s.get_value();
        let (count, _sub) = emissions(&s);
        s.update(9, json!({ "name": "x" }));
        s.remove(9);
        s.add(Vec::new());
        s.upsert_many(Vec::new());
        s.update(1, json!({ "name": "e1" }));
        s.set_active(42);
        assert_eq!(*count.lock(), 0);
        assert!(Arc::ptr_eq(&before, &s.get_value()));
    }

    #[test]
    fn test_update_merges_partial() {
        let s = store(&[1, 2]);
        let untouched = Arc::clone(s.get_value().entities.get(&Id::from(2)).unwrap());
        s.update(1, json!({ "done": true }));
        let state = s.get_value();
        assert_eq!(**state.entities.get(&Id::from(1)).unwrap(), json!({ "id": 1, "name": "e1", "done": true }));
        assert!(Arc::ptr_eq(state.entities.get(&Id::from(2)).unwrap(), &untouched));
    }

    #[test]
    fn test_update_where_with_transform() {
        let s = store(&[1, 2, 3]);
        s.update_where(
            |e: &Value, _| e["id"].as_i64().is_some_and(|id| id > 1),
            Patch::with(|e: &Value| {
                let mut e = e.clone();
                e["big"] = json!(true);
                e
            }),
        );
        let state = s.get_value();
        assert!(state.entities.get(&Id::from(1)).unwrap().get("big").is_none());
        assert_eq!(state.entities.get(&Id::from(3)).unwrap()["big"], true);
    }

    #[test]
    fn test_upsert_inserts_only_with_matching_id() {
        let s = store(&[1]);
        s.upsert(2, json!({ "name": "no id" }));
        assert!(!s.get_value().entities.has(&Id::from(2)));

        s.upsert(2, json!({ "id": 2, "name": "two" }));
        assert!(s.get_value().entities.has(&Id::from(2)));

        s.upsert_with(3, json!({ "name": "three" }), |id, partial| {
            let mut e = partial.clone();
            e["id"] = id.to_value();
            e
        });
        assert_eq!(s.get_value().entities.get(&Id::from(3)).unwrap()["name"], "three");
    }

    #[test]
    fn test_upsert_many_single_emission() {
        let s = store(&[1]);
        let (count, _sub) = emissions(&s);
        s.upsert_many(vec![
            json!({ "id": 1, "other": "T" }),
            json!({ "id": 2 }),
            json!({ "missing": "id" }),
        ]);
        assert_eq!(*count.lock(), 1);
        let state = s.get_value();
        assert_eq!(**state.entities.get(&Id::from(1)).unwrap(), json!({ "id": 1, "name": "e1", "other": "T" }));
        assert_eq!(state.entities.len(), 2);
    }

    #[test]
    fn test_replace_does_not_merge() {
        let s = store(&[1]);
        s.replace(1, json!({ "id": 1 }));
        assert_eq!(**s.get_value().entities.get(&Id::from(1)).unwrap(), json!({ "id": 1 }));
        s.replace(5, json!({ "id": 5 }));
        assert!(!s.get_value().entities.has(&Id::from(5)));
    }

    #[test]
    fn test_map_transforms_all() {
        let s = store(&[1, 2]);
        s.map(|e, id| {
            let mut e = e.clone();
            e["label"] = json!(id.to_string());
            e
        });
        assert_eq!(s.get_value().entities.get(&Id::from(2)).unwrap()["label"], "2");
    }

    #[test]
    fn test_remove_cleans_active_in_one_emission() {
        let s = store(&[1, 2]);
        s.set_active(1);
        let (count, _sub) = emissions(&s);
        s.remove(1);
        assert_eq!(*count.lock(), 1);
        assert!(active_ids(&s).is_empty());
        assert!(!s.get_value().entities.has(&Id::from(1)));
    }

    #[test]
    fn test_remove_active_entities() {
        let s = store(&[1, 2, 3]);
        s.set_active(ActiveRef::ids([1, 3]));
        s.remove_active_entities();
        assert_eq!(s.get_value().entities.keys_array(), vec![Id::from(2)]);
        assert!(!s.get_value().has_active());
    }

    #[test]
    fn test_active_ops() {
        let s = store(&[1, 2, 3]);
        s.set_active(ActiveRef::ids([1, 99]));
        assert_eq!(active_ids(&s), vec![Id::from(1)]);

        s.add_active(ActiveRef::ids([3, 2]));
        assert_eq!(active_ids(&s), vec![Id::from(1), Id::from(3), Id::from(2)]);

        s.remove_active(3);
        s.toggle_active(ActiveRef::ids([1, 3]));
        assert_eq!(active_ids(&s), vec![Id::from(2), Id::from(3)]);

        s.set_active(ActiveRef::entity(json!({ "id": 2 })));
        assert_eq!(active_ids(&s), vec![Id::from(2)]);

        s.clear_active();
        assert!(active_ids(&s).is_empty());
    }

    #[test]
    fn test_step_active() {
        let s = store(&[1, 2, 3]);
        s.set_active_next(true);
        assert!(active_ids(&s).is_empty());

        s.set_active(3);
        s.set_active_next(false);
        assert_eq!(active_ids(&s), vec![Id::from(3)]);
        s.set_active_next(true);
        assert_eq!(active_ids(&s), vec![Id::from(1)]);
        s.set_active_prev(false);
        assert_eq!(active_ids(&s), vec![Id::from(1)]);
        s.set_active_prev(true);
        assert_eq!(active_ids(&s), vec![Id::from(3)]);
        s.set_active_prev(true);
        assert_eq!(active_ids(&s), vec![Id::from(2)]);
    }

    #[test]
    fn test_flags_emit_once_each() {
        let s = store(&[1]);
        let (count, _sub) = emissions(&s);
        s.set_loading(true);
        s.set_loading(true);
        let err = share_error(StoreError::Persistence("offline".into()));
        s.set_error(Some(Arc::clone(&err)));
        s.set_error(Some(err));
        assert_eq!(*count.lock(), 2);
        let state = s.get_value();
        assert!(state.loading && state.error.is_some());
    }

    #[test]
    fn test_reset_restores_seed() {
        let s = EntityStore::new(
            EntityStoreConfig::new("test")
                .with_entities(vec![json!({ "id": 1 }), json!({ "id": 2 })])
                .with_active([2]),
        )
        .unwrap();
        s.remove(2);
        s.add(vec![json!({ "id": 7 })]);
        s.reset();
        let state = s.get_value();
        assert_eq!(state.entities.keys_array(), vec![Id::from(1), Id::from(2)]);
        assert_eq!(active_ids(&s), vec![Id::from(2)]);
    }

    #[test]
    fn test_destroy_makes_store_inert() {
        let s = store(&[1]);
        let sub = s.observable().subscribe(|_| {});
        s.destroy();
        assert!(sub.is_closed());
        s.add(vec![json!({ "id": 2 })]);
        assert_eq!(s.get_value().entities.len(), 1);
    }

    #[test]
    fn test_custom_hooks() {
        struct ActivateNew;
        impl EntityHooks<Value> for ActivateNew {
            fn pre_add(&self, mut entity: Value) -> Value {
                entity["created"] = json!(true);
                entity
            }
            fn post_add(&self, tx: &mut Transition<Value>, ids: &[Id]) {
                tx.add_active(ids.iter().cloned());
            }
        }

        let s = EntityStore::new(EntityStoreConfig::new("test").with_hooks(ActivateNew)).unwrap();
        let (count, _sub) = emissions(&s);
        s.add(vec![json!({ "id": 1 })]);
        assert_eq!(*count.lock(), 1);
        assert_eq!(active_ids(&s), vec![Id::from(1)]);
        assert_eq!(s.get_value().entities.get(&Id::from(1)).unwrap()["created"], true);
    }

    #[test]
    #[should_panic(expected = "broke an invariant")]
    fn test_development_mode_catches_key_drift() {
        let s = EntityStore::new(
            EntityStoreConfig::new("test")
                .with_entities(vec![json!({ "id": 1 })])
                .with_mode(RuntimeMode::Development),
        )
        .unwrap();
        s.replace(1, json!({ "id": 2 }));
    }

    #[test]
    fn test_object_keyed_collection_passes_development_checks() {
        let zero_padded = || {
            vec![
                ("1".to_string(), json!({ "id": 1 })),
                ("007".to_string(), json!({ "id": "007" })),
            ]
        };
        let seeded = EntityStore::<Value>::new(
            EntityStoreConfig::new("test")
                .with_object(zero_padded())
                .with_mode(RuntimeMode::Development),
        )
        .unwrap();
        assert!(seeded.get_value().entities.has(&Id::from(7)));

        let s = EntityStore::<Value>::new(EntityStoreConfig::new("test").with_mode(RuntimeMode::Development)).unwrap();
        s.set_object(zero_padded());
        let state = s.get_value();
        assert_eq!(state.entities.keys_array(), vec![Id::from(1), Id::from(7)]);
        assert!(!state.loading);
    }

    #[test]
    fn test_production_mode_skips_checks() {
        let s = EntityStore::new(
            EntityStoreConfig::new("test")
                .with_entities(vec![json!({ "id": 1 })])
                .with_mode(RuntimeMode::Production),
        )
        .unwrap();
        s.replace(1, json!({ "id": 2 }));
        assert!(s.get_value().check_invariants().is_err());
    }

    #[test]
    fn test_reentrant_mutation_from_subscriber() {
        let s = store(&[1, 2]);
        let inner = s.clone();
        let _sub = s.observable().subscribe(move |state: &Arc<EntityState<Value>>| {
            if state.entities.has(&Id::from(1)) && state.active.contains(&Id::from(1)) {
                inner.remove(1);
            }
        });
        s.set_active(1);
        let state = s.get_value();
        assert!(!state.entities.has(&Id::from(1)));
        assert!(!state.has_active());
    }
}
