//! The normalized entity map
//!
//! [`StMap`] stores entities keyed by their resolved [`Id`], in key-insertion
//! order. It offers three families of operations:
//!
//! - **Builder** operations (`set`, `merge`, `upsert`, `update`, `remove`, ...)
//!   mutate the receiver and return it for chaining. Use them while assembling
//!   a collection that nobody else has seen yet.
//! - **Pure** operations (`merged`, `upserted`, `updated`, `removed`, ...)
//!   take an `Arc<StMap>` and return a new `Arc` with the change applied, or
//!   the *same* `Arc` when nothing changed. Published snapshots are only ever
//!   replaced this way.
//! - **View** operations (`filter`, `map`, `order_by`, `search`, `limit`)
//!   produce a fresh collection sharing the receiver's resolver.
//!
//! # Architecture
//!
//! ```text
//! StMap<T>
//!     ├── id_getter: IdGetter<T>          (entity -> Id)
//!     ├── merge: MergeStrategy<T>         (stored, partial -> merged)
//!     └── items: IndexMap<Id, Arc<T>>     (insertion order + O(1) lookup)
//! ```

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use crate::error::Result;
use crate::id::{Id, IdGetter};
use crate::record::{MergeStrategy, Record};
use crate::search::contains_folded;
use crate::select::{Direction, FilterBy, OrderBy, Patch, SearchBy, Select};

/// Insertion-ordered, keyed collection of entities
pub struct StMap<T> {
    id_getter: IdGetter<T>,
    merge: MergeStrategy<T>,
    items: IndexMap<Id, Arc<T>>,
    /// Set on collections derived by `map`, whose values need not resolve to
    /// their own key
    view: bool,
    /// Set by `from_object`, whose sampled key typing may leave an entry
    /// under a key it does not resolve to
    object_keyed: bool,
}

impl<T: Record> StMap<T> {
    /// Create an empty collection
    ///
    /// Fails with [`crate::MapError::MissingIdGetter`] if the strategy can
    /// never resolve a key.
    pub fn new(id_getter: IdGetter<T>) -> Result<Self> {
        id_getter.validate()?;
        Ok(Self {
            id_getter,
            merge: MergeStrategy::default(),
            items: IndexMap::new(),
            view: false,
            object_keyed: false,
        })
    }

    /// Create a collection populated from a list
    pub fn from_entities(id_getter: IdGetter<T>, entities: impl IntoIterator<Item = T>) -> Result<Self> {
        let mut map = Self::new(id_getter)?;
        map.from_array(entities);
        Ok(map)
    }

    /// Use a different merge strategy for merge, upsert and update
    pub fn with_merge(mut self, merge: MergeStrategy<T>) -> Self {
        self.merge = merge;
        self
    }

    /// An empty collection sharing this one's resolver and merge strategy
    pub fn empty_like(&self) -> Self {
        Self {
            id_getter: self.id_getter.clone(),
            merge: self.merge.clone(),
            items: IndexMap::new(),
            view: self.view,
            object_keyed: self.object_keyed,
        }
    }

    fn derive(&self, items: IndexMap<Id, Arc<T>>) -> Self {
        Self {
            items,
            ..self.empty_like()
        }
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// The identifier strategy
    pub fn id_getter(&self) -> &IdGetter<T> {
        &self.id_getter
    }

    /// The merge strategy
    pub fn merge_strategy(&self) -> &MergeStrategy<T> {
        &self.merge
    }

    /// Resolve the key of an entity under this collection's strategy
    pub fn resolve_id(&self, entity: &T) -> Option<Id> {
        self.id_getter.resolve(entity)
    }

    /// Look up an entity
    pub fn get(&self, id: &Id) -> Option<&Arc<T>> {
        self.items.get(id)
    }

    /// Whether a key is present
    pub fn has(&self, id: &Id) -> bool {
        self.items.contains_key(id)
    }

    /// Whether this collection was derived by [`StMap::map`]
    pub fn is_view(&self) -> bool {
        self.view
    }

    /// Keys in iteration order
    pub fn keys(&self) -> impl Iterator<Item = &Id> + '_ {
        self.items.keys()
    }

    /// Snapshot of the keys
    pub fn keys_array(&self) -> Vec<Id> {
        self.items.keys().cloned().collect()
    }

    /// Entities in iteration order
    pub fn values(&self) -> impl Iterator<Item = &Arc<T>> + '_ {
        self.items.values()
    }

    /// Snapshot of the entities
    pub fn values_array(&self) -> Vec<Arc<T>> {
        self.items.values().cloned().collect()
    }

    /// `(key, entity)` pairs in iteration order
    pub fn entries(&self) -> impl Iterator<Item = (&Id, &Arc<T>)> + '_ {
        self.items.iter()
    }

    /// Position of a key in iteration order
    pub fn index_of(&self, id: &Id) -> Option<usize> {
        self.items.get_index_of(id)
    }

    /// Entry at a position in iteration order
    pub fn get_index(&self, index: usize) -> Option<(&Id, &Arc<T>)> {
        self.items.get_index(index)
    }

    /// First entity in iteration order
    pub fn first(&self) -> Option<&Arc<T>> {
        self.items.first().map(|(_, v)| v)
    }

    /// Last entity in iteration order
    pub fn last(&self) -> Option<&Arc<T>> {
        self.items.last().map(|(_, v)| v)
    }

    /// First entity matching the predicate
    pub fn find(&self, mut predicate: impl FnMut(&T, &Id) -> bool) -> Option<&Arc<T>> {
        self.items.iter().find(|(id, e)| predicate(e, id)).map(|(_, e)| e)
    }

    /// Whether any entity matches
    pub fn some(&self, mut predicate: impl FnMut(&T, &Id) -> bool) -> bool {
        self.items.iter().any(|(id, e)| predicate(e, id))
    }

    /// Whether every entity matches; true for an empty collection
    pub fn every(&self, mut predicate: impl FnMut(&T, &Id) -> bool) -> bool {
        self.items.iter().all(|(id, e)| predicate(e, id))
    }

    /// Visit every entity in order
    pub fn for_each(&self, mut f: impl FnMut(&T, &Id)) {
        for (id, entity) in &self.items {
            f(entity, id);
        }
    }

    /// Fold the entities in order
    pub fn reduce<A>(&self, init: A, mut f: impl FnMut(A, &T, &Id) -> A) -> A {
        self.items.iter().fold(init, |acc, (id, e)| f(acc, e, id))
    }

    /// Keys targeted by a selector, in selector order for id lists and
    /// collection order for predicates; absent keys are dropped
    pub fn matching_ids(&self, select: &Select<T>) -> Vec<Id> {
        match select {
            Select::Id(id) => self.has(id).then(|| id.clone()).into_iter().collect(),
            Select::Ids(ids) => {
                let mut seen = indexmap::IndexSet::new();
                for id in ids {
                    if self.has(id) {
                        seen.insert(id.clone());
                    }
                }
                seen.into_iter().collect()
            }
            Select::Where(predicate) => self
                .items
                .iter()
                .filter(|(id, e)| predicate(e, id))
                .map(|(id, _)| id.clone())
                .collect(),
        }
    }

    /// Whether any targeted key is present
    pub fn exists(&self, select: &Select<T>) -> bool {
        match select {
            Select::Id(id) => self.has(id),
            Select::Ids(ids) => ids.iter().any(|id| self.has(id)),
            Select::Where(predicate) => self.items.iter().any(|(id, e)| predicate(e, id)),
        }
    }

    /// First key whose stored value does not resolve back to it
    ///
    /// Always `None` for views and for collections built by
    /// [`StMap::from_object`].
    pub fn find_inconsistent_key(&self) -> Option<Id> {
        if self.view || self.object_keyed {
            return None;
        }
        self.items
            .iter()
            .find(|(id, e)| self.id_getter.resolve(e).as_ref() != Some(*id))
            .map(|(id, _)| id.clone())
    }

    // ========================================================================
    // Builder operations
    // ========================================================================

    /// Insert or replace an entity under `id`
    ///
    /// Replacing keeps the key's position.
    pub fn set(&mut self, id: Id, entity: impl Into<Arc<T>>) -> &mut Self {
        self.items.insert(id, entity.into());
        self
    }

    /// Insert or replace an entity under its resolved key
    ///
    /// Entities that don't resolve are skipped.
    pub fn add(&mut self, entity: impl Into<Arc<T>>) -> &mut Self {
        let entity = entity.into();
        match self.id_getter.resolve(&entity) {
            Some(id) => {
                self.items.insert(id, entity);
            }
            None => trace!(accessor = %self.id_getter.describe(), "Skipping entity without id"),
        }
        self
    }

    /// Rebuild the collection from a list
    ///
    /// Later duplicates overwrite earlier ones but keep the first position.
    pub fn from_array(&mut self, entities: impl IntoIterator<Item = T>) -> &mut Self {
        self.items.clear();
        self.object_keyed = false;
        for entity in entities {
            self.add(entity);
        }
        self
    }

    /// Rebuild the collection from an already-keyed mapping
    ///
    /// Keys are parsed as integers when the *first* value's resolved id is
    /// numeric, and left as strings otherwise. Only the first entry is
    /// sampled, so a mapping whose first id is numeric turns every parseable
    /// key into a number (`"007"` becomes `7`). Such entries stay under the
    /// converted key, so [`StMap::find_inconsistent_key`] skips these
    /// collections.
    pub fn from_object(&mut self, entries: impl IntoIterator<Item = (String, T)>) -> &mut Self {
        self.items.clear();
        self.object_keyed = true;
        let mut sampled = None;
        for (key, entity) in entries {
            let numeric = *sampled.get_or_insert_with(|| {
                self.id_getter.resolve(&entity).is_some_and(|id| id.is_numeric())
            });
            let id = if numeric {
                key.parse::<i64>().map(Id::Num).unwrap_or(Id::Str(key))
            } else {
                Id::Str(key)
            };
            self.items.insert(id, Arc::new(entity));
        }
        self
    }

    /// Merge a batch of entities
    ///
    /// Existing keys are merged with the collection's strategy. New keys are
    /// inserted only when `upsert` is set; otherwise they are dropped.
    pub fn merge(&mut self, entities: impl IntoIterator<Item = T>, upsert: bool) -> &mut Self {
        self.merge_in(entities, upsert);
        self
    }

    /// Merge a partial into `id`, or insert it if the key is absent
    ///
    /// An absent key is only inserted when the partial resolves to `id`.
    pub fn upsert(&mut self, id: &Id, partial: T) -> &mut Self {
        self.upsert_in(id, partial);
        self
    }

    /// Merge a partial into `id`, or insert `create(id, partial)` if absent
    pub fn upsert_or_create(&mut self, id: &Id, partial: T, create: impl FnOnce(&Id, &T) -> T) -> &mut Self {
        if self.has(id) {
            self.update_in(id, &Patch::Merge(partial));
        } else {
            self.items.insert(id.clone(), Arc::new(create(id, &partial)));
        }
        self
    }

    /// Upsert a batch; entries without a resolvable key are dropped
    pub fn upsert_many(&mut self, entities: impl IntoIterator<Item = T>) -> &mut Self {
        self.merge_in(entities, true);
        self
    }

    /// Change an existing entity; absent keys are ignored
    pub fn update(&mut self, id: &Id, patch: &Patch<T>) -> &mut Self {
        self.update_in(id, patch);
        self
    }

    /// Change every entity the selector targets
    pub fn update_where(&mut self, select: &Select<T>, patch: &Patch<T>) -> &mut Self {
        for id in self.matching_ids(select) {
            self.update_in(&id, patch);
        }
        self
    }

    /// Replace an existing entity wholesale, without merging
    pub fn replace(&mut self, id: &Id, entity: impl Into<Arc<T>>) -> &mut Self {
        if let Some(slot) = self.items.get_mut(id) {
            *slot = entity.into();
        }
        self
    }

    /// Remove the targeted entities
    pub fn remove(&mut self, select: &Select<T>) -> &mut Self {
        self.remove_in(select);
        self
    }

    /// Remove and return the last entity
    pub fn pop(&mut self) -> Option<Arc<T>> {
        self.items.pop().map(|(_, v)| v)
    }

    /// Remove and return the first entity
    pub fn shift(&mut self) -> Option<Arc<T>> {
        self.items.shift_remove_index(0).map(|(_, v)| v)
    }

    /// Remove everything
    pub fn clear(&mut self) -> &mut Self {
        self.items.clear();
        self
    }

    fn merge_in(&mut self, entities: impl IntoIterator<Item = T>, upsert: bool) -> bool {
        let mut changed = false;
        for entity in entities {
            let Some(id) = self.id_getter.resolve(&entity) else {
                trace!(accessor = %self.id_getter.describe(), "Dropping merge entry without id");
                continue;
            };
            if self.has(&id) {
                changed |= self.update_in(&id, &Patch::Merge(entity));
            } else if upsert {
                self.items.insert(id, Arc::new(entity));
                changed = true;
            }
        }
        changed
    }

    fn upsert_in(&mut self, id: &Id, partial: T) -> bool {
        if self.has(id) {
            return self.update_in(id, &Patch::Merge(partial));
        }
        if self.id_getter.resolve(&partial).as_ref() == Some(id) {
            self.items.insert(id.clone(), Arc::new(partial));
            true
        } else {
            trace!(id = %id, "Dropping upsert of new entity that does not carry its id");
            false
        }
    }

    /// Returns whether the stored value changed. A result that is shallowly
    /// equal to the stored value keeps the stored allocation.
    fn update_in(&mut self, id: &Id, patch: &Patch<T>) -> bool {
        let merge = &self.merge;
        let Some(slot) = self.items.get_mut(id) else {
            return false;
        };
        let current: &T = slot;
        let next = match patch {
            Patch::Merge(partial) => merge.apply(current, partial),
            Patch::With(f) => f(current),
        };
        if next.shallow_eq(current) {
            return false;
        }
        *slot = Arc::new(next);
        true
    }

    fn remove_in(&mut self, select: &Select<T>) -> bool {
        let before = self.items.len();
        match select {
            Select::Id(id) => {
                self.items.shift_remove(id);
            }
            Select::Ids(ids) => {
                for id in ids {
                    self.items.shift_remove(id);
                }
            }
            Select::Where(predicate) => self.items.retain(|id, e| !predicate(e, id)),
        }
        self.items.len() != before
    }

    // ========================================================================
    // Pure operations (copy-on-write)
    // ========================================================================

    fn cow(self: &Arc<Self>, apply: impl FnOnce(&mut Self) -> bool) -> Arc<Self> {
        let mut next = (**self).clone();
        if apply(&mut next) {
            Arc::new(next)
        } else {
            Arc::clone(self)
        }
    }

    /// [`StMap::merge`] without touching the receiver
    pub fn merged(self: &Arc<Self>, entities: Vec<T>, upsert: bool) -> Arc<Self> {
        if entities.is_empty() {
            return Arc::clone(self);
        }
        self.cow(|next| next.merge_in(entities, upsert))
    }

    /// [`StMap::upsert`] without touching the receiver
    pub fn upserted(self: &Arc<Self>, id: &Id, partial: T) -> Arc<Self> {
        self.cow(|next| next.upsert_in(id, partial))
    }

    /// [`StMap::upsert_many`] without touching the receiver
    pub fn upserted_many(self: &Arc<Self>, entities: Vec<T>) -> Arc<Self> {
        self.merged(entities, true)
    }

    /// [`StMap::update`] without touching the receiver
    pub fn updated(self: &Arc<Self>, id: &Id, patch: &Patch<T>) -> Arc<Self> {
        if !self.has(id) {
            return Arc::clone(self);
        }
        self.cow(|next| next.update_in(id, patch))
    }

    /// [`StMap::update_where`] without touching the receiver
    pub fn updated_where(self: &Arc<Self>, select: &Select<T>, patch: &Patch<T>) -> Arc<Self> {
        let ids = self.matching_ids(select);
        if ids.is_empty() {
            return Arc::clone(self);
        }
        self.cow(|next| ids.iter().fold(false, |changed, id| next.update_in(id, patch) | changed))
    }

    /// [`StMap::replace`] without touching the receiver
    pub fn replaced(self: &Arc<Self>, id: &Id, entity: Arc<T>) -> Arc<Self> {
        match self.get(id) {
            Some(current) if !Arc::ptr_eq(current, &entity) => self.cow(|next| {
                next.replace(id, entity);
                true
            }),
            _ => Arc::clone(self),
        }
    }

    /// [`StMap::remove`] without touching the receiver
    pub fn removed(self: &Arc<Self>, select: &Select<T>) -> Arc<Self> {
        if !self.exists(select) {
            return Arc::clone(self);
        }
        self.cow(|next| next.remove_in(select))
    }

    /// Apply `f` to every entity, keeping keys and order
    pub fn transformed(self: &Arc<Self>, f: impl Fn(&T, &Id) -> T) -> Arc<Self> {
        if self.is_empty() {
            return Arc::clone(self);
        }
        self.cow(|next| {
            let mut changed = false;
            for (id, slot) in next.items.iter_mut() {
                let value = f(slot, id);
                if !value.shallow_eq(slot) {
                    *slot = Arc::new(value);
                    changed = true;
                }
            }
            changed
        })
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Entities matching the predicate
    pub fn filter(&self, predicate: impl Fn(&T, &Id) -> bool) -> Self {
        self.derive(
            self.items
                .iter()
                .filter(|(id, e)| predicate(e, id))
                .map(|(id, e)| (id.clone(), Arc::clone(e)))
                .collect(),
        )
    }

    /// Entities passing a [`FilterBy`]
    pub fn filter_by(&self, filter: &FilterBy<T>) -> Self {
        self.filter(|e, id| filter.matches(e, id))
    }

    /// Entities targeted by a selector, in [`StMap::matching_ids`] order
    pub fn select(&self, select: &Select<T>) -> Self {
        self.derive(
            self.matching_ids(select)
                .into_iter()
                .filter_map(|id| self.items.get(&id).map(|e| (id.clone(), Arc::clone(e))))
                .collect(),
        )
    }

    /// Transform every entity; keys are carried over unchanged
    pub fn map(&self, f: impl Fn(&T, &Id) -> T) -> Self {
        let mut view = self.derive(
            self.items
                .iter()
                .map(|(id, e)| (id.clone(), Arc::new(f(e, id))))
                .collect(),
        );
        view.view = true;
        view
    }

    /// Same key set, iteration order re-sorted
    ///
    /// The sort is stable: entities comparing equal keep their relative order.
    pub fn order_by(&self, order: &OrderBy<T>, direction: Direction) -> Self {
        let mut items = self.items.clone();
        items.sort_by(|_, a, _, b| match direction {
            Direction::Asc => order.compare(a, b),
            Direction::Desc => order.compare(b, a),
        });
        self.derive(items)
    }

    /// Entities whose searched text contains `term`, ignoring case and
    /// diacritics
    pub fn search(&self, by: &SearchBy<T>, term: &str) -> Self {
        self.filter(|e, _| by.haystacks(e).iter().any(|text| contains_folded(text, term)))
    }

    /// The first `limit` entities; zero means unlimited
    pub fn limit(&self, limit: usize) -> Self {
        if limit == 0 || limit >= self.len() {
            return self.clone();
        }
        self.derive(
            self.items
                .iter()
                .take(limit)
                .map(|(id, e)| (id.clone(), Arc::clone(e)))
                .collect(),
        )
    }
}

impl<T> Clone for StMap<T> {
    fn clone(&self) -> Self {
        Self {
            id_getter: self.id_getter.clone(),
            merge: self.merge.clone(),
            items: self.items.clone(),
            view: self.view,
            object_keyed: self.object_keyed,
        }
    }
}

impl<T> StMap<T> {
    /// Number of entities
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the collection is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> fmt::Debug for StMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StMap")
            .field("id_getter", &self.id_getter)
            .field("len", &self.items.len())
            .field("keys", &self.items.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<'a, T> IntoIterator for &'a StMap<T> {
    type Item = (&'a Id, &'a Arc<T>);
    type IntoIter = indexmap::map::Iter<'a, Id, Arc<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
