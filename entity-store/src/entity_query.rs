//! Read layer over an [`EntityStore`]
//!
//! Point-in-time getters (`get_*`) read the current snapshot. Streams
//! (`select_*`) start with the current value and re-emit only when the
//! derived value changes: entities compare equal when they are the same
//! allocation or shallowly equal, lists when they are pairwise equal in
//! order.

use std::fmt;
use std::sync::Arc;

use entity_map::{
    entities_eq, option_entity_eq, Direction, EqFn, FilterBy, Id, OrderBy, Record, Select, StMap,
};
use serde_json::Value;

use crate::entity_store::EntityStore;
use crate::error::{same_error, SharedError};
use crate::observable::Observable;
use crate::state::EntityState;

/// Filter, order and limit applied by [`EntityQuery::select_all`]
///
/// Applied in that order. A limit of 0 means no limit.
pub struct SelectOptions<T> {
    /// All filters must match
    pub filter_by: Vec<FilterBy<T>>,
    pub order_by: Option<OrderBy<T>>,
    pub direction: Direction,
    pub limit: usize,
}

impl<T: Record> SelectOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: FilterBy<T>) -> Self {
        self.filter_by.push(filter);
        self
    }

    pub fn order(mut self, order: OrderBy<T>, direction: Direction) -> Self {
        self.order_by = Some(order);
        self.direction = direction;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn apply(&self, entities: &StMap<T>) -> Vec<Arc<T>> {
        let mut view = if self.filter_by.is_empty() {
            entities.clone()
        } else {
            entities.filter(|e, id| self.filter_by.iter().all(|f| f.matches(e, id)))
        };
        if let Some(order) = &self.order_by {
            view = view.order_by(order, self.direction);
        }
        view.limit(self.limit).values_array()
    }
}

impl<T> Default for SelectOptions<T> {
    fn default() -> Self {
        Self {
            filter_by: Vec::new(),
            order_by: None,
            direction: Direction::default(),
            limit: 0,
        }
    }
}

impl<T> Clone for SelectOptions<T> {
    fn clone(&self) -> Self {
        Self {
            filter_by: self.filter_by.clone(),
            order_by: self.order_by.clone(),
            direction: self.direction,
            limit: self.limit,
        }
    }
}

impl<T> fmt::Debug for SelectOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectOptions")
            .field("filter_by", &self.filter_by)
            .field("order_by", &self.order_by)
            .field("direction", &self.direction)
            .field("limit", &self.limit)
            .finish()
    }
}

type OptionEq<T> = Arc<dyn Fn(&Option<Arc<T>>, &Option<Arc<T>>) -> bool + Send + Sync>;

/// Derived views of an [`EntityStore`]
pub struct EntityQuery<T> {
    store: EntityStore<T>,
    entity_eq: OptionEq<T>,
}

impl<T: Record> EntityQuery<T> {
    pub fn new(store: &EntityStore<T>) -> Self {
        let entity_eq: OptionEq<T> = match store.equality() {
            Some(eq) => Arc::new(move |a: &Option<Arc<T>>, b: &Option<Arc<T>>| custom_eq(&eq, a, b)),
            None => Arc::new(|a: &Option<Arc<T>>, b: &Option<Arc<T>>| option_entity_eq(a.as_ref(), b.as_ref())),
        };
        Self {
            store: store.clone(),
            entity_eq,
        }
    }

    pub fn store(&self) -> &EntityStore<T> {
        &self.store
    }

    fn state(&self) -> Arc<EntityState<T>> {
        self.store.get_value()
    }

    fn select_option(&self, f: impl Fn(&EntityState<T>) -> Option<Arc<T>> + Send + Sync + 'static) -> Observable<Option<Arc<T>>> {
        let eq = Arc::clone(&self.entity_eq);
        self.store
            .observable()
            .map(move |state| f(state))
            .distinct_until_changed_by(move |a, b| eq(a, b))
    }

    fn select_list(&self, f: impl Fn(&EntityState<T>) -> Vec<Arc<T>> + Send + Sync + 'static) -> Observable<Vec<Arc<T>>> {
        self.store
            .observable()
            .map(move |state| f(state))
            .distinct_until_changed_by(|a, b| entities_eq(a, b))
    }

    // ========================================================================
    // Entities
    // ========================================================================

    pub fn get_all(&self, options: &SelectOptions<T>) -> Vec<Arc<T>> {
        options.apply(&self.state().entities)
    }

    /// Filtered, ordered and limited entities
    ///
    /// Recomputed only when the entity collection is replaced.
    pub fn select_all(&self, options: SelectOptions<T>) -> Observable<Vec<Arc<T>>> {
        self.store
            .observable()
            .map(|state| Arc::clone(&state.entities))
            .distinct_until_changed_by(|a, b| Arc::ptr_eq(a, b))
            .map(move |entities| options.apply(entities))
            .distinct_until_changed_by(|a, b| entities_eq(a, b))
    }

    pub fn get_entity(&self, id: impl Into<Id>) -> Option<Arc<T>> {
        self.state().entities.get(&id.into()).cloned()
    }

    pub fn has_entity(&self, id: impl Into<Id>) -> bool {
        self.state().entities.has(&id.into())
    }

    /// Whether any targeted entity is present
    pub fn exists(&self, select: impl Into<Select<T>>) -> bool {
        self.state().entities.exists(&select.into())
    }

    pub fn get_count(&self) -> usize {
        self.state().entities.len()
    }

    pub fn select_count(&self) -> Observable<usize> {
        self.store
            .observable()
            .map(|state| state.entities.len())
            .distinct_until_changed()
    }

    /// One entity, emitted when it changes under the store's equality
    pub fn select_entity(&self, id: impl Into<Id>) -> Observable<Option<Arc<T>>> {
        let id = id.into();
        self.select_option(move |state| state.entities.get(&id).cloned())
    }

    /// The first entity matching the predicate
    pub fn select_entity_where(
        &self,
        predicate: impl Fn(&T, &Id) -> bool + Send + Sync + 'static,
    ) -> Observable<Option<Arc<T>>> {
        self.select_option(move |state| state.entities.find(&predicate).cloned())
    }

    /// One field of one entity
    pub fn select_entity_field(&self, id: impl Into<Id>, name: &str) -> Observable<Option<Value>> {
        let name = name.to_string();
        self.select_entity_with(id, move |entity: &T| entity.field(&name))
            .map(|field| field.clone().flatten())
            .distinct_until_changed()
    }

    /// A projection of one entity, emitted when the projection changes
    pub fn select_entity_with<U, F>(&self, id: impl Into<Id>, project: F) -> Observable<Option<U>>
    where
        U: Clone + Send + PartialEq + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let id = id.into();
        self.store
            .observable()
            .map(move |state| state.entities.get(&id).map(|e| project(e)))
            .distinct_until_changed()
    }

    pub fn get_many(&self, select: impl Into<Select<T>>) -> Vec<Arc<T>> {
        many(&self.state().entities, &select.into())
    }

    /// The targeted entities, emitted when the list changes
    ///
    /// Id lists keep their order; absent ids are left out.
    pub fn select_many(&self, select: impl Into<Select<T>>) -> Observable<Vec<Arc<T>>> {
        let select = select.into();
        self.select_list(move |state| many(&state.entities, &select))
    }

    pub fn select_first(&self) -> Observable<Option<Arc<T>>> {
        self.select_option(|state| state.entities.first().cloned())
    }

    pub fn select_last(&self) -> Observable<Option<Arc<T>>> {
        self.select_option(|state| state.entities.last().cloned())
    }

    // ========================================================================
    // Active set
    // ========================================================================

    pub fn get_active(&self) -> Vec<Arc<T>> {
        self.state().active_entities()
    }

    /// Active entities, re-derived when the active ids or their entities change
    pub fn select_active(&self) -> Observable<Vec<Arc<T>>> {
        self.select_list(|state| state.active_entities())
    }

    pub fn get_active_id(&self) -> Option<Id> {
        self.state().active_id().cloned()
    }

    pub fn get_active_ids(&self) -> Vec<Id> {
        self.state().active.iter().cloned().collect()
    }

    pub fn select_active_id(&self) -> Observable<Option<Id>> {
        self.store
            .observable()
            .map(|state| state.active_id().cloned())
            .distinct_until_changed()
    }

    pub fn select_active_ids(&self) -> Observable<Vec<Id>> {
        self.store
            .observable()
            .map(|state| state.active.iter().cloned().collect::<Vec<_>>())
            .distinct_until_changed()
    }

    pub fn has_active(&self) -> bool {
        self.state().has_active()
    }

    pub fn select_has_active(&self) -> Observable<bool> {
        self.store
            .observable()
            .map(|state| state.has_active())
            .distinct_until_changed()
    }

    // ========================================================================
    // Flags
    // ========================================================================

    pub fn get_loading(&self) -> bool {
        self.state().loading
    }

    pub fn select_loading(&self) -> Observable<bool> {
        self.store
            .observable()
            .map(|state| state.loading)
            .distinct_until_changed()
    }

    pub fn get_error(&self) -> Option<SharedError> {
        self.state().error.clone()
    }

    pub fn select_error(&self) -> Observable<Option<SharedError>> {
        self.store
            .observable()
            .map(|state| state.error.clone())
            .distinct_until_changed_by(same_error)
    }

    pub fn get_has_cache(&self) -> bool {
        self.store.has_cache()
    }

    pub fn select_has_cache(&self) -> Observable<bool> {
        self.store.has_cache_observable()
    }
}

fn custom_eq<T>(eq: &EqFn<T>, a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b) || eq(a, b),
        _ => false,
    }
}

fn many<T: Record>(entities: &StMap<T>, select: &Select<T>) -> Vec<Arc<T>> {
    entities
        .matching_ids(select)
        .iter()
        .filter_map(|id| entities.get(id).cloned())
        .collect()
}

impl<T> Clone for EntityQuery<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            entity_eq: Arc::clone(&self.entity_eq),
        }
    }
}

impl<T> fmt::Debug for EntityQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityQuery").field("store", &self.store).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EntityStoreConfig;
    use crate::state::ActiveRef;
    use parking_lot::Mutex;
    use serde_json::json;

    fn fixture() -> (EntityStore<Value>, EntityQuery<Value>) {
        let store = EntityStore::new(EntityStoreConfig::new("people").with_entities(vec![
            json!({ "id": 1, "name": "Guilherme", "age": 40 }),
            json!({ "id": 2, "name": "Ana", "age": 31 }),
            json!({ "id": 3, "name": "Zoë", "age": 25 }),
        ]))
        .unwrap();
        let query = EntityQuery::new(&store);
        (store, query)
    }

    fn counter<T: Clone + Send + 'static>(obs: &Observable<T>) -> (Arc<Mutex<Vec<T>>>, crate::Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = obs.subscribe(move |v: &T| sink.lock().push(v.clone()));
        (seen, sub)
    }

    fn names(list: &[Arc<Value>]) -> Vec<String> {
        list.iter().map(|e| e["name"].as_str().unwrap_or_default().to_string()).collect()
    }

    #[test]
    fn test_get_all_filter_order_limit() {
        let (_store, query) = fixture();
        let options = SelectOptions::new()
            .filter(FilterBy::by(|e: &Value, _| e["age"].as_i64().unwrap_or(0) > 26))
            .order(OrderBy::field("name"), Direction::Asc)
            .limit(1);
        assert_eq!(names(&query.get_all(&options)), vec!["Ana"]);

        let unlimited = SelectOptions::new().order(OrderBy::field("age"), Direction::Desc).limit(0);
        assert_eq!(names(&query.get_all(&unlimited)), vec!["Guilherme", "Ana", "Zoë"]);
    }

    #[test]
    fn test_select_all_skips_unrelated_changes() {
        let (store, query) = fixture();
        let (seen, _sub) = counter(&query.select_all(SelectOptions::new().filter(FilterBy::eq("age", 25))));
        store.update(1, json!({ "age": 41 }));
        store.set_loading(true);
        store.update(3, json!({ "name": "Zoe" }));
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(names(&seen[1]), vec!["Zoe"]);
    }

    #[test]
    fn test_select_entity_distinct() {
        let (store, query) = fixture();
        let (seen, _sub) = counter(&query.select_entity(1));
        store.update(2, json!({ "age": 32 }));
        store.update(1, json!({ "age": 40 }));
        store.update(1, json!({ "other": "x" }));
        assert_eq!(seen.lock().len(), 2);

        store.remove(1);
        assert!(seen.lock().last().unwrap().is_none());
    }

    #[test]
    fn test_select_entity_custom_equality() {
        let store = EntityStore::new(
            EntityStoreConfig::new("people")
                .with_entities(vec![json!({ "id": 1, "name": "A", "seen": 0 })])
                .with_equality(|a: &Value, b: &Value| a["name"] == b["name"]),
        )
        .unwrap();
        let query = EntityQuery::new(&store);
        let (seen, _sub) = counter(&query.select_entity(1));
        store.update(1, json!({ "seen": 1 }));
        assert_eq!(seen.lock().len(), 1);
        store.update(1, json!({ "name": "B" }));
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_select_entity_field_and_projection() {
        let (store, query) = fixture();
        let (fields, _a) = counter(&query.select_entity_field(2, "name"));
        let (ages, _b) = counter(&query.select_entity_with(2, |e: &Value| e["age"].as_i64()));
        store.update(2, json!({ "age": 32 }));
        store.update(2, json!({ "name": "Anna" }));
        assert_eq!(*fields.lock(), vec![Some(json!("Ana")), Some(json!("Anna"))]);
        assert_eq!(*ages.lock(), vec![Some(Some(31)), Some(Some(32))]);
    }

    #[test]
    fn test_select_many_and_exists() {
        let (store, query) = fixture();
        let (seen, _sub) = counter(&query.select_many(Select::ids([3, 1, 9])));
        assert_eq!(names(&seen.lock()[0]), vec!["Zoë", "Guilherme"]);

        store.update(2, json!({ "age": 99 }));
        assert_eq!(seen.lock().len(), 1);
        store.remove(3);
        assert_eq!(names(&seen.lock()[1]), vec!["Guilherme"]);

        assert!(query.exists(Select::ids([9, 1])));
        assert!(!query.exists(9));
        assert!(query.exists(Select::by(|e: &Value, _| e["age"] == 99)));
        assert!(!query.exists(Select::by(|e: &Value, _| e["age"] == 31)));
        assert_eq!(query.get_many(Select::ids([2])).len(), 1);
    }

    #[test]
    fn test_active_streams() {
        let (store, query) = fixture();
        let (active, _a) = counter(&query.select_active());
        let (ids, _b) = counter(&query.select_active_ids());
        let (has, _c) = counter(&query.select_has_active());

        store.set_active(ActiveRef::ids([2, 3]));
        store.update(2, json!({ "age": 50 }));
        store.update(1, json!({ "age": 50 }));

        assert_eq!(active.lock().len(), 3);
        assert_eq!(ids.lock().len(), 2);
        assert_eq!(*has.lock(), vec![false, true]);
        assert_eq!(query.get_active_id(), Some(Id::from(2)));
        assert_eq!(query.get_active_ids(), vec![Id::from(2), Id::from(3)]);
        assert_eq!(names(&query.get_active()), vec!["Ana", "Zoë"]);
        assert!(query.has_active());
    }

    #[test]
    fn test_count_first_last() {
        let (store, query) = fixture();
        let (counts, _a) = counter(&query.select_count());
        let (firsts, _b) = counter(&query.select_first());
        store.add(vec![json!({ "id": 4, "name": "Bo" })]);
        store.update(4, json!({ "age": 1 }));
        assert_eq!(*counts.lock(), vec![3, 4]);
        assert_eq!(firsts.lock().len(), 1);
        assert_eq!(query.get_count(), 4);
        assert!(query.has_entity(4));
        assert_eq!(query.get_entity(4).unwrap()["name"], "Bo");
        assert!(query.select_last().snapshot().flatten().is_some());
    }

    #[test]
    fn test_flag_streams() {
        let (store, query) = fixture();
        let (loading, _a) = counter(&query.select_loading());
        let (errors, _b) = counter(&query.select_error());
        store.set_loading(true);
        store.update(1, json!({ "age": 1 }));
        store.set_error(Some(crate::error::share_error(crate::StoreError::Configuration("x".into()))));
        assert_eq!(*loading.lock(), vec![false, true]);
        assert_eq!(errors.lock().len(), 2);
        assert!(query.get_loading());
        assert!(query.get_error().is_some());
        assert!(!query.get_has_cache());
    }
}
