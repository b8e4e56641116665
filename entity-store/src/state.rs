//! Entity state snapshots and pending transitions

use std::fmt;
use std::sync::Arc;

use entity_map::{Id, Record, StMap};
use indexmap::IndexSet;
use tracing::trace;

use crate::error::{same_error, SharedError, StoreError};

// ============================================================================
// EntityState
// ============================================================================

/// One immutable snapshot of an entity store
///
/// Snapshots are published as `Arc<EntityState<T>>` and never modified
/// afterwards. Unchanged parts are shared between consecutive snapshots, so
/// `Arc::ptr_eq` on `entities` or `active` tells whether that part changed.
pub struct EntityState<T> {
    /// All entities, in insertion order
    pub entities: Arc<StMap<T>>,
    /// Active ids, in activation order; always a subset of `entities`
    pub active: Arc<IndexSet<Id>>,
    pub loading: bool,
    pub error: Option<SharedError>,
}

impl<T: Record> EntityState<T> {
    pub(crate) fn new(entities: StMap<T>, active: IndexSet<Id>) -> Self {
        Self {
            entities: Arc::new(entities),
            active: Arc::new(active),
            loading: true,
            error: None,
        }
    }

    /// Active entities, in activation order
    pub fn active_entities(&self) -> Vec<Arc<T>> {
        self.active
            .iter()
            .filter_map(|id| self.entities.get(id).cloned())
            .collect()
    }

    /// The first active id, if any
    pub fn active_id(&self) -> Option<&Id> {
        self.active.first()
    }

    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    /// Whether `other` shares every part of this snapshot
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entities, &other.entities)
            && Arc::ptr_eq(&self.active, &other.active)
            && self.loading == other.loading
            && same_error(&self.error, &other.error)
    }

    /// Check the structural invariants of this snapshot
    ///
    /// Every stored entity must resolve to its own key, and every active id
    /// must name a stored entity.
    pub fn check_invariants(&self) -> Result<(), StoreError> {
        if let Some(id) = self.entities.find_inconsistent_key() {
            return Err(StoreError::InvariantViolation(format!(
                "entity stored under key {id} does not resolve to it ({})",
                self.entities.id_getter().describe()
            )));
        }
        if let Some(id) = self.active.iter().find(|id| !self.entities.has(id)) {
            return Err(StoreError::InvariantViolation(format!(
                "active id {id} is not a stored entity"
            )));
        }
        Ok(())
    }
}

impl<T> Clone for EntityState<T> {
    fn clone(&self) -> Self {
        Self {
            entities: Arc::clone(&self.entities),
            active: Arc::clone(&self.active),
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}

impl<T> fmt::Debug for EntityState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityState")
            .field("entities", &self.entities.len())
            .field("active", &self.active)
            .field("loading", &self.loading)
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .finish()
    }
}

// ============================================================================
// ActiveRef
// ============================================================================

/// What an active-set operation refers to
pub enum ActiveRef<T> {
    Id(Id),
    Ids(Vec<Id>),
    /// An entity, resolved to its key
    Entity(T),
    Entities(Vec<T>),
}

impl<T: Record> ActiveRef<T> {
    pub fn ids<I: Into<Id>>(ids: impl IntoIterator<Item = I>) -> Self {
        ActiveRef::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn entity(entity: T) -> Self {
        ActiveRef::Entity(entity)
    }

    /// Keys of the referenced entities that exist in `entities`
    ///
    /// Ids that are absent, and entities without a resolvable key, are
    /// skipped.
    pub fn resolve(&self, entities: &StMap<T>) -> Vec<Id> {
        let candidates: Vec<Id> = match self {
            ActiveRef::Id(id) => vec![id.clone()],
            ActiveRef::Ids(ids) => ids.clone(),
            ActiveRef::Entity(entity) => entities.resolve_id(entity).into_iter().collect(),
            ActiveRef::Entities(list) => list.iter().filter_map(|e| entities.resolve_id(e)).collect(),
        };
        candidates
            .into_iter()
            .filter(|id| {
                let present = entities.has(id);
                if !present {
                    trace!(id = %id, "Skipping active reference to absent entity");
                }
                present
            })
            .collect()
    }
}

impl<T> From<Id> for ActiveRef<T> {
    fn from(id: Id) -> Self {
        ActiveRef::Id(id)
    }
}

impl<T> From<Vec<Id>> for ActiveRef<T> {
    fn from(ids: Vec<Id>) -> Self {
        ActiveRef::Ids(ids)
    }
}

impl<T> From<i64> for ActiveRef<T> {
    fn from(id: i64) -> Self {
        ActiveRef::Id(Id::Num(id))
    }
}

impl<T> From<i32> for ActiveRef<T> {
    fn from(id: i32) -> Self {
        ActiveRef::Id(Id::from(id))
    }
}

impl<T> From<&str> for ActiveRef<T> {
    fn from(id: &str) -> Self {
        ActiveRef::Id(Id::from(id))
    }
}

impl<T> fmt::Debug for ActiveRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveRef::Id(id) => f.debug_tuple("Id").field(id).finish(),
            ActiveRef::Ids(ids) => f.debug_tuple("Ids").field(ids).finish(),
            ActiveRef::Entity(_) => f.write_str("Entity(..)"),
            ActiveRef::Entities(list) => write!(f, "Entities({})", list.len()),
        }
    }
}

// ============================================================================
// Transition
// ============================================================================

/// A state change being assembled before it is published
///
/// Handed to the post hooks, which may adjust the active set. Whatever the
/// hooks leave behind is published as a single snapshot.
pub struct Transition<T> {
    previous: Arc<EntityState<T>>,
    entities: Arc<StMap<T>>,
    active: Arc<IndexSet<Id>>,
}

impl<T: Record> Transition<T> {
    pub(crate) fn new(previous: &Arc<EntityState<T>>) -> Self {
        Self {
            previous: Arc::clone(previous),
            entities: Arc::clone(&previous.entities),
            active: Arc::clone(&previous.active),
        }
    }

    /// The published snapshot this transition started from
    pub fn previous(&self) -> &EntityState<T> {
        &self.previous
    }

    /// Entities as they will be published
    pub fn entities(&self) -> &StMap<T> {
        &self.entities
    }

    /// Active ids as they will be published
    pub fn active(&self) -> &IndexSet<Id> {
        &self.active
    }

    pub(crate) fn set_entities(&mut self, entities: Arc<StMap<T>>) {
        self.entities = entities;
    }

    /// Replace the active set; ids that are not entities are skipped
    pub fn set_active(&mut self, ids: impl IntoIterator<Item = Id>) {
        let next: IndexSet<Id> = ids.into_iter().filter(|id| self.entities.has(id)).collect();
        if next != *self.active {
            self.active = Arc::new(next);
        }
    }

    /// Append ids to the active set; ids that are not entities are skipped
    pub fn add_active(&mut self, ids: impl IntoIterator<Item = Id>) {
        let entities = Arc::clone(&self.entities);
        self.edit_active(|active| {
            let mut changed = false;
            for id in ids {
                if entities.has(&id) {
                    changed |= active.insert(id);
                }
            }
            changed
        });
    }

    /// Drop ids from the active set
    pub fn remove_active(&mut self, ids: &[Id]) {
        if !ids.iter().any(|id| self.active.contains(id)) {
            return;
        }
        self.edit_active(|active| {
            for id in ids {
                active.shift_remove(id);
            }
            true
        });
    }

    /// Drop active ids that are no longer entities
    pub fn sync_active(&mut self) {
        let entities = Arc::clone(&self.entities);
        if self.active.iter().all(|id| entities.has(id)) {
            return;
        }
        self.edit_active(|active| {
            active.retain(|id| entities.has(id));
            true
        });
    }

    fn edit_active(&mut self, f: impl FnOnce(&mut IndexSet<Id>) -> bool) {
        let mut next = (*self.active).clone();
        if f(&mut next) {
            self.active = Arc::new(next);
        }
    }

    /// The resulting snapshot, or `None` when nothing changed
    pub(crate) fn finish(self) -> Option<EntityState<T>> {
        if Arc::ptr_eq(&self.entities, &self.previous.entities)
            && Arc::ptr_eq(&self.active, &self.previous.active)
        {
            return None;
        }
        Some(EntityState {
            entities: self.entities,
            active: self.active,
            loading: self.previous.loading,
            error: self.previous.error.clone(),
        })
    }
}

impl<T> fmt::Debug for Transition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("entities", &self.entities.len())
            .field("active", &self.active)
            .finish()
    }
}
