//! Extension points around entity store mutations
//!
//! Pre hooks transform entities on their way in. Post hooks run after the
//! entity change has been computed but before anything is published; they
//! adjust the pending [`Transition`], so a public store call still produces
//! at most one emission.

use entity_map::{Id, Record};

use crate::state::Transition;

/// Hooks an [`EntityStore`](crate::EntityStore) calls around each mutation
///
/// Every method has a default. The default post hooks keep the active set a
/// subset of the entities.
///
/// ```rust,ignore
/// struct ActivateNew;
///
/// impl EntityHooks<Value> for ActivateNew {
///     fn post_add(&self, tx: &mut Transition<Value>, ids: &[Id]) {
///         tx.set_active(ids.iter().cloned());
///     }
/// }
/// ```
pub trait EntityHooks<T: Record>: Send + Sync {
    /// Transform an entity before `add` or `set` stores it
    fn pre_add(&self, entity: T) -> T {
        entity
    }

    /// Transform the result of an update before it replaces `previous`
    fn pre_update(&self, previous: &T, next: T) -> T {
        let _ = previous;
        next
    }

    /// After `set` replaced the whole collection
    fn post_set(&self, tx: &mut Transition<T>) {
        tx.sync_active();
    }

    /// After `add` inserted or merged the entities with these ids
    fn post_add(&self, tx: &mut Transition<T>, ids: &[Id]) {
        let _ = ids;
        tx.sync_active();
    }

    /// After entities were changed by `update`, `replace` or `map`
    fn post_update(&self, tx: &mut Transition<T>, ids: &[Id]) {
        let _ = ids;
        tx.sync_active();
    }

    /// After an `upsert`; `ids` holds both updated and inserted keys
    fn post_upsert(&self, tx: &mut Transition<T>, ids: &[Id]) {
        let _ = ids;
        tx.sync_active();
    }

    /// After entities were removed; `removed` holds exactly their keys
    fn post_remove(&self, tx: &mut Transition<T>, removed: &[Id]) {
        tx.remove_active(removed);
    }
}

/// Hooks with every default behavior
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl<T: Record> EntityHooks<T> for DefaultHooks {}
