//! Argument types for the polymorphic collection operations
//!
//! Operations that accept "an id, a list of ids, or a predicate" take a
//! [`Select`]; updates take a [`Patch`]; ordering, filtering and search take
//! [`OrderBy`], [`FilterBy`] and [`SearchBy`].

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::Id;
use crate::record::Record;

/// Predicate over an entity and its key
pub type Predicate<T> = Arc<dyn Fn(&T, &Id) -> bool + Send + Sync>;

/// Entity transform used by [`Patch::With`]
pub type TransformFn<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;

/// Total order over two entities
pub type CompareFn<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Text projection used by [`SearchBy::Text`]
pub type TextFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

// ============================================================================
// Select
// ============================================================================

/// Which entities an operation targets
pub enum Select<T> {
    /// A single key
    Id(Id),
    /// Several keys, in the given order
    Ids(Vec<Id>),
    /// Every entity for which the predicate holds
    Where(Predicate<T>),
}

impl<T> Select<T> {
    /// Target a list of keys
    pub fn ids<I>(ids: impl IntoIterator<Item = I>) -> Self
    where
        I: Into<Id>,
    {
        Select::Ids(ids.into_iter().map(Into::into).collect())
    }

    /// Target entities matching a predicate
    pub fn by(predicate: impl Fn(&T, &Id) -> bool + Send + Sync + 'static) -> Self {
        Select::Where(Arc::new(predicate))
    }
}

impl<T> Clone for Select<T> {
    fn clone(&self) -> Self {
        match self {
            Select::Id(id) => Select::Id(id.clone()),
            Select::Ids(ids) => Select::Ids(ids.clone()),
            Select::Where(p) => Select::Where(Arc::clone(p)),
        }
    }
}

impl<T> fmt::Debug for Select<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Select::Id(id) => f.debug_tuple("Id").field(id).finish(),
            Select::Ids(ids) => f.debug_tuple("Ids").field(ids).finish(),
            Select::Where(_) => f.write_str("Where(..)"),
        }
    }
}

impl<T> From<Id> for Select<T> {
    fn from(id: Id) -> Self {
        Select::Id(id)
    }
}

impl<T> From<Vec<Id>> for Select<T> {
    fn from(ids: Vec<Id>) -> Self {
        Select::Ids(ids)
    }
}

impl<T> From<i64> for Select<T> {
    fn from(id: i64) -> Self {
        Select::Id(Id::Num(id))
    }
}

impl<T> From<i32> for Select<T> {
    fn from(id: i32) -> Self {
        Select::Id(Id::from(id))
    }
}

impl<T> From<&str> for Select<T> {
    fn from(id: &str) -> Self {
        Select::Id(Id::from(id))
    }
}

// ============================================================================
// Patch
// ============================================================================

/// How an existing entity is changed by an update
pub enum Patch<T> {
    /// Merge a partial record using the collection's merge strategy
    Merge(T),
    /// Replace the entity with the transform's output
    With(TransformFn<T>),
}

impl<T: Record> Patch<T> {
    /// Build a transform patch
    pub fn with(f: impl Fn(&T) -> T + Send + Sync + 'static) -> Self {
        Patch::With(Arc::new(f))
    }
}

impl<T> From<T> for Patch<T> {
    fn from(partial: T) -> Self {
        Patch::Merge(partial)
    }
}

impl<T: Clone> Clone for Patch<T> {
    fn clone(&self) -> Self {
        match self {
            Patch::Merge(partial) => Patch::Merge(partial.clone()),
            Patch::With(f) => Patch::With(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for Patch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Patch::Merge(_) => f.write_str("Merge(..)"),
            Patch::With(_) => f.write_str("With(..)"),
        }
    }
}

// ============================================================================
// Ordering
// ============================================================================

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ascending
    #[default]
    Asc,
    /// Descending
    Desc,
}

/// Sort key for [`crate::StMap::order_by`]
pub enum OrderBy<T> {
    /// A single field
    Field(String),
    /// Several fields, compared left to right
    Fields(Vec<String>),
    /// A comparator
    By(CompareFn<T>),
}

impl<T: Record> OrderBy<T> {
    /// Sort by a single field
    pub fn field(name: impl Into<String>) -> Self {
        OrderBy::Field(name.into())
    }

    /// Sort with a comparator
    pub fn by(f: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        OrderBy::By(Arc::new(f))
    }

    /// Compare two entities in ascending order
    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        match self {
            OrderBy::Field(name) => compare_values(a.field(name).as_ref(), b.field(name).as_ref()),
            OrderBy::Fields(names) => names
                .iter()
                .map(|name| compare_values(a.field(name).as_ref(), b.field(name).as_ref()))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal),
            OrderBy::By(f) => f(a, b),
        }
    }
}

impl<T> Clone for OrderBy<T> {
    fn clone(&self) -> Self {
        match self {
            OrderBy::Field(name) => OrderBy::Field(name.clone()),
            OrderBy::Fields(names) => OrderBy::Fields(names.clone()),
            OrderBy::By(f) => OrderBy::By(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for OrderBy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderBy::Field(name) => f.debug_tuple("Field").field(name).finish(),
            OrderBy::Fields(names) => f.debug_tuple("Fields").field(names).finish(),
            OrderBy::By(_) => f.write_str("By(..)"),
        }
    }
}

/// Order JSON scalars: missing and null first, then booleans, numbers,
/// strings, and finally containers by their serialized form.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) | Some(Value::Object(_)) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => match rank(a).cmp(&rank(b)) {
            Ordering::Equal if rank(a) == 4 => {
                let x = a.map(Value::to_string).unwrap_or_default();
                let y = b.map(Value::to_string).unwrap_or_default();
                x.cmp(&y)
            }
            ordering => ordering,
        },
    }
}

// ============================================================================
// Filtering and search
// ============================================================================

/// Filter applied by query projections
pub enum FilterBy<T> {
    /// Keep entities for which the predicate holds
    Where(Predicate<T>),
    /// Keep entities whose field equals the value
    Eq(String, Value),
}

impl<T: Record> FilterBy<T> {
    /// Filter with a predicate
    pub fn by(predicate: impl Fn(&T, &Id) -> bool + Send + Sync + 'static) -> Self {
        FilterBy::Where(Arc::new(predicate))
    }

    /// Filter on a `[key, value]` pair
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterBy::Eq(field.into(), value.into())
    }

    /// Whether an entity passes the filter
    pub fn matches(&self, entity: &T, id: &Id) -> bool {
        match self {
            FilterBy::Where(p) => p(entity, id),
            FilterBy::Eq(field, value) => entity.field(field).as_ref() == Some(value),
        }
    }
}

impl<T> Clone for FilterBy<T> {
    fn clone(&self) -> Self {
        match self {
            FilterBy::Where(p) => FilterBy::Where(Arc::clone(p)),
            FilterBy::Eq(field, value) => FilterBy::Eq(field.clone(), value.clone()),
        }
    }
}

impl<T> fmt::Debug for FilterBy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterBy::Where(_) => f.write_str("Where(..)"),
            FilterBy::Eq(field, value) => f.debug_tuple("Eq").field(field).field(value).finish(),
        }
    }
}

/// Which text a search runs over
pub enum SearchBy<T> {
    /// One string field
    Field(String),
    /// Several string fields; any may match
    Fields(Vec<String>),
    /// Text computed from the entity
    Text(TextFn<T>),
}

impl<T: Record> SearchBy<T> {
    /// Search a single field
    pub fn field(name: impl Into<String>) -> Self {
        SearchBy::Field(name.into())
    }

    /// Search computed text
    pub fn text(f: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        SearchBy::Text(Arc::new(f))
    }

    /// Candidate strings for an entity; non-string fields are skipped
    pub fn haystacks(&self, entity: &T) -> Vec<String> {
        let string_field = |name: &String| match entity.field(name) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        match self {
            SearchBy::Field(name) => string_field(name).into_iter().collect(),
            SearchBy::Fields(names) => names.iter().filter_map(string_field).collect(),
            SearchBy::Text(f) => vec![f(entity)],
        }
    }
}

impl<T> Clone for SearchBy<T> {
    fn clone(&self) -> Self {
        match self {
            SearchBy::Field(name) => SearchBy::Field(name.clone()),
            SearchBy::Fields(names) => SearchBy::Fields(names.clone()),
            SearchBy::Text(f) => SearchBy::Text(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for SearchBy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchBy::Field(name) => f.debug_tuple("Field").field(name).finish(),
            SearchBy::Fields(names) => f.debug_tuple("Fields").field(names).finish(),
            SearchBy::Text(_) => f.write_str("Text(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compare_values_ranks() {
        assert_eq!(compare_values(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(2)), Some(&json!(10))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
        assert_eq!(compare_values(Some(&json!(1)), Some(&json!("1"))), Ordering::Less);
    }

    #[test]
    fn test_order_by_fields_breaks_ties() {
        let order: OrderBy<Value> = OrderBy::Fields(vec!["group".into(), "name".into()]);
        let a = json!({ "group": 1, "name": "b" });
        let b = json!({ "group": 1, "name": "a" });
        assert_eq!(order.compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_filter_by_pair() {
        let filter: FilterBy<Value> = FilterBy::eq("done", true);
        assert!(filter.matches(&json!({ "done": true }), &Id::from(1)));
        assert!(!filter.matches(&json!({ "done": false }), &Id::from(1)));
        assert!(!filter.matches(&json!({}), &Id::from(1)));
    }

    #[test]
    fn test_search_haystacks_skip_non_strings() {
        let by: SearchBy<Value> = SearchBy::Fields(vec!["name".into(), "age".into()]);
        assert_eq!(by.haystacks(&json!({ "name": "Ana", "age": 3 })), vec!["Ana".to_string()]);
    }

    #[test]
    fn test_select_ids_helper() {
        let select: Select<Value> = Select::ids([1, 2]);
        assert!(matches!(select, Select::Ids(ref ids) if ids == &vec![Id::from(1), Id::from(2)]));
    }
}
