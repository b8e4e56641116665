//! Record trait, merge strategies and distinct-change equality
//!
//! The collection never inspects an entity beyond what [`Record`] exposes:
//! named field reads (for id resolution, filtering, ordering and search),
//! partial merges (for update and upsert) and a shallow comparison (for
//! suppressing redundant notifications).

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Caller-defined entity record
///
/// A *partial* record is a value of the same type carrying only the fields
/// to change; [`Record::merge`] lays it over an existing record.
///
/// Implementations are provided for [`serde_json::Value`] and
/// [`serde_json::Map`]. Typed records implement the trait by hand:
///
/// ```rust
/// use entity_map::Record;
/// use serde_json::Value;
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct Todo {
///     id: i64,
///     title: Option<String>,
/// }
///
/// impl Record for Todo {
///     fn field(&self, name: &str) -> Option<Value> {
///         match name {
///             "id" => Some(self.id.into()),
///             "title" => self.title.clone().map(Value::from),
///             _ => None,
///         }
///     }
///
///     fn merge(&self, patch: &Self) -> Self {
///         Todo {
///             id: patch.id,
///             title: patch.title.clone().or_else(|| self.title.clone()),
///         }
///     }
///
///     fn shallow_eq(&self, other: &Self) -> bool {
///         self == other
///     }
/// }
/// ```
pub trait Record: Clone + Send + Sync + 'static {
    /// Read a top-level field
    fn field(&self, name: &str) -> Option<Value>;

    /// Shallow merge: every field present in `patch` replaces the field in `self`
    fn merge(&self, patch: &Self) -> Self;

    /// Recursive merge of nested records
    fn deep_merge(&self, patch: &Self) -> Self {
        self.merge(patch)
    }

    /// Field-by-field comparison with no deep traversal
    ///
    /// Records whose fields are shared handles (`Arc`, interned ids) should
    /// compare each field by pointer. JSON values have no identity below the
    /// top level, so the [`serde_json::Value`] and [`serde_json::Map`]
    /// implementations compare each top-level field by value instead; a
    /// nested object that was rebuilt with the same contents counts as equal.
    fn shallow_eq(&self, other: &Self) -> bool;
}

impl Record for Value {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn merge(&self, patch: &Self) -> Self {
        match (self, patch) {
            (Value::Object(current), Value::Object(patch)) => {
                Value::Object(current.merge(patch))
            }
            _ => patch.clone(),
        }
    }

    fn deep_merge(&self, patch: &Self) -> Self {
        match (self, patch) {
            (Value::Object(current), Value::Object(patch)) => {
                Value::Object(current.deep_merge(patch))
            }
            _ => patch.clone(),
        }
    }

    fn shallow_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a.shallow_eq(b),
            _ => self == other,
        }
    }
}

impl Record for Map<String, Value> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn merge(&self, patch: &Self) -> Self {
        let mut merged = self.clone();
        for (key, value) in patch {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    fn deep_merge(&self, patch: &Self) -> Self {
        let mut merged = self.clone();
        for (key, value) in patch {
            let next = match merged.get(key) {
                Some(existing @ Value::Object(_)) if value.is_object() => {
                    existing.deep_merge(value)
                }
                _ => value.clone(),
            };
            merged.insert(key.clone(), next);
        }
        merged
    }

    fn shallow_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|v| v == value))
    }
}

// ============================================================================
// MergeStrategy
// ============================================================================

/// Custom merge function: `(current, patch) -> merged`
pub type MergeFn<T> = Arc<dyn Fn(&T, &T) -> T + Send + Sync>;

/// How an incoming partial is combined with a stored entity
///
/// `Shallow` (the default) is the spread merge `{...current, ...patch}`.
/// `Deep` recurses into nested records.
pub enum MergeStrategy<T> {
    /// Top-level field replacement
    Shallow,
    /// Recursive partial merge
    Deep,
    /// Caller-supplied merge
    Custom(MergeFn<T>),
}

impl<T: Record> MergeStrategy<T> {
    /// Wrap a closure as a custom strategy
    pub fn custom(f: impl Fn(&T, &T) -> T + Send + Sync + 'static) -> Self {
        MergeStrategy::Custom(Arc::new(f))
    }

    /// Combine `patch` into `current`
    pub fn apply(&self, current: &T, patch: &T) -> T {
        match self {
            MergeStrategy::Shallow => current.merge(patch),
            MergeStrategy::Deep => current.deep_merge(patch),
            MergeStrategy::Custom(f) => f(current, patch),
        }
    }
}

impl<T> Default for MergeStrategy<T> {
    fn default() -> Self {
        MergeStrategy::Shallow
    }
}

impl<T> Clone for MergeStrategy<T> {
    fn clone(&self) -> Self {
        match self {
            MergeStrategy::Shallow => MergeStrategy::Shallow,
            MergeStrategy::Deep => MergeStrategy::Deep,
            MergeStrategy::Custom(f) => MergeStrategy::Custom(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for MergeStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::Shallow => f.write_str("Shallow"),
            MergeStrategy::Deep => f.write_str("Deep"),
            MergeStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

// ============================================================================
// Equality
// ============================================================================

/// Equality used to gate entity selections
pub type EqFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Same allocation, or same field set with equal field values
pub fn entity_eq<T: Record>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::ptr_eq(a, b) || a.shallow_eq(b)
}

/// [`entity_eq`] lifted over optional entities
///
/// Two absent values are equal; absent against present is not.
pub fn option_entity_eq<T: Record>(a: Option<&Arc<T>>, b: Option<&Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => entity_eq(a, b),
        _ => false,
    }
}

/// Same length and pairwise [`entity_eq`], in order
pub fn entities_eq<T: Record>(a: &[Arc<T>], b: &[Arc<T>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| entity_eq(x, y))
}
