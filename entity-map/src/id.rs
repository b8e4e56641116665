//! Entity identifiers and identifier resolution
//!
//! Every entity in a collection is keyed by an [`Id`]. The key is never
//! stored separately by callers; it is computed from the entity itself by an
//! [`IdGetter`], which is either a top-level property name, a dotted path into
//! nested data, or an arbitrary function.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MapError, Result};
use crate::record::Record;

/// Property used when no identifier strategy is configured
pub const DEFAULT_ID_KEY: &str = "id";

// ============================================================================
// Id
// ============================================================================

/// Primitive identifier of an entity within a collection
///
/// Integers and strings are distinct keys: `Id::Num(1)` and `Id::Str("1")`
/// never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Numeric identifier
    Num(i64),
    /// String identifier
    Str(String),
}

impl Id {
    /// Convert a JSON scalar into an identifier
    ///
    /// Only integers and strings qualify. Floats, booleans, null and
    /// containers yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Id::Num),
            Value::String(s) => Some(Id::Str(s.clone())),
            _ => None,
        }
    }

    /// Whether this identifier is numeric
    pub fn is_numeric(&self) -> bool {
        matches!(self, Id::Num(_))
    }

    /// JSON form of the identifier
    pub fn to_value(&self) -> Value {
        match self {
            Id::Num(n) => Value::from(*n),
            Id::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Num(n) => write!(f, "{}", n),
            Id::Str(s) => f.write_str(s),
        }
    }
}

macro_rules! id_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Id {
                fn from(value: $ty) -> Self {
                    Id::Num(value as i64)
                }
            }
        )*
    };
}

id_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::Str(value.to_string())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::Str(value)
    }
}

impl From<&Id> for Id {
    fn from(value: &Id) -> Self {
        value.clone()
    }
}

// ============================================================================
// IdGetter
// ============================================================================

/// Function form of an identifier strategy
pub type IdFn<T> = Arc<dyn Fn(&T) -> Option<Id> + Send + Sync>;

/// Strategy for resolving an entity's key
///
/// Resolution must be deterministic and side-effect free. A valid entity is
/// expected to always resolve; entities that don't are skipped by the batch
/// operations that need a key.
///
/// # Example
///
/// ```rust
/// use entity_map::{Id, IdGetter};
/// use serde_json::json;
///
/// let by_path: IdGetter<serde_json::Value> = IdGetter::parse("meta.key");
/// let entity = json!({ "meta": { "key": "a-1" } });
/// assert_eq!(by_path.resolve(&entity), Some(Id::from("a-1")));
/// ```
pub enum IdGetter<T> {
    /// Top-level property name
    Property(String),
    /// Nested lookup, one segment per level
    Path(Vec<String>),
    /// Arbitrary resolver
    Func(IdFn<T>),
}

impl<T: Record> IdGetter<T> {
    /// Build a getter from a property name or dotted path
    ///
    /// `"id"` becomes [`IdGetter::Property`], `"a.b.c"` becomes
    /// [`IdGetter::Path`].
    pub fn parse(accessor: &str) -> Self {
        if accessor.contains('.') {
            IdGetter::Path(accessor.split('.').map(str::to_string).collect())
        } else {
            IdGetter::Property(accessor.to_string())
        }
    }

    /// Build a getter from a closure
    pub fn func(f: impl Fn(&T) -> Option<Id> + Send + Sync + 'static) -> Self {
        IdGetter::Func(Arc::new(f))
    }

    /// Reject strategies that can never resolve anything
    pub fn validate(&self) -> Result<()> {
        match self {
            IdGetter::Property(name) if name.is_empty() => Err(MapError::MissingIdGetter),
            IdGetter::Path(segments)
                if segments.is_empty() || segments.iter().any(|s| s.is_empty()) =>
            {
                Err(MapError::MissingIdGetter)
            }
            _ => Ok(()),
        }
    }

    /// Resolve the key of an entity
    pub fn resolve(&self, entity: &T) -> Option<Id> {
        match self {
            IdGetter::Property(name) => entity.field(name).as_ref().and_then(Id::from_value),
            IdGetter::Path(segments) => {
                let (head, rest) = segments.split_first()?;
                let mut current = entity.field(head)?;
                for segment in rest {
                    current = step(&current, segment)?;
                }
                Id::from_value(&current)
            }
            IdGetter::Func(f) => f(entity),
        }
    }

    /// Resolve the key of an entity, failing if it has none
    pub fn require(&self, entity: &T) -> Result<Id> {
        self.resolve(entity).ok_or_else(|| MapError::UnresolvableId(self.describe()))
    }

    /// Human-readable form used in logs and errors
    pub fn describe(&self) -> String {
        match self {
            IdGetter::Property(name) => name.clone(),
            IdGetter::Path(segments) => segments.join("."),
            IdGetter::Func(_) => "<fn>".to_string(),
        }
    }
}

fn step(value: &Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(segment).cloned(),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        _ => None,
    }
}

impl<T> Default for IdGetter<T> {
    fn default() -> Self {
        IdGetter::Property(DEFAULT_ID_KEY.to_string())
    }
}

impl<T> Clone for IdGetter<T> {
    fn clone(&self) -> Self {
        match self {
            IdGetter::Property(name) => IdGetter::Property(name.clone()),
            IdGetter::Path(segments) => IdGetter::Path(segments.clone()),
            IdGetter::Func(f) => IdGetter::Func(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for IdGetter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdGetter::Property(name) => f.debug_tuple("Property").field(name).finish(),
            IdGetter::Path(segments) => f.debug_tuple("Path").field(segments).finish(),
            IdGetter::Func(_) => f.write_str("Func(..)"),
        }
    }
}

impl<T: Record> From<&str> for IdGetter<T> {
    fn from(accessor: &str) -> Self {
        IdGetter::parse(accessor)
    }
}

impl<T: Record> From<Vec<String>> for IdGetter<T> {
    fn from(segments: Vec<String>) -> Self {
        IdGetter::Path(segments)
    }
}
