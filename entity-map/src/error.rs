//! Error types for entity-map

/// Result type for entity-map operations
pub type Result<T> = std::result::Result<T, MapError>;

/// Setup errors raised while building a collection
///
/// Lookups and mutations against absent keys are never errors; they are
/// silent no-ops.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// The identifier strategy is empty or otherwise unusable
    #[error("IdGetter is required")]
    MissingIdGetter,

    /// An entity did not resolve to a key under the configured accessor
    #[error("Entity has no identifier at `{0}`")]
    UnresolvableId(String),
}
