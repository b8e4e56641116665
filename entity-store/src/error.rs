//! Error types for entity-store

use std::sync::Arc;

use entity_map::MapError;

/// Result type for entity-store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error value held in a store's error slot
///
/// Shared so every snapshot and subscriber sees the same allocation; two
/// slots are considered equal only when they point at the same error.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors raised while setting up or persisting a store
///
/// Mutations never fail: targeting an absent key is a no-op.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Error building the underlying entity map
    #[error("Entity map error: {0}")]
    Map(#[from] MapError),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The persistence strategy failed to read or write
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A persisted value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A state invariant was broken (development mode only)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Wrap any error for the error slot
pub fn share_error<E>(err: E) -> SharedError
where
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(err)
}

/// Whether two optional error slots hold the same error
pub fn same_error(a: &Option<SharedError>, b: &Option<SharedError>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}
