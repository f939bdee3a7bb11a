use thiserror::Error;

use crate::storage::StorageError;

/// Failure of a book store operation that could not complete.
///
/// Not-found is not an error: lookups and updates return `None` instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("book collection serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("book store write lock poisoned")]
    LockPoisoned,
    #[error("configuration error: {0}")]
    Config(String),
}
