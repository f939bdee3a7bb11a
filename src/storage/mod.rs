//! Key-value storage port.
//!
//! The book store keeps its whole collection under one key, so a backend only
//! needs whole-value `get`/`set`/`remove`. Backends:
//!
//! - [`MemoryStore`] - process-local, used by tests and throwaway sessions
//! - [`SqliteStore`] - a single `meta` table in an SQLite file
//! - [`FileStore`] - one file per key, replaced atomically on write

mod file;
mod memory;
mod sqlite;

use std::sync::Arc;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Failure inside a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

/// Whole-value key-value storage.
///
/// A `set` either replaces the value completely or fails; readers never see a
/// partially written value. Removing a missing key is not an error.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Box<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}
