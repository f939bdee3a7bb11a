//! Personal library tracker.
//!
//! Book records live as one JSON array under a single key of a pluggable
//! key-value backend ([`storage`]). [`BookStore`] owns that collection and
//! exposes create/read/update/delete; [`stats`] folds it into reading
//! statistics. [`metadata`] is an optional remote catalog lookup for
//! pre-filling new books.

pub mod config;
pub mod error;
pub mod metadata;
pub mod models;
pub mod stats;
pub mod storage;
pub mod store;

pub use config::{BackendConfig, LibraryConfig};
pub use error::StoreError;
pub use models::{BookPatch, BookRecord, NewBook, ReadingStatus};
pub use stats::{compute_statistics, summarize, Stats};
pub use storage::{FileStore, KeyValueStore, MemoryStore, SqliteStore, StorageError};
pub use store::{BookStore, DEFAULT_STORAGE_KEY};
