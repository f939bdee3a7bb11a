//! The book collection, persisted as one JSON array under a single storage key.
//!
//! Every mutation is a full read-modify-write of the collection. Mutations are
//! serialized by a write lock so overlapping calls inside one process cannot
//! drop each other's changes; reads never take the lock and always observe the
//! last fully persisted collection.
//!
//! Read faults are absorbed: `list_all` and `get_by_id` log and fall back to an
//! empty collection. A blob that is not a JSON array is treated as empty on
//! every path. Inside an array, each element decodes on its own: elements that
//! are not usable records are hidden from readers but written back untouched.
//! Storage faults that stop a mutation are returned to the caller.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{BookPatch, BookRecord, NewBook};
use crate::stats::{self, Stats};
use crate::storage::KeyValueStore;

pub const DEFAULT_STORAGE_KEY: &str = "@library:books";

/// One element of the persisted array.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Entry {
    Book(BookRecord),
    Unreadable(Value),
}

impl Entry {
    fn book(&self) -> Option<&BookRecord> {
        match self {
            Entry::Book(book) => Some(book),
            Entry::Unreadable(_) => None,
        }
    }
}

pub struct BookStore<S> {
    storage: S,
    key: String,
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> BookStore<S> {
    pub fn new(storage: S) -> Self {
        Self::with_key(storage, DEFAULT_STORAGE_KEY)
    }

    pub fn with_key(storage: S, key: impl Into<String>) -> Self {
        BookStore {
            storage,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.key
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Every stored book, in insertion order. Never fails.
    pub fn list_all(&self) -> Vec<BookRecord> {
        match self.storage.get(&self.key) {
            Ok(Some(raw)) => books_of(self.decode(&raw)),
            Ok(None) => Vec::new(),
            Err(err) => {
                log::error!("failed to read books from {}: {}", self.key, err);
                Vec::new()
            }
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<BookRecord> {
        self.list_all().into_iter().find(|book| book.id == id)
    }

    pub fn count(&self) -> usize {
        self.list_all().len()
    }

    /// Every stored book, most recently added first.
    pub fn list_recent(&self) -> Vec<BookRecord> {
        let mut books = self.list_all();
        books.sort_by(|a, b| b.added_date.cmp(&a.added_date));
        books
    }

    pub fn statistics(&self) -> Stats {
        stats::summarize(&self.list_all())
    }

    /// Adds a book with a fresh id, the current time and default progress fields.
    pub fn create(&self, input: NewBook) -> Result<BookRecord, StoreError> {
        let _guard = self.lock_writes()?;
        let mut entries = self.load_for_write()?;

        let id = fresh_id(&entries);
        let book = BookRecord::from_new(input, id, Utc::now());
        entries.push(Entry::Book(book.clone()));
        self.persist(&entries)?;

        log::info!(
            "book added: \"{}\" ({}), {} entries stored",
            book.title,
            book.id,
            entries.len()
        );
        Ok(book)
    }

    /// Merges `patch` into the book with `id`. `Ok(None)` when no such book exists,
    /// in which case nothing is written.
    pub fn update(&self, id: &str, patch: BookPatch) -> Result<Option<BookRecord>, StoreError> {
        let _guard = self.lock_writes()?;
        let mut entries = self.load_for_write()?;

        let Some(book) = entries.iter_mut().find_map(|entry| match entry {
            Entry::Book(book) if book.id == id => Some(book),
            _ => None,
        }) else {
            log::warn!("book to update not found: {}", id);
            return Ok(None);
        };
        patch.apply_to(book);
        let updated = book.clone();

        self.persist(&entries)?;
        log::info!("book updated: {}", id);
        Ok(Some(updated))
    }

    /// Removes the book with `id`. Succeeds whether or not it existed.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.lock_writes()?;
        let mut entries = self.load_for_write()?;

        let before = entries.len();
        entries.retain(|entry| entry.book().map_or(true, |book| book.id != id));
        if entries.len() == before {
            log::warn!("book to delete not found: {}", id);
        }

        self.persist(&entries)?;
        log::info!("book deleted (or absent): {}, {} entries remain", id, entries.len());
        Ok(())
    }

    /// Drops the whole collection by removing the storage key.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        let _guard = self.lock_writes()?;
        self.storage.remove(&self.key)?;
        log::info!("all books cleared from {}", self.key);
        Ok(())
    }

    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // Storage faults abort the mutation; a blob that is not an array is replaced.
    fn load_for_write(&self) -> Result<Vec<Entry>, StoreError> {
        Ok(self
            .storage
            .get(&self.key)?
            .map(|raw| self.decode(&raw))
            .unwrap_or_default())
    }

    fn decode(&self, raw: &str) -> Vec<Entry> {
        let values = match serde_json::from_str::<Vec<Value>>(raw) {
            Ok(values) => values,
            Err(err) => {
                log::error!(
                    "stored books under {} are not a valid collection, treating as empty: {}",
                    self.key,
                    err
                );
                return Vec::new();
            }
        };

        values
            .into_iter()
            .enumerate()
            .map(|(index, value)| match BookRecord::deserialize(&value) {
                Ok(book) => Entry::Book(book),
                Err(err) => {
                    log::error!(
                        "stored book #{} under {} is unreadable, keeping it as-is: {}",
                        index,
                        self.key,
                        err
                    );
                    Entry::Unreadable(value)
                }
            })
            .collect()
    }

    fn persist(&self, entries: &[Entry]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(entries)?;
        self.storage.set(&self.key, &raw)?;
        Ok(())
    }
}

fn books_of(entries: Vec<Entry>) -> Vec<BookRecord> {
    entries
        .into_iter()
        .filter_map(|entry| match entry {
            Entry::Book(book) => Some(book),
            Entry::Unreadable(_) => None,
        })
        .collect()
}

fn fresh_id(entries: &[Entry]) -> String {
    loop {
        let id = Uuid::new_v4().to_string();
        let taken = entries.iter().any(|entry| match entry {
            Entry::Book(book) => book.id == id,
            Entry::Unreadable(value) => {
                value.get("id").and_then(Value::as_str) == Some(id.as_str())
            }
        });
        if !taken {
            return id;
        }
    }
}
