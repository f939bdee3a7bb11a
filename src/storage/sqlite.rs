use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{KeyValueStore, StorageError};

/// Key-value slots in a single SQLite table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        log::info!("opened sqlite storage at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT
            )",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self, operation: &'static str) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::LockPoisoned(operation))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.connection("get")?;
        let value: Option<Option<String>> = conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value.flatten())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.connection("set")?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.connection("remove")?;
        conn.execute("DELETE FROM meta WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteStore;
    use crate::storage::KeyValueStore;

    #[test]
    fn upsert_replaces_previous_value() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("books", "[]").unwrap();
        store.set("books", r#"[{"id":"a"}]"#).unwrap();
        assert_eq!(
            store.get("books").unwrap().as_deref(),
            Some(r#"[{"id":"a"}]"#)
        );
    }

    #[test]
    fn missing_key_reads_as_none_and_removes_cleanly() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get("nothing").unwrap(), None);
        store.remove("nothing").unwrap();
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("library.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("books", "[]").unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.get("books").unwrap().as_deref(), Some("[]"));
        reopened.remove("books").unwrap();
        assert_eq!(reopened.get("books").unwrap(), None);
    }
}
