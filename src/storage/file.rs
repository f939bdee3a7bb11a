use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{KeyValueStore, StorageError};

/// One file per key inside a directory.
///
/// Writes land in a uniquely named temp file that is renamed over the target,
/// so the previous value stays readable until the new one is complete.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        log::info!("opened file storage at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let target = self.path_for(key);
        let temp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));

        let written = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&temp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp, &target)
        })();

        if let Err(err) = written {
            let _ = fs::remove_file(&temp);
            return Err(err.into());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FileStore;
    use crate::storage::KeyValueStore;

    #[test]
    fn keys_with_separators_map_to_safe_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set("@library:books/../x", "[]").unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].contains('/'));
        assert!(!names[0].contains(':'));
        assert_eq!(
            store.get("@library:books/../x").unwrap().as_deref(),
            Some("[]")
        );
    }

    #[test]
    fn overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("data")).unwrap();
        store.set("books", "[1]").unwrap();
        store.set("books", "[1,2]").unwrap();

        assert_eq!(store.get("books").unwrap().as_deref(), Some("[1,2]"));
        let count = std::fs::read_dir(store.dir()).unwrap().count();
        assert_eq!(count, 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.remove("books").unwrap();
        store.set("books", "[]").unwrap();
        store.remove("books").unwrap();
        store.remove("books").unwrap();
        assert_eq!(store.get("books").unwrap(), None);
    }
}
