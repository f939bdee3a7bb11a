use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::storage::{FileStore, KeyValueStore, MemoryStore, SqliteStore};
use crate::store::{BookStore, DEFAULT_STORAGE_KEY};

const DATA_DIR_ENV: &str = "LIBRARY_DATA_DIR";
const DEFAULT_DB_FILE: &str = "library.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BackendConfig {
    Memory,
    Sqlite { path: PathBuf },
    File { dir: PathBuf },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Sqlite {
            path: PathBuf::from(DEFAULT_DB_FILE),
        }
    }
}

/// Where and under which key the library lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryConfig {
    pub storage_key: String,
    pub backend: BackendConfig,
    /// Base for relative backend paths. `LIBRARY_DATA_DIR` takes precedence.
    pub data_dir: Option<PathBuf>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        LibraryConfig {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            backend: BackendConfig::default(),
            data_dir: None,
        }
    }
}

impl LibraryConfig {
    /// Reads a JSON config file. A missing file means defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|err| StoreError::Config(format!("{}: {}", path.display(), err)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let config: LibraryConfig =
            serde_json::from_str(raw).map_err(|err| StoreError::Config(err.to_string()))?;
        if config.storage_key.trim().is_empty() {
            return Err(StoreError::Config("storageKey must not be empty".to_string()));
        }
        Ok(config)
    }

    pub fn base_dir(&self) -> PathBuf {
        std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| self.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    pub fn open_storage(&self) -> Result<Box<dyn KeyValueStore>, StoreError> {
        let storage: Box<dyn KeyValueStore> = match &self.backend {
            BackendConfig::Memory => Box::new(MemoryStore::new()),
            BackendConfig::Sqlite { path } => Box::new(SqliteStore::open(self.resolve(path))?),
            BackendConfig::File { dir } => Box::new(FileStore::open(self.resolve(dir))?),
        };
        Ok(storage)
    }

    pub fn open_store(&self) -> Result<BookStore<Box<dyn KeyValueStore>>, StoreError> {
        Ok(BookStore::with_key(self.open_storage()?, self.storage_key.clone()))
    }
}
