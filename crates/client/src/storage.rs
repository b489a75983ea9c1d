//! Client-local key/value persistence.
//!
//! Two keys are used: the bypass flag and the last-selected organization.
//! Each key has a single writer; writes are synchronous.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::Context;
use thiserror::Error;

pub const BYPASS_AUTH_KEY: &str = "bypassAuth";
pub const CURRENT_ORGANIZATION_KEY: &str = "currentOrganizationId";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("failed to persist '{key}': {reason}")]
    Write { key: String, reason: String },
}

pub trait LocalStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Read a boolean flag stored as `"true"`/`"false"`.
pub fn read_flag(storage: &dyn LocalStorage, key: &str) -> bool {
    storage.get(key).is_some_and(|v| v == "true")
}

pub fn write_flag(storage: &dyn LocalStorage, key: &str, value: bool) -> Result<(), StorageError> {
    storage.set(key, if value { "true" } else { "false" })
}

/// Process-lifetime storage for tests/dev.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(key);
        Ok(())
    }
}

/// JSON-file-backed storage that survives restarts.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    inner: RwLock<HashMap<String, String>>,
}

impl FileStorage {
    /// Open (or create on first write) the storage file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create storage directory at {:?}", parent))?;
        }

        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read local storage at {:?}", path))?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("local storage at {:?} is not a JSON object", path))?
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            inner: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &HashMap<String, String>) -> anyhow::Result<()> {
        let data = serde_json::to_string_pretty(entries).context("failed to encode local storage")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data).with_context(|| format!("failed to write {:?}", tmp))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {:?}", self.path))?;
        Ok(())
    }

    /// Apply `f` to a copy, write it out, and only then make it visible.
    fn mutate(&self, key: &str, f: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), StorageError> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = map.clone();
        f(&mut next);
        self.flush(&next).map_err(|err| StorageError::Write {
            key: key.to_string(),
            reason: format!("{err:#}"),
        })?;
        *map = next;
        Ok(())
    }
}

impl LocalStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.mutate(key, |map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.mutate(key, |map| {
            map.remove(key);
        })
    }
}

/// `<data_dir>/ledgerline/local-storage.json`.
pub fn default_storage_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir().context("failed to determine platform data directory")?;
    Ok(base.join("ledgerline").join("local-storage.json"))
}
