//! Durable key/value storage for the session credential.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::warn;

use crate::error::StorageError;

/// Key the session credential is persisted under.
pub const CREDENTIAL_KEY: &str = "game_token";

/// Minimal secret store contract.
pub trait CredentialStorage: Send + Sync {
    fn get_secret(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_secret(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn delete_secret(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process storage for hosts without durable local storage.
#[derive(Debug, Default)]
pub struct MemoryCredentialStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryCredentialStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".to_string()))
    }
}

impl CredentialStorage for MemoryCredentialStorage {
    fn get_secret(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set_secret(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, key: &str) -> Result<(), StorageError> {
        self.entries()?.remove(key);
        Ok(())
    }
}

/// JSON file storage. Writes go through a temp file and a rename.
#[derive(Debug)]
pub struct FileCredentialStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Storage at `<dir>/session.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(StorageError::Io(err.to_string())),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt(e.to_string()))
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        let encoded =
            serde_json::to_vec_pretty(entries).map_err(|e| StorageError::Io(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, encoded).map_err(|e| StorageError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| StorageError::Io(e.to_string()))
    }

    fn update<F>(&self, mutate: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::Unavailable("storage lock poisoned".to_string()))?;
        let mut entries = match self.read_entries() {
            Ok(entries) => entries,
            Err(StorageError::Corrupt(reason)) => {
                warn!(
                    "[Session] Replacing corrupt storage at {}: {}",
                    self.path.display(),
                    reason
                );
                BTreeMap::new()
            }
            Err(err) => return Err(err),
        };
        mutate(&mut entries);
        self.write_entries(&entries)
    }
}

impl CredentialStorage for FileCredentialStorage {
    fn get_secret(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_entries()?.get(key).cloned())
    }

    fn set_secret(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn delete_secret(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}
