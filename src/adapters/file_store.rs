//! File-based state store adapter.
//!
//! Persists the key-value state as a single JSON object in
//! `~/.bbhc/state.json`, the desktop equivalent of the web client's
//! `localStorage`.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::traits::{StateStore, StoreError};

/// The state directory name.
const STATE_DIR: &str = ".bbhc";

/// The state file name.
const STATE_FILE: &str = "state.json";

/// JSON-file backed [`StateStore`].
///
/// Reads and writes go through an in-memory map guarded by a mutex; every
/// mutation rewrites the whole file, which stays tiny (a handful of keys).
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl FileStateStore {
    /// Create a store at the default location (`~/.bbhc/state.json`).
    ///
    /// Returns `None` if the home directory cannot be determined.
    pub fn new() -> Option<Self> {
        let home = dirs::home_dir()?;
        Some(Self::at_path(home.join(STATE_DIR).join(STATE_FILE)))
    }

    /// Create a store backed by an explicit file path.
    pub fn at_path(path: PathBuf) -> Self {
        let cache = Self::load_map(&path);
        Self {
            path,
            cache: Mutex::new(cache),
        }
    }

    /// Path to the backing file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn load_map(path: &PathBuf) -> HashMap<String, String> {
        if !path.exists() {
            return HashMap::new();
        }
        let file = match File::open(path) {
            Ok(f) => f,
            Err(_) => return HashMap::new(),
        };
        serde_json::from_reader(BufReader::new(file)).unwrap_or_default()
    }

    fn flush(&self, map: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }

        let file = File::create(&self.path).map_err(|e| StoreError::Io(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, map)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        writer.flush().map_err(|e| StoreError::Io(e.to_string()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.lock();
        map.insert(key.to_string(), value.to_string());
        self.flush(&map)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.lock();
        if map.remove(key).is_none() {
            return Ok(());
        }
        self.flush(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(temp_dir: &TempDir) -> FileStateStore {
        FileStateStore::at_path(temp_dir.path().join(STATE_DIR).join(STATE_FILE))
    }

    #[test]
    fn test_get_missing_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        assert_eq!(store.get("token").unwrap(), None);
    }

    #[test]
    fn test_set_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store.set("token", "abc123").unwrap();
        assert_eq!(store.get("token").unwrap(), Some("abc123".to_string()));
    }

    #[test]
    fn test_set_creates_parent_dir() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        assert!(!store.path().parent().unwrap().exists());
        store.set("token", "abc").unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_values_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(STATE_DIR).join(STATE_FILE);

        let store = FileStateStore::at_path(path.clone());
        store.set("token", "abc").unwrap();
        store.set("userType", "seller").unwrap();
        drop(store);

        let reopened = FileStateStore::at_path(path);
        assert_eq!(reopened.get("token").unwrap(), Some("abc".to_string()));
        assert_eq!(reopened.get("userType").unwrap(), Some("seller".to_string()));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store.set("token", "abc").unwrap();
        store.remove("token").unwrap();
        store.remove("token").unwrap();
        assert_eq!(store.get("token").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_treated_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(STATE_DIR).join(STATE_FILE);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not valid json").unwrap();

        let store = FileStateStore::at_path(path);
        assert_eq!(store.get("token").unwrap(), None);
    }

    #[test]
    fn test_overwrite_value() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store.set("token", "old").unwrap();
        store.set("token", "new").unwrap();
        assert_eq!(store.get("token").unwrap(), Some("new".to_string()));
    }
}
