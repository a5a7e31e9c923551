//! Key/value persistence backends for OAuth tokens.
//!
//! Each store is scoped to a single namespace, so `clear()` wipes exactly
//! the keys written through it and nothing else.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use wayfare_core::StorageError;

/// Injectable string key/value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Remove every key in this store's namespace.
    fn clear(&self) -> Result<(), StorageError>;

    /// Apply several writes together. Backends that can do this in one
    /// write override it.
    fn apply(&self, set: &[(&str, &str)], remove: &[&str]) -> Result<(), StorageError> {
        for (key, value) in set {
            self.set(key, value)?;
        }
        for key in remove {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// In-memory store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.entries.lock().clear();
        Ok(())
    }
}

/// File-based storage: one JSON object per namespace.
///
/// Tokens are stored in the user's config directory with owner-only
/// permissions on unix.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStore {
    /// Store the namespace at `<dir>/<namespace>.json`.
    pub fn new(dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", namespace)),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<HashMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let json = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), StorageError> {
        if map.is_empty() {
            return self.remove_file();
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn remove_file(&self) -> Result<(), StorageError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            tracing::debug!("Removed token file {:?}", self.path);
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock();
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.apply(&[(key, value)], &[])
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.apply(&[], &[key])
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        self.remove_file()
    }

    fn apply(&self, set: &[(&str, &str)], remove: &[&str]) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut map = self.read_map()?;
        for (key, value) in set {
            map.insert((*key).to_string(), (*value).to_string());
        }
        for key in remove {
            map.remove(*key);
        }
        self.write_map(&map)
    }
}

const KEYRING_SERVICE: &str = "wayfare";

/// System keyring storage: the namespace map is one keyring entry.
pub struct KeyringStore {
    namespace: String,
    lock: Mutex<()>,
}

impl KeyringStore {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            lock: Mutex::new(()),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, StorageError> {
        keyring::Entry::new(KEYRING_SERVICE, &self.namespace)
            .map_err(|e| StorageError::Keyring(e.to_string()))
    }

    fn read_map(&self) -> Result<HashMap<String, String>, StorageError> {
        match self.entry()?.get_password() {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(keyring::Error::NoEntry) => Ok(HashMap::new()),
            Err(e) => Err(StorageError::Keyring(e.to_string())),
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), StorageError> {
        if map.is_empty() {
            return self.delete_entry();
        }
        let json = serde_json::to_string(map)?;
        self.entry()?
            .set_password(&json)
            .map_err(|e| StorageError::Keyring(e.to_string()))
    }

    fn delete_entry(&self) -> Result<(), StorageError> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StorageError::Keyring(e.to_string())),
        }
    }
}

impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock();
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.apply(&[(key, value)], &[])
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.apply(&[], &[key])
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        self.delete_entry()
    }

    fn apply(&self, set: &[(&str, &str)], remove: &[&str]) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut map = self.read_map()?;
        for (key, value) in set {
            map.insert((*key).to_string(), (*value).to_string());
        }
        for key in remove {
            map.remove(*key);
        }
        self.write_map(&map)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_memory_store_roundtrip_and_clear() {
        let store = MemoryStore::new();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        assert_eq!(store.get("a").unwrap(), Some("1".to_string()));

        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);

        store.clear().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::new(dir.path(), "google_calendar");
        store.apply(&[("a", "1"), ("b", "2")], &[]).unwrap();

        let reopened = FileStore::new(dir.path(), "google_calendar");
        assert_eq!(reopened.get("a").unwrap(), Some("1".to_string()));
        assert_eq!(reopened.get("b").unwrap(), Some("2".to_string()));
    }

    #[test]
    fn test_file_store_namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let calendar = FileStore::new(dir.path(), "google_calendar");
        let other = FileStore::new(dir.path(), "other");

        calendar.set("token", "cal").unwrap();
        other.set("token", "other").unwrap();
        calendar.clear().unwrap();

        assert_eq!(calendar.get("token").unwrap(), None);
        assert_eq!(other.get("token").unwrap(), Some("other".to_string()));
    }

    #[test]
    fn test_file_store_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "ns");
        store.set("k", "v").unwrap();
        assert!(store.path().exists());

        store.clear().unwrap();

        assert!(!store.path().exists());
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "ns");
        std::fs::write(store.path(), "not json").unwrap();

        let result = store.get("k");

        assert!(matches!(result, Err(StorageError::Serialization(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "ns");
        store.set("k", "v").unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
