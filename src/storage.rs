use crate::error::StorageError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Durable string key-value storage shared by the reader components.
///
/// Only single-key writes are atomic; callers must not rely on anything
/// stronger.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Reads a key and parses it, treating a missing key as `None`.
pub fn get_parsed<T: std::str::FromStr>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key)? {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| StorageError::Corrupt {
                key: key.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}

pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .db
            .get(key)?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.db.insert(key, value.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.db.remove(key)?;
        self.db.flush()?;
        Ok(())
    }
}

/// Process-local store, used when no data directory is available and in tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sled_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state");

        {
            let store = SledStore::open(&path).unwrap();
            store.set("current_page", "12").unwrap();
        }

        let store = SledStore::open(&path).unwrap();
        assert_eq!(store.get("current_page").unwrap().as_deref(), Some("12"));

        store.remove("current_page").unwrap();
        assert_eq!(store.get("current_page").unwrap(), None);
    }

    #[test]
    fn test_get_parsed() {
        let store = MemoryStore::new();
        assert_eq!(get_parsed::<u64>(&store, "audio_playback_count").unwrap(), None);

        store.set("audio_playback_count", "7").unwrap();
        assert_eq!(get_parsed::<u64>(&store, "audio_playback_count").unwrap(), Some(7));

        store.set("audio_playback_count", "seven").unwrap();
        assert!(get_parsed::<u64>(&store, "audio_playback_count").is_err());
    }
}
