//! Saved searches persisted in a key-value store.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{QueryCodec, QueryState, Result, SearchError};

/// String key-value persistence.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Deletes a value. Missing keys are not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk.
///
/// The whole file is read and rewritten on every call; a missing file is an
/// empty store.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    /// Creates a store at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            SearchError::Storage(format!("{} is not a JSON object: {}", self.path.display(), e))
        })
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }
}

impl KeyValueStore for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// A named bookmark of a canonical query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSearch {
    pub name: String,
    pub query: String,
}

/// Saved searches of one source, stored under `{namespace}:saved:{source}`.
pub struct SavedSearches {
    storage: Arc<dyn KeyValueStore>,
    key: String,
    codec: QueryCodec,
}

impl SavedSearches {
    /// Creates the saved-search list for `source` in `namespace`.
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        namespace: &str,
        source: &str,
        codec: QueryCodec,
    ) -> Self {
        Self {
            storage,
            key: format!("{}:saved:{}", namespace, source),
            codec,
        }
    }

    /// Returns the storage key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Lists entries in save order.
    ///
    /// A corrupt entry list is logged and treated as empty.
    pub fn list(&self) -> Result<Vec<SavedSearch>> {
        let Some(raw) = self.storage.get(&self.key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!("Ignoring corrupt saved searches under {}: {}", self.key, e);
                Ok(Vec::new())
            }
        }
    }

    /// Saves `query` as `name`, replacing an entry with the same name.
    pub fn save(&self, name: &str, query: &QueryState) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SearchError::InvalidQuery(
                "Saved search name cannot be empty".into(),
            ));
        }
        let entry = SavedSearch {
            name: name.to_string(),
            query: self.codec.to_query_string(query),
        };
        let mut entries = self.list()?;
        match entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        debug!("Saving {} searches under {}", entries.len(), self.key);
        self.storage.set(&self.key, &serde_json::to_string(&entries)?)
    }

    /// Returns the query saved as `name`.
    pub fn load(&self, name: &str) -> Result<Option<QueryState>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| self.codec.parse_query_string(&e.query)))
    }

    /// Removes `name`. Returns whether it existed.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut entries = self.list()?;
        let before = entries.len();
        entries.retain(|e| e.name != name);
        if entries.len() == before {
            return Ok(false);
        }
        if entries.is_empty() {
            self.storage.remove(&self.key)?;
        } else {
            self.storage.set(&self.key, &serde_json::to_string(&entries)?)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved(storage: Arc<dyn KeyValueStore>) -> SavedSearches {
        SavedSearches::new(
            storage,
            "heritage",
            "met",
            QueryCodec::default().with_facet_keys(vec!["culture".to_string()]),
        )
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("a").unwrap(), None);
        storage.set("a", "1").unwrap();
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("1"));
        storage.remove("a").unwrap();
        storage.remove("a").unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
    }

    #[test]
    fn test_storage_key() {
        let saved = saved(Arc::new(MemoryStorage::new()));
        assert_eq!(saved.key(), "heritage:saved:met");
    }

    #[test]
    fn test_save_and_load() {
        let saved = saved(Arc::new(MemoryStorage::new()));
        let query = QueryState::new("tea bowl").with_facet("culture", "Japanese");
        saved.save("Bowls", &query).unwrap();

        let entries = saved.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Bowls");
        assert!(entries[0].query.contains("q=tea+bowl"));

        let loaded = saved.load("Bowls").unwrap().unwrap();
        assert_eq!(loaded.term, "tea bowl");
        assert!(loaded.is_selected("culture", "Japanese"));
        assert!(saved.load("Missing").unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_same_name() {
        let saved = saved(Arc::new(MemoryStorage::new()));
        saved.save("Mine", &QueryState::new("cat")).unwrap();
        saved.save("Other", &QueryState::new("owl")).unwrap();
        saved.save("Mine", &QueryState::new("dog")).unwrap();

        let entries = saved.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Mine");
        assert_eq!(saved.load("Mine").unwrap().unwrap().term, "dog");
    }

    #[test]
    fn test_save_rejects_blank_name() {
        let saved = saved(Arc::new(MemoryStorage::new()));
        assert!(saved.save("  ", &QueryState::new("cat")).is_err());
    }

    #[test]
    fn test_remove() {
        let storage = Arc::new(MemoryStorage::new());
        let saved = saved(storage.clone());
        saved.save("Mine", &QueryState::new("cat")).unwrap();

        assert!(saved.remove("Mine").unwrap());
        assert!(!saved.remove("Mine").unwrap());
        assert!(saved.list().unwrap().is_empty());
        assert_eq!(storage.get("heritage:saved:met").unwrap(), None);
    }

    #[test]
    fn test_corrupt_entries_are_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("heritage:saved:met", "not json").unwrap();
        let saved = saved(storage);
        assert!(saved.list().unwrap().is_empty());
        saved.save("Fresh", &QueryState::new("cat")).unwrap();
        assert_eq!(saved.list().unwrap().len(), 1);
    }

    #[test]
    fn test_sources_are_separate() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStorage::new());
        let met = saved(Arc::clone(&storage));
        let rijks = SavedSearches::new(storage, "heritage", "rijks", QueryCodec::default());
        met.save("Mine", &QueryState::new("cat")).unwrap();
        assert!(rijks.list().unwrap().is_empty());
    }

    #[test]
    fn test_file_storage_persists() {
        let path = std::env::temp_dir().join(format!(
            "heritage-search-saved-{}.json",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);

        {
            let saved = saved(Arc::new(FileStorage::new(&path)));
            saved.save("Bowls", &QueryState::new("tea bowl")).unwrap();
        }
        let saved = saved(Arc::new(FileStorage::new(&path)));
        assert_eq!(saved.load("Bowls").unwrap().unwrap().term, "tea bowl");

        saved.remove("Bowls").unwrap();
        let storage = FileStorage::new(&path);
        assert_eq!(storage.get("heritage:saved:met").unwrap(), None);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_file_storage_missing_file() {
        let storage = FileStorage::new(std::env::temp_dir().join("heritage-search-missing/none.json"));
        assert_eq!(storage.get("a").unwrap(), None);
        storage.remove("a").unwrap();
    }

    #[test]
    fn test_file_storage_rejects_non_object() {
        let path = std::env::temp_dir().join(format!(
            "heritage-search-bad-{}.json",
            std::process::id()
        ));
        fs::write(&path, "[1, 2]").unwrap();
        let storage = FileStorage::new(&path);
        assert!(matches!(storage.get("a"), Err(SearchError::Storage(_))));
        let _ = fs::remove_file(&path);
    }
}
