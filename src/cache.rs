//! Page cache keyed by canonical query.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{CacheKey, ResultPage};

/// Memoizes completed pages by [`CacheKey`].
///
/// Unbounded for the lifetime of the owning session; entries are only
/// dropped by [`QueryCache::reset`]. Cloning yields another handle to the
/// same entries, which is how a session shares it with its prefetch tasks.
#[derive(Debug, Clone, Default)]
pub struct QueryCache {
    entries: Arc<Mutex<HashMap<CacheKey, ResultPage>>>,
}

impl QueryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the cached page.
    pub fn get(&self, key: &CacheKey) -> Option<ResultPage> {
        self.lock().get(key).cloned()
    }

    /// Returns true if a page is cached under `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Stores a page, replacing any previous entry.
    pub fn insert(&self, key: CacheKey, page: ResultPage) {
        self.lock().insert(key, page);
    }

    /// Drops every entry.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Returns the number of cached pages.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, ResultPage>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
