//! Navigation history abstraction.
//!
//! The store only talks to this trait, so sessions run the same way against
//! a real address bar or the in-memory history used headlessly and in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Callback fired when the user navigates Back/Forward. Receives the query
/// string of the entry that became current.
pub type PopListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Handle returned by [`History::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Browser-style history of query strings.
pub trait History: Send + Sync {
    /// Returns the query string of the current entry.
    fn location(&self) -> String;

    /// Adds a new entry after the current one, discarding forward entries.
    fn push(&self, query: &str);

    /// Overwrites the current entry.
    fn replace(&self, query: &str);

    /// Registers a Back/Forward listener.
    fn listen(&self, listener: PopListener) -> ListenerId;

    /// Removes a Back/Forward listener.
    fn unlisten(&self, id: ListenerId);
}

#[derive(Default)]
struct MemoryHistoryInner {
    entries: Vec<String>,
    index: usize,
    listeners: Vec<(ListenerId, PopListener)>,
}

/// In-memory [`History`] with Back/Forward navigation.
pub struct MemoryHistory {
    inner: Mutex<MemoryHistoryInner>,
    next_id: AtomicU64,
}

impl MemoryHistory {
    /// Creates a history whose only entry is `initial`.
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(MemoryHistoryInner {
                entries: vec![initial.into()],
                index: 0,
                listeners: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Steps one entry back. Returns false at the start of history.
    pub fn back(&self) -> bool {
        self.go(-1)
    }

    /// Steps one entry forward. Returns false at the end of history.
    pub fn forward(&self) -> bool {
        self.go(1)
    }

    /// Moves by `delta` entries and notifies listeners.
    pub fn go(&self, delta: isize) -> bool {
        let (location, listeners) = {
            let mut inner = self.lock();
            let target = inner.index as isize + delta;
            if delta == 0 || target < 0 || target as usize >= inner.entries.len() {
                return false;
            }
            inner.index = target as usize;
            let listeners: Vec<PopListener> =
                inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
            (inner.entries[inner.index].clone(), listeners)
        };

        debug!("History navigated to '{}'", location);
        for listener in listeners {
            listener(&location);
        }
        true
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if history has no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Returns all entries, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.lock().entries.clone()
    }

    /// Returns the number of attached Back/Forward listeners.
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryHistoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new("")
    }
}

impl History for MemoryHistory {
    fn location(&self) -> String {
        let inner = self.lock();
        inner.entries[inner.index].clone()
    }

    fn push(&self, query: &str) {
        let mut inner = self.lock();
        let keep = inner.index + 1;
        inner.entries.truncate(keep);
        inner.entries.push(query.to_string());
        inner.index = inner.entries.len() - 1;
    }

    fn replace(&self, query: &str) {
        let mut inner = self.lock();
        let index = inner.index;
        inner.entries[index] = query.to_string();
    }

    fn listen(&self, listener: PopListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().listeners.push((id, listener));
        id
    }

    fn unlisten(&self, id: ListenerId) {
        self.lock().listeners.retain(|(lid, _)| *lid != id);
    }
}
