//! URL state store: the single source of truth for the current query.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::debug;

use crate::history::{History, ListenerId};
use crate::{QueryCodec, QueryState};

/// Callback invoked with the new state after every notifying change.
pub type Listener = Arc<dyn Fn(&QueryState) + Send + Sync>;

/// How a [`UrlStateStore::write`] updates history and subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Overwrite the current history entry instead of adding one.
    pub replace: bool,
    /// Skip subscriber notification.
    pub silent: bool,
}

impl WriteOptions {
    /// Adds a history entry and notifies. When the URL equals the current
    /// entry, that entry is replaced instead.
    pub fn push() -> Self {
        Self::default()
    }

    /// Replaces the current history entry and notifies. Used for pagination
    /// so Back does not step through every page.
    pub fn replace() -> Self {
        Self {
            replace: true,
            silent: false,
        }
    }

    /// Marks the write as silent.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

struct StoreState {
    current: QueryState,
    listeners: Vec<(u64, Listener)>,
    next_id: u64,
    pop_listener: Option<ListenerId>,
    pending: VecDeque<QueryState>,
    notifying: bool,
}

struct StoreInner {
    codec: QueryCodec,
    history: Arc<dyn History>,
    state: Mutex<StoreState>,
}

impl StoreInner {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_pop(&self, location: &str) {
        let snapshot = self.codec.parse_query_string(location);
        debug!("History pop, query '{}'", location);
        self.lock().current = snapshot.clone();
        self.notify(snapshot);
    }

    /// Delivers `snapshot` to every subscriber.
    ///
    /// Writes issued from inside a listener are queued and delivered, in
    /// order, by the outermost call before it returns. Listeners never run
    /// with the lock held.
    fn notify(&self, snapshot: QueryState) {
        {
            let mut state = self.lock();
            state.pending.push_back(snapshot);
            if state.notifying {
                return;
            }
            state.notifying = true;
        }
        let _guard = NotifyGuard { inner: self };

        loop {
            let (snapshot, listeners) = {
                let mut state = self.lock();
                match state.pending.pop_front() {
                    Some(snapshot) => {
                        let listeners: Vec<Listener> =
                            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
                        (snapshot, listeners)
                    }
                    None => {
                        state.notifying = false;
                        return;
                    }
                }
            };

            for listener in listeners {
                listener(&snapshot);
            }
        }
    }
}

/// Reopens notification when a listener panics, dropping the undelivered
/// queue so later writes notify again.
struct NotifyGuard<'a> {
    inner: &'a StoreInner,
}

impl Drop for NotifyGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut state = self.inner.lock();
            state.pending.clear();
            state.notifying = false;
        }
    }
}

/// Owns the current [`QueryState`] and keeps it consistent with history.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct UrlStateStore {
    inner: Arc<StoreInner>,
}

impl UrlStateStore {
    /// Creates a store whose initial state is parsed from the current
    /// history entry.
    pub fn new(codec: QueryCodec, history: Arc<dyn History>) -> Self {
        let current = codec.parse_query_string(&history.location());
        Self {
            inner: Arc::new(StoreInner {
                codec,
                history,
                state: Mutex::new(StoreState {
                    current,
                    listeners: Vec::new(),
                    next_id: 1,
                    pop_listener: None,
                    pending: VecDeque::new(),
                    notifying: false,
                }),
            }),
        }
    }

    /// Returns a snapshot of the current state.
    pub fn read(&self) -> QueryState {
        self.inner.lock().current.clone()
    }

    /// Returns the canonical query string of the current state.
    pub fn query_string(&self) -> String {
        self.inner.codec.to_query_string(&self.read())
    }

    /// Returns the codec used for parsing and serializing.
    pub fn codec(&self) -> &QueryCodec {
        &self.inner.codec
    }

    /// Normalizes and stores `state`, updates history and, unless silent,
    /// notifies each subscriber once before returning.
    ///
    /// A push whose URL equals the current entry replaces it instead, so
    /// repeated writes of the same search do not pile up history entries.
    ///
    /// A write issued from inside a listener updates state and history at
    /// once, but its notification is queued: it is delivered by the
    /// outermost `write` after the inner call has returned, once the current
    /// snapshot has reached every listener. If a listener panics, snapshots
    /// still queued are dropped and the panic propagates to the caller.
    pub fn write(&self, state: &QueryState, options: WriteOptions) {
        let snapshot = self.inner.codec.normalize(state);
        let query = self.inner.codec.to_query_string(&snapshot);

        if options.replace || self.inner.history.location() == query {
            self.inner.history.replace(&query);
        } else {
            self.inner.history.push(&query);
        }
        debug!(
            "Store write '{}' (replace: {}, silent: {})",
            query, options.replace, options.silent
        );

        self.inner.lock().current = snapshot.clone();
        if !options.silent {
            self.inner.notify(snapshot);
        }
    }

    /// Registers a listener. The history pop listener is attached with the
    /// first subscriber and detached when the last one leaves.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueryState) + Send + Sync + 'static,
    {
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push((id, Arc::new(listener)));

        if state.pop_listener.is_none() {
            let weak = Arc::downgrade(&self.inner);
            let pop_id = self.inner.history.listen(Arc::new(move |location: &str| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_pop(location);
                }
            }));
            state.pop_listener = Some(pop_id);
        }

        Subscription {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

/// Keeps a store listener registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<StoreInner>,
    id: u64,
}

impl Subscription {
    /// Removes the listener.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let mut state = inner.lock();
        state.listeners.retain(|(id, _)| *id != self.id);
        if state.listeners.is_empty() {
            if let Some(pop_id) = state.pop_listener.take() {
                inner.history.unlisten(pop_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store_with(history: Arc<MemoryHistory>) -> UrlStateStore {
        UrlStateStore::new(QueryCodec::default(), history)
    }

    #[test]
    fn test_initial_state_from_location() {
        let history = Arc::new(MemoryHistory::new("q=prints&page=2"));
        let store = store_with(history);
        let state = store.read();
        assert_eq!(state.term, "prints");
        assert_eq!(state.page, 2);
    }

    #[test]
    fn test_write_pushes_and_replaces() {
        let history = Arc::new(MemoryHistory::default());
        let store = store_with(Arc::clone(&history));

        store.write(&QueryState::new("cat"), WriteOptions::push());
        store.write(&QueryState::new("cat").with_page(2), WriteOptions::replace());

        assert_eq!(history.len(), 2);
        assert!(history.location().contains("page=2"));
        assert_eq!(store.read().page, 2);
    }

    #[test]
    fn test_write_same_url_does_not_add_entry() {
        let history = Arc::new(MemoryHistory::default());
        let store = store_with(Arc::clone(&history));
        store.write(&QueryState::new("cat"), WriteOptions::push());
        store.write(&QueryState::new(" cat "), WriteOptions::push());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_write_notifies_each_subscriber_once() {
        let store = store_with(Arc::new(MemoryHistory::default()));
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let (ca, cb) = (Arc::clone(&a), Arc::clone(&b));
        let _sa = store.subscribe(move |_| {
            ca.fetch_add(1, Ordering::SeqCst);
        });
        let _sb = store.subscribe(move |_| {
            cb.fetch_add(1, Ordering::SeqCst);
        });

        store.write(&QueryState::new("cat"), WriteOptions::push());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_silent_write_does_not_notify() {
        let store = store_with(Arc::new(MemoryHistory::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let _sub = store.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        store.write(&QueryState::new("cat"), WriteOptions::push().silent());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.read().term, "cat");
    }

    #[test]
    fn test_listener_receives_normalized_snapshot() {
        let store = store_with(Arc::new(MemoryHistory::default()));
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let _sub = store.subscribe(move |state| {
            *sink.lock().unwrap() = Some(state.clone());
        });
        store.write(
            &QueryState::new("  cat ").with_facet("k", "b").with_facet("k", "a"),
            WriteOptions::push(),
        );
        let state = seen.lock().unwrap().clone().unwrap();
        assert_eq!(state.term, "cat");
        assert_eq!(state.facets["k"], vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_pop_listener_attached_while_subscribed() {
        let history = Arc::new(MemoryHistory::default());
        let store = store_with(Arc::clone(&history));
        assert_eq!(history.listener_count(), 0);

        let first = store.subscribe(|_| {});
        let second = store.subscribe(|_| {});
        assert_eq!(history.listener_count(), 1);

        first.unsubscribe();
        assert_eq!(history.listener_count(), 1);
        drop(second);
        assert_eq!(history.listener_count(), 0);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_back_reparses_and_notifies() {
        let history = Arc::new(MemoryHistory::default());
        let store = store_with(Arc::clone(&history));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = store.subscribe(move |state| {
            sink.lock().unwrap().push(state.term.clone());
        });

        store.write(&QueryState::new("cat"), WriteOptions::push());
        store.write(&QueryState::new("dog"), WriteOptions::push());
        history.back();

        assert_eq!(store.read().term, "cat");
        assert_eq!(*seen.lock().unwrap(), vec!["cat", "dog", "cat"]);
    }

    #[test]
    fn test_reentrant_write_is_delivered_in_order() {
        let store = store_with(Arc::new(MemoryHistory::default()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _recorder = store.subscribe(move |state| {
            sink.lock().unwrap().push(state.term.clone());
        });

        let inner_store = store.clone();
        let _redirect = store.subscribe(move |state| {
            if state.term == "colour" {
                inner_store.write(&state.clone().with_term("color"), WriteOptions::replace());
            }
        });

        store.write(&QueryState::new("colour"), WriteOptions::push());

        assert_eq!(*seen.lock().unwrap(), vec!["colour", "color"]);
        assert_eq!(store.read().term, "color");
    }

    #[test]
    fn test_reentrant_write_notifies_after_returning() {
        let store = store_with(Arc::new(MemoryHistory::default()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner_store = store.clone();
        let sink = Arc::clone(&seen);
        let _redirect = store.subscribe(move |state| {
            sink.lock().unwrap().push(format!("saw {}", state.term));
            if state.term == "colour" {
                inner_store.write(&state.clone().with_term("color"), WriteOptions::replace());
                sink.lock().unwrap().push(format!("wrote, current {}", inner_store.read().term));
            }
        });

        store.write(&QueryState::new("colour"), WriteOptions::push());
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["saw colour", "wrote, current color", "saw color"]
        );
    }

    #[test]
    fn test_panicking_listener_does_not_silence_store() {
        let store = store_with(Arc::new(MemoryHistory::default()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let failing = store.subscribe(|state| {
            if state.term == "boom" {
                panic!("listener failed");
            }
        });
        let sink = Arc::clone(&seen);
        let _recorder = store.subscribe(move |state| {
            sink.lock().unwrap().push(state.term.clone());
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.write(&QueryState::new("boom"), WriteOptions::push());
        }));
        assert!(result.is_err());
        assert_eq!(store.read().term, "boom");

        drop(failing);
        store.write(&QueryState::new("calm"), WriteOptions::push());
        assert_eq!(*seen.lock().unwrap(), vec!["calm"]);
    }

    #[test]
    fn test_unsubscribed_listener_not_called() {
        let store = store_with(Arc::new(MemoryHistory::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let sub = store.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);
        store.write(&QueryState::new("cat"), WriteOptions::push());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_query_string() {
        let store = store_with(Arc::new(MemoryHistory::default()));
        assert_eq!(store.query_string(), "");
        store.write(&QueryState::new("maps"), WriteOptions::push());
        assert!(store.query_string().starts_with("q=maps"));
    }
}
