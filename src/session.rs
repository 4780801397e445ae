//! Request coordinator.
//!
//! A [`Session`] owns the current query, the aggregate and the status of one
//! page (or one source in a fan-out). It enforces a single authoritative
//! request at a time:
//!
//! - every authoritative request gets a fresh [`CancellationToken`] and a
//!   generation number, and starting a new one cancels the previous one;
//! - a settlement is applied only if its generation is still the active one
//!   and its token was not cancelled, so a late response can never overwrite
//!   a newer query, even when the source ignores the token;
//! - every successful page that reports a continuation triggers a background
//!   fetch of the following page into the cache. Prefetches are never
//!   cancelled and their failures are dropped.
//!
//! `submit`, `load_more` and `retry` perform their state transition when
//! called and return a future that only waits for the network. Callers that
//! need the transition to happen in order (store listeners, tests) can rely
//! on that.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregator::ResultAggregator;
use crate::facets::Facet;
use crate::store::{Subscription, UrlStateStore};
use crate::{
    CacheKey, Continuation, Item, QueryCache, QueryCodec, QueryState, Result, ResultPage,
    SearchError, SearchSource,
};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// No active search.
    #[default]
    Idle,
    /// First page of a new query is in flight.
    Loading,
    /// Results are shown.
    Loaded,
    /// A continuation page is in flight; results stay visible.
    Appending,
    /// The authoritative request failed.
    Error,
}

/// What happened to a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The fetched page was merged.
    Applied,
    /// The page came from the cache without touching the network.
    CacheHit,
    /// The request was superseded or cancelled; nothing changed.
    Stale,
    /// Nothing to do (empty query, duplicate trigger, no continuation).
    Skipped,
    /// The request failed and the failure is now part of the state.
    Failed,
}

/// Session behavior switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Speculatively fetch the next page after each successful one.
    #[serde(default = "default_prefetch")]
    pub prefetch: bool,
}

fn default_prefetch() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prefetch: default_prefetch(),
        }
    }
}

/// Read-only view of a session for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub query: QueryState,
    pub status: Status,
    pub items: Vec<Item>,
    pub total: Option<u64>,
    pub continuation: Option<Continuation>,
    /// Message of the last authoritative failure.
    pub error: Option<String>,
    /// Message of the last failed append; the append can be retried.
    pub append_error: Option<String>,
    pub facets: Vec<Facet>,
}

/// Sink for the aggregate, called after every visible change.
pub type RenderFn = Arc<dyn Fn(&[Item]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Replace,
    Append,
}

struct ActiveRequest {
    kind: RequestKind,
    generation: u64,
    token: CancellationToken,
}

struct PendingFetch {
    kind: RequestKind,
    generation: u64,
    token: CancellationToken,
    query: QueryState,
    key: CacheKey,
}

enum Prepared {
    Done(RequestOutcome),
    Fetch(PendingFetch),
}

struct SessionState {
    query: QueryState,
    /// Query of the last merged page; continuations are applied to it.
    tail: QueryState,
    aggregator: ResultAggregator,
    status: Status,
    error: Option<String>,
    append_error: Option<String>,
    generation: u64,
    active: Option<ActiveRequest>,
    prefetching: HashSet<CacheKey>,
    renderers: Vec<RenderFn>,
}

struct SessionInner {
    source: Arc<dyn SearchSource>,
    codec: QueryCodec,
    cache: QueryCache,
    config: SessionConfig,
    state: Mutex<SessionState>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Builds a [`Session`] with injected codec, cache and configuration.
pub struct SessionBuilder {
    source: Arc<dyn SearchSource>,
    codec: Option<QueryCodec>,
    cache: Option<QueryCache>,
    config: SessionConfig,
}

impl SessionBuilder {
    /// Starts a builder for `source`.
    pub fn new(source: Arc<dyn SearchSource>) -> Self {
        Self {
            source,
            codec: None,
            cache: None,
            config: SessionConfig::default(),
        }
    }

    /// Sets the codec. Defaults to one carrying the source's facet keys.
    pub fn with_codec(mut self, codec: QueryCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Sets the cache. Defaults to a fresh one.
    pub fn with_cache(mut self, cache: QueryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the session.
    pub fn build(self) -> Session {
        let codec = self.codec.unwrap_or_else(|| {
            QueryCodec::default().with_facet_keys(self.source.config().facet_keys())
        });
        let initial = codec.default_state();
        Session {
            inner: Arc::new(SessionInner {
                source: self.source,
                codec,
                cache: self.cache.unwrap_or_default(),
                config: self.config,
                state: Mutex::new(SessionState {
                    query: initial.clone(),
                    tail: initial,
                    aggregator: ResultAggregator::new(),
                    status: Status::Idle,
                    error: None,
                    append_error: None,
                    generation: 0,
                    active: None,
                    prefetching: HashSet::new(),
                    renderers: Vec::new(),
                }),
            }),
        }
    }
}

/// Search session for one source. Cloning yields another handle to the
/// same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Creates a session with default codec, a fresh cache and prefetch on.
    pub fn new(source: Arc<dyn SearchSource>) -> Self {
        SessionBuilder::new(source).build()
    }

    /// Starts a builder.
    pub fn builder(source: Arc<dyn SearchSource>) -> SessionBuilder {
        SessionBuilder::new(source)
    }

    /// Returns the source.
    pub fn source(&self) -> &Arc<dyn SearchSource> {
        &self.inner.source
    }

    /// Returns the cache owned by this session.
    pub fn cache(&self) -> &QueryCache {
        &self.inner.cache
    }

    /// Returns the codec.
    pub fn codec(&self) -> &QueryCodec {
        &self.inner.codec
    }

    /// Returns the current status.
    pub fn status(&self) -> Status {
        self.inner.lock().status
    }

    /// Returns the current query.
    pub fn query(&self) -> QueryState {
        self.inner.lock().query.clone()
    }

    /// Returns a copy of the aggregate.
    pub fn items(&self) -> Vec<Item> {
        self.inner.lock().aggregator.items().to_vec()
    }

    /// Returns the number of background prefetches still running.
    pub fn pending_prefetches(&self) -> usize {
        self.inner.lock().prefetching.len()
    }

    /// Returns everything a view needs, facets included.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.lock();
        SessionSnapshot {
            query: state.query.clone(),
            status: state.status,
            items: state.aggregator.items().to_vec(),
            total: state.aggregator.total(),
            continuation: state.aggregator.continuation().cloned(),
            error: state.error.clone(),
            append_error: state.append_error.clone(),
            facets: state
                .aggregator
                .facets(&self.inner.source.config().facets, &state.query),
        }
    }

    /// Registers a render sink.
    pub fn on_render<F>(&self, render: F)
    where
        F: Fn(&[Item]) + Send + Sync + 'static,
    {
        self.inner.lock().renderers.push(Arc::new(render));
    }

    /// Makes `query` the authoritative search.
    ///
    /// Cancels any in-flight request. An empty term resets the session to
    /// idle, a cached page is applied immediately, and resubmitting the query
    /// that is already loading or shown does nothing.
    pub fn submit(&self, query: QueryState) -> impl Future<Output = RequestOutcome> + Send + 'static {
        let prepared = self.prepare_submit(query);
        self.clone().run(prepared)
    }

    /// Appends the page after the current aggregate.
    ///
    /// Only runs from [`Status::Loaded`] with a continuation whose page is
    /// not merged yet, so repeated triggers are no-ops.
    pub fn load_more(&self) -> impl Future<Output = RequestOutcome> + Send + 'static {
        let prepared = self.prepare_load_more();
        self.clone().run(prepared)
    }

    /// Retries the failed authoritative request or the failed append.
    pub fn retry(&self) -> impl Future<Output = RequestOutcome> + Send + 'static {
        let (failed, query, append_failed) = {
            let state = self.inner.lock();
            (
                state.status == Status::Error,
                state.query.clone(),
                state.append_error.is_some(),
            )
        };
        let prepared = if failed {
            self.prepare_submit(query)
        } else if append_failed {
            self.prepare_load_more()
        } else {
            Prepared::Done(RequestOutcome::Skipped)
        };
        self.clone().run(prepared)
    }

    /// Aborts the in-flight authoritative request, if any.
    ///
    /// An aborted first page leaves the session idle with nothing shown; an
    /// aborted append keeps the aggregate and stays retryable. Never moves
    /// the session to [`Status::Error`].
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.lock();
        let Some(active) = state.active.take() else {
            return false;
        };
        active.token.cancel();
        debug!("Cancelled request generation {}", active.generation);
        match active.kind {
            RequestKind::Replace => {
                state.aggregator.clear();
                state.status = Status::Idle;
            }
            RequestKind::Append => state.status = Status::Loaded,
        }
        drop(state);
        self.publish();
        true
    }

    /// Cancels any request and clears query, aggregate and errors. The cache
    /// is kept.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        if let Some(active) = state.active.take() {
            active.token.cancel();
        }
        state.generation += 1;
        state.query = self.inner.codec.default_state();
        state.tail = state.query.clone();
        state.aggregator.clear();
        state.status = Status::Idle;
        state.error = None;
        state.append_error = None;
        drop(state);
        self.publish();
    }

    /// Submits every state the store notifies about.
    ///
    /// The transition happens inside the store notification; only the
    /// network wait is spawned onto the current tokio runtime. The store's
    /// current state is not submitted, call [`Session::submit`] for that.
    pub fn bind(&self, store: &UrlStateStore) -> Result<Subscription> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| SearchError::Other(format!("Session binding needs a tokio runtime: {}", e)))?;
        let session = self.clone();
        Ok(store.subscribe(move |state| {
            let request = session.submit(state.clone());
            handle.spawn(request);
        }))
    }

    fn prepare_submit(&self, query: QueryState) -> Prepared {
        let query = self.inner.codec.normalize(&query);
        let key = query.cache_key();
        let mut state = self.inner.lock();

        let busy = matches!(
            state.status,
            Status::Loading | Status::Loaded | Status::Appending
        );
        if busy && state.query == query {
            debug!("Query '{}' already current", key);
            return Prepared::Done(RequestOutcome::Skipped);
        }

        if let Some(active) = state.active.take() {
            debug!("Superseding request generation {}", active.generation);
            active.token.cancel();
        }
        state.generation += 1;
        state.query = query.clone();
        state.error = None;
        state.append_error = None;

        if query.is_empty() {
            state.tail = query;
            state.aggregator.clear();
            state.status = Status::Idle;
            drop(state);
            self.publish();
            return Prepared::Done(RequestOutcome::Skipped);
        }

        if let Some(page) = self.inner.cache.get(&key) {
            debug!("Cache hit for '{}'", key);
            let continuation = page.continuation.clone();
            state.aggregator.replace(key, page);
            state.tail = query.clone();
            state.status = Status::Loaded;
            drop(state);
            self.publish();
            self.prefetch(&query, continuation.as_ref());
            return Prepared::Done(RequestOutcome::CacheHit);
        }

        let generation = state.generation;
        let token = CancellationToken::new();
        state.status = Status::Loading;
        state.active = Some(ActiveRequest {
            kind: RequestKind::Replace,
            generation,
            token: token.clone(),
        });
        debug!("Loading '{}' (generation {})", key, generation);

        Prepared::Fetch(PendingFetch {
            kind: RequestKind::Replace,
            generation,
            token,
            query,
            key,
        })
    }

    fn prepare_load_more(&self) -> Prepared {
        let mut state = self.inner.lock();
        if state.status != Status::Loaded {
            return Prepared::Done(RequestOutcome::Skipped);
        }
        let Some(continuation) = state.aggregator.continuation().cloned() else {
            return Prepared::Done(RequestOutcome::Skipped);
        };

        let query = state.tail.with_continuation(&continuation);
        let key = query.cache_key();
        if state.aggregator.is_loaded(&key) {
            return Prepared::Done(RequestOutcome::Skipped);
        }
        state.append_error = None;

        if let Some(page) = self.inner.cache.get(&key) {
            debug!("Cache hit for continuation '{}'", key);
            let next = page.continuation.clone();
            state.aggregator.append(key, page);
            state.tail = query.clone();
            drop(state);
            self.publish();
            self.prefetch(&query, next.as_ref());
            return Prepared::Done(RequestOutcome::CacheHit);
        }

        state.generation += 1;
        let generation = state.generation;
        let token = CancellationToken::new();
        state.status = Status::Appending;
        state.active = Some(ActiveRequest {
            kind: RequestKind::Append,
            generation,
            token: token.clone(),
        });
        debug!("Appending '{}' (generation {})", key, generation);

        Prepared::Fetch(PendingFetch {
            kind: RequestKind::Append,
            generation,
            token,
            query,
            key,
        })
    }

    async fn run(self, prepared: Prepared) -> RequestOutcome {
        let fetch = match prepared {
            Prepared::Done(outcome) => return outcome,
            Prepared::Fetch(fetch) => fetch,
        };
        let result = self
            .inner
            .source
            .search(&fetch.query, fetch.token.clone())
            .await;
        self.settle(fetch, result)
    }

    fn settle(&self, fetch: PendingFetch, result: Result<ResultPage>) -> RequestOutcome {
        let mut state = self.inner.lock();
        let current = state
            .active
            .as_ref()
            .is_some_and(|active| active.generation == fetch.generation);
        if !current || fetch.token.is_cancelled() {
            debug!("Dropping settlement of superseded request '{}'", fetch.key);
            return RequestOutcome::Stale;
        }
        state.active = None;

        let page = match result {
            Ok(page) => page,
            Err(err) if err.is_cancelled() => {
                debug!("Request '{}' reported cancellation", fetch.key);
                match fetch.kind {
                    RequestKind::Replace => {
                        state.aggregator.clear();
                        state.status = Status::Idle;
                    }
                    RequestKind::Append => state.status = Status::Loaded,
                }
                drop(state);
                self.publish();
                return RequestOutcome::Stale;
            }
            Err(err) => {
                match fetch.kind {
                    RequestKind::Replace => {
                        warn!("Source {} failed: {}", self.inner.source.name(), err);
                        state.aggregator.clear();
                        state.status = Status::Error;
                        state.error = Some(err.to_string());
                    }
                    RequestKind::Append => {
                        warn!("Source {} failed to append: {}", self.inner.source.name(), err);
                        state.status = Status::Loaded;
                        state.append_error = Some(err.to_string());
                    }
                }
                drop(state);
                self.publish();
                return RequestOutcome::Failed;
            }
        };

        debug!(
            "Source {} returned {} items for '{}'",
            self.inner.source.name(),
            page.len(),
            fetch.key
        );
        self.inner.cache.insert(fetch.key.clone(), page.clone());
        let continuation = page.continuation.clone();
        match fetch.kind {
            RequestKind::Replace => state.aggregator.replace(fetch.key, page),
            RequestKind::Append => {
                state.aggregator.append(fetch.key, page);
            }
        }
        state.tail = fetch.query.clone();
        state.status = Status::Loaded;
        drop(state);

        self.publish();
        self.prefetch(&fetch.query, continuation.as_ref());
        RequestOutcome::Applied
    }

    fn prefetch(&self, base: &QueryState, continuation: Option<&Continuation>) {
        if !self.inner.config.prefetch {
            return;
        }
        let Some(continuation) = continuation else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime, skipping prefetch");
            return;
        };

        let query = base.with_continuation(continuation);
        let key = query.cache_key();
        if self.inner.cache.contains(&key) {
            return;
        }
        if !self.inner.lock().prefetching.insert(key.clone()) {
            return;
        }

        debug!("Prefetching '{}'", key);
        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            match inner.source.search(&query, CancellationToken::new()).await {
                Ok(page) => inner.cache.insert(key.clone(), page),
                Err(err) => debug!("Prefetch of '{}' failed: {}", key, err),
            }
            inner.lock().prefetching.remove(&key);
        });
    }

    fn publish(&self) {
        let (items, renderers) = {
            let state = self.inner.lock();
            if state.renderers.is_empty() {
                return;
            }
            (state.aggregator.items().to_vec(), state.renderers.clone())
        };
        for render in renderers {
            render(&items);
        }
    }
}
