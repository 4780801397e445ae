//! Fan-out across several independent sources.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::debug;

use crate::session::{RequestOutcome, Session, SessionConfig, SessionSnapshot};
use crate::{QueryState, Result, SearchError, SearchSource};

struct SourceSlot {
    session: Session,
    enabled: AtomicBool,
}

/// Outcome of one source in a fan-out run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutcome {
    pub name: String,
    pub outcome: RequestOutcome,
}

/// Per-source view returned by [`FanOut::snapshots`].
#[derive(Debug, Clone, Serialize)]
pub struct SourceSnapshot {
    pub name: String,
    pub shortcut: String,
    pub enabled: bool,
    pub session: SessionSnapshot,
}

/// Runs one query against every enabled source.
///
/// Each source has its own [`Session`], so its cache, tokens and status are
/// private to it: a failing or disabled source never touches its siblings.
pub struct FanOut {
    slots: Vec<SourceSlot>,
    config: SessionConfig,
}

impl FanOut {
    /// Creates an empty fan-out.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            config: SessionConfig::default(),
        }
    }

    /// Sets the configuration used for sessions of sources added afterwards.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a source.
    pub fn add_source<S: SearchSource + 'static>(&mut self, source: S) {
        self.add_shared(Arc::new(source));
    }

    /// Adds a shared source.
    pub fn add_shared(&mut self, source: Arc<dyn SearchSource>) {
        let enabled = source.is_enabled();
        let session = Session::builder(source)
            .with_config(self.config.clone())
            .build();
        self.slots.push(SourceSlot {
            session,
            enabled: AtomicBool::new(enabled),
        });
    }

    /// Returns the number of registered sources.
    pub fn source_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the session of the source with `name` or shortcut.
    pub fn session(&self, name: &str) -> Option<&Session> {
        self.slot(name).map(|slot| &slot.session)
    }

    /// Returns whether the named source is enabled.
    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.slot(name)
            .map(|slot| slot.enabled.load(Ordering::SeqCst))
    }

    /// Enables or disables a source.
    ///
    /// Disabling cancels the source's in-flight request and clears its
    /// aggregate. Enabling does not search; the next run includes it.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let slot = self
            .slot(name)
            .ok_or_else(|| SearchError::UnknownSource(name.to_string()))?;
        let was = slot.enabled.swap(enabled, Ordering::SeqCst);
        if was && !enabled {
            debug!("Disabling source {}", slot.session.source().name());
            slot.session.reset();
        }
        Ok(())
    }

    /// Submits `term` to every enabled source and waits for all of them.
    pub async fn run_all(&self, term: &str) -> Vec<SourceOutcome> {
        self.run_query(&QueryState::new(term)).await
    }

    /// Submits `query` to every enabled source and waits for all of them.
    ///
    /// Each session normalizes the query with its own codec, so facets a
    /// source does not know are dropped for that source only.
    pub async fn run_query(&self, query: &QueryState) -> Vec<SourceOutcome> {
        let active: Vec<_> = self
            .slots
            .iter()
            .filter(|slot| slot.enabled.load(Ordering::SeqCst))
            .collect();
        debug!("Searching {} sources", active.len());

        let requests: Vec<_> = active
            .iter()
            .map(|slot| {
                let name = slot.session.source().name().to_string();
                let request = slot.session.submit(query.clone());
                async move {
                    let outcome = request.await;
                    debug!("Source {} settled: {:?}", name, outcome);
                    SourceOutcome { name, outcome }
                }
            })
            .collect();

        join_all(requests).await
    }

    /// Loads the next page of one source.
    pub async fn load_more(&self, name: &str) -> Result<RequestOutcome> {
        let slot = self
            .slot(name)
            .ok_or_else(|| SearchError::UnknownSource(name.to_string()))?;
        if !slot.enabled.load(Ordering::SeqCst) {
            return Ok(RequestOutcome::Skipped);
        }
        Ok(slot.session.load_more().await)
    }

    /// Returns per-source snapshots in registration order.
    pub fn snapshots(&self) -> Vec<SourceSnapshot> {
        self.slots
            .iter()
            .map(|slot| {
                let source = slot.session.source();
                SourceSnapshot {
                    name: source.name().to_string(),
                    shortcut: source.shortcut().to_string(),
                    enabled: slot.enabled.load(Ordering::SeqCst),
                    session: slot.session.snapshot(),
                }
            })
            .collect()
    }

    fn slot(&self, name: &str) -> Option<&SourceSlot> {
        self.slots.iter().find(|slot| {
            let source = slot.session.source();
            source.name() == name || source.shortcut() == name
        })
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new()
    }
}
