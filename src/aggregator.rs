//! Running result set for one session.

use std::collections::HashSet;

use crate::facets::{compute_facets, Facet, FacetSpec};
use crate::{CacheKey, Continuation, Item, QueryState, ResultPage};

/// Merges pages into the aggregate shown to the user.
///
/// A new search replaces the aggregate; a continuation page is appended.
/// Every merged page is recorded by key so the same continuation is never
/// appended twice.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    items: Vec<Item>,
    total: Option<u64>,
    continuation: Option<Continuation>,
    loaded: HashSet<CacheKey>,
}

impl ResultAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards the aggregate and starts over from `page`.
    pub fn replace(&mut self, key: CacheKey, page: ResultPage) {
        self.loaded.clear();
        self.loaded.insert(key);
        self.items = page.items;
        self.total = page.total;
        self.continuation = page.continuation;
    }

    /// Appends `page` unless `key` was already merged. Returns whether the
    /// page was applied.
    ///
    /// The continuation is taken from `page` alone: an exhausted page ends
    /// the result set even if an earlier one reported more.
    pub fn append(&mut self, key: CacheKey, page: ResultPage) -> bool {
        if !self.loaded.insert(key) {
            return false;
        }
        self.items.extend(page.items);
        if page.total.is_some() {
            self.total = page.total;
        }
        self.continuation = page.continuation;
        true
    }

    /// Returns true if the page under `key` is part of the aggregate.
    pub fn is_loaded(&self, key: &CacheKey) -> bool {
        self.loaded.contains(key)
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.items.clear();
        self.total = None;
        self.continuation = None;
        self.loaded.clear();
    }

    /// Returns the aggregated items.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Returns the last reported total.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Returns where the next page begins.
    pub fn continuation(&self) -> Option<&Continuation> {
        self.continuation.as_ref()
    }

    /// Computes facets over the current aggregate.
    pub fn facets(&self, specs: &[FacetSpec], query: &QueryState) -> Vec<Facet> {
        compute_facets(&self.items, specs, query)
    }
}
