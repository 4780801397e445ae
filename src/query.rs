//! Canonical search intent.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Continuation;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Returns the URL representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    /// Parses the URL representation, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

/// The single normalized representation of search intent.
///
/// Both the URL and the cache key are derived from this type. Two states that
/// normalize identically describe the same search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryState {
    /// Free-text search term.
    pub term: String,
    /// Selected values per facet key.
    pub facets: BTreeMap<String, Vec<String>>,
    /// Sort key (e.g. "relevance", "date", "title").
    pub sort: String,
    /// Sort direction.
    pub order: SortOrder,
    /// Page size.
    pub size: u32,
    /// Page number (1-indexed).
    pub page: u32,
    /// Opaque cursor for APIs that paginate by token.
    pub cursor: Option<String>,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            term: String::new(),
            facets: BTreeMap::new(),
            sort: "relevance".to_string(),
            order: SortOrder::Desc,
            size: 12,
            page: 1,
            cursor: None,
        }
    }
}

impl QueryState {
    /// Creates a first-page query for the given term.
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ..Default::default()
        }
    }

    /// Returns true when there is no search term.
    pub fn is_empty(&self) -> bool {
        self.term.trim().is_empty()
    }

    /// Sets the term and rewinds to the first page.
    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self.rewind();
        self
    }

    /// Adds a selected facet value.
    pub fn with_facet(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.facets.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Sets the sort key and direction and rewinds to the first page.
    pub fn with_sort(mut self, sort: impl Into<String>, order: SortOrder) -> Self {
        self.sort = sort.into();
        self.order = order;
        self.rewind();
        self
    }

    /// Sets the page size.
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Sets the page number.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    /// Sets the opaque cursor.
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Selects `value` under `key` if absent, deselects it otherwise.
    ///
    /// Any filter change starts over from the first page.
    pub fn toggle_facet(mut self, key: &str, value: &str) -> Self {
        let values = self.facets.entry(key.to_string()).or_default();
        if let Some(pos) = values.iter().position(|v| v == value) {
            values.remove(pos);
        } else {
            values.push(value.to_string());
        }
        self.rewind();
        self.normalized()
    }

    /// Returns true if `value` is selected under `key`.
    pub fn is_selected(&self, key: &str, value: &str) -> bool {
        self.facets
            .get(key)
            .is_some_and(|values| values.iter().any(|v| v == value))
    }

    /// Returns the query for the page that `continuation` points at.
    pub fn with_continuation(&self, continuation: &Continuation) -> Self {
        let mut next = self.clone();
        match continuation {
            Continuation::Page(page) => {
                next.page = *page;
                next.cursor = None;
            }
            Continuation::Cursor(cursor) => {
                next.page = self.page.saturating_add(1);
                next.cursor = Some(cursor.clone());
            }
        }
        next
    }

    /// Returns the structurally normalized form.
    ///
    /// The term is trimmed, facet values deduplicated and sorted, empty facet
    /// lists dropped, blank cursors removed and the page raised to at least 1.
    /// Range clamping of the page size is the codec's job since limits are
    /// configurable.
    pub fn normalized(&self) -> Self {
        let facets = self
            .facets
            .iter()
            .filter_map(|(key, values)| {
                let mut values: Vec<String> = values
                    .iter()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect();
                values.sort();
                values.dedup();
                (!values.is_empty()).then(|| (key.clone(), values))
            })
            .collect();

        Self {
            term: self.term.trim().to_string(),
            facets,
            sort: self.sort.clone(),
            order: self.order,
            size: self.size.max(1),
            page: self.page.max(1),
            cursor: self
                .cursor
                .as_ref()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        }
    }

    /// Returns the deterministic cache key for this query.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from(self)
    }

    fn rewind(&mut self) {
        self.page = 1;
        self.cursor = None;
    }
}

/// Deterministic key derived from a normalized [`QueryState`].
///
/// Every field is written, defaults included, so that the key never depends
/// on omission rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&QueryState> for CacheKey {
    fn from(state: &QueryState) -> Self {
        let state = state.normalized();
        let mut out = url::form_urlencoded::Serializer::new(String::new());
        out.append_pair("q", &state.term);
        out.append_pair("sort", &state.sort);
        out.append_pair("order", state.order.as_str());
        out.append_pair("size", &state.size.to_string());
        out.append_pair("page", &state.page.to_string());
        out.append_pair("cursor", state.cursor.as_deref().unwrap_or(""));
        for (key, values) in &state.facets {
            for value in values {
                out.append_pair(&format!("f.{}", key), value);
            }
        }
        CacheKey(out.finish())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
