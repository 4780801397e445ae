//! Normalized result types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Where the next page begins. Its absence means the results are exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Continuation {
    /// Page-numbered APIs.
    Page(u32),
    /// Token or offset based APIs.
    Cursor(String),
}

impl Continuation {
    /// Derives the continuation from a server-reported total.
    ///
    /// The last representable page has no successor, so it ends the results.
    pub fn from_total(total: u64, page: u32, size: u32) -> Option<Self> {
        let seen = u64::from(page) * u64::from(size);
        if seen < total {
            page.checked_add(1).map(Continuation::Page)
        } else {
            None
        }
    }

    /// Derives the continuation when the API reports no total: a full page
    /// implies there may be another one.
    ///
    /// This over-reports when the last page happens to be exactly full and
    /// under-reports when an API returns short pages mid-stream. Both are
    /// accepted.
    pub fn from_page_fill(returned: usize, page: u32, size: u32) -> Option<Self> {
        if size > 0 && returned == size as usize {
            page.checked_add(1).map(Continuation::Page)
        } else {
            None
        }
    }
}

/// A single normalized display item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Provider-scoped identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Link to the record.
    #[serde(default)]
    pub url: String,
    /// Short description.
    #[serde(default)]
    pub description: Option<String>,
    /// Thumbnail or IIIF image URL.
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Date or date range as reported by the provider.
    #[serde(default)]
    pub date: Option<String>,
    /// Name of the source that produced this item.
    #[serde(default)]
    pub source: String,
    /// Values per facet dimension.
    #[serde(default)]
    pub facets: BTreeMap<String, Vec<String>>,
}

impl Item {
    /// Creates a new item.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: String::new(),
            description: None,
            thumbnail: None,
            date: None,
            source: String::new(),
            facets: BTreeMap::new(),
        }
    }

    /// Sets the record URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the thumbnail URL.
    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    /// Sets the date.
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Sets the source name.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Adds a value under a facet dimension.
    pub fn with_facet(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.facets.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Returns the values of a facet dimension.
    pub fn facet_values(&self, key: &str) -> &[String] {
        self.facets.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// One page of results as returned by a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
    /// Items in display order.
    pub items: Vec<Item>,
    /// Server-reported total, if any.
    pub total: Option<u64>,
    /// Where the next page begins.
    pub continuation: Option<Continuation>,
}

impl ResultPage {
    /// Creates a page without total or continuation.
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            total: None,
            continuation: None,
        }
    }

    /// Sets the reported total.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Sets the continuation.
    pub fn with_continuation(mut self, continuation: Continuation) -> Self {
        self.continuation = Some(continuation);
        self
    }

    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the page has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
