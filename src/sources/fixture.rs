//! Source serving items from memory or a JSON fixture file.

use std::cmp::Ordering;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Continuation, Item, QueryState, Result, ResultPage, SearchSource, SortOrder, SourceConfig};

/// On-disk fixture: a source configuration plus its items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(flatten)]
    pub config: SourceConfig,
    #[serde(default)]
    pub items: Vec<Item>,
}

/// Searches a fixed item list.
///
/// Matching is case-insensitive: every word of the term must occur in the
/// title or description. Facet filters are ANDed across keys and ORed within
/// a key. `title` and `date` sorts honor the order; `relevance` keeps fixture
/// order. The cancellation token is ignored.
pub struct FixtureSource {
    config: SourceConfig,
    items: Vec<Item>,
}

impl FixtureSource {
    /// Creates a source over `items`.
    pub fn new(config: SourceConfig, items: Vec<Item>) -> Self {
        let items = items
            .into_iter()
            .map(|mut item| {
                if item.source.is_empty() {
                    item.source = config.name.clone();
                }
                item
            })
            .collect();
        Self { config, items }
    }

    /// Creates a source from a parsed fixture.
    pub fn from_fixture(fixture: Fixture) -> Self {
        Self::new(fixture.config, fixture.items)
    }

    /// Parses a fixture from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let fixture: Fixture = serde_json::from_str(json)?;
        Ok(Self::from_fixture(fixture))
    }

    /// Loads a fixture file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading fixture {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: SourceConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the fixture has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn matches(item: &Item, words: &[String], query: &QueryState) -> bool {
        let haystack = format!(
            "{} {}",
            item.title.to_lowercase(),
            item.description.as_deref().unwrap_or_default().to_lowercase()
        );
        if !words.iter().all(|w| haystack.contains(w.as_str())) {
            return false;
        }
        query.facets.iter().all(|(key, wanted)| {
            let values = item.facet_values(key);
            wanted.iter().any(|w| values.contains(w))
        })
    }

    fn compare(sort: &str, a: &Item, b: &Item) -> Ordering {
        match sort {
            "title" => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            "date" => a.date.cmp(&b.date),
            _ => Ordering::Equal,
        }
    }
}

#[async_trait]
impl SearchSource for FixtureSource {
    fn config(&self) -> &SourceConfig {
        &self.config
    }

    async fn search(&self, query: &QueryState, _token: CancellationToken) -> Result<ResultPage> {
        let words: Vec<String> = query
            .term
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();

        let mut found: Vec<&Item> = self
            .items
            .iter()
            .filter(|item| Self::matches(item, &words, query))
            .collect();

        if query.sort != "relevance" {
            found.sort_by(|a, b| {
                let ordering = Self::compare(&query.sort, a, b);
                match query.order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });
        }

        let total = found.len() as u64;
        let size = query.size.max(1) as usize;
        let start = (query.page.max(1) as usize - 1).saturating_mul(size);
        let items: Vec<Item> = found.into_iter().skip(start).take(size).cloned().collect();

        debug!(
            "Fixture {} matched {} items, serving {} from offset {}",
            self.config.name,
            total,
            items.len(),
            start
        );

        let mut page = ResultPage::new(items).with_total(total);
        if let Some(next) = Continuation::from_total(total, query.page, query.size) {
            page = page.with_continuation(next);
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facets::FacetSpec;

    fn source() -> FixtureSource {
        let config = SourceConfig::new("Prints", "prints").with_facet(FacetSpec::new("artist"));
        let items = (0..30)
            .map(|i| {
                let artist = if i % 3 == 0 { "Hokusai" } else { "Hiroshige" };
                Item::new(format!("p{}", i), format!("Wave print {:02}", i))
                    .with_description("Woodblock print")
                    .with_date(format!("18{:02}", 30 + i))
                    .with_facet("artist", artist)
            })
            .chain(std::iter::once(
                Item::new("m1", "Map of Edo").with_date("1700").with_facet("artist", "Unknown"),
            ))
            .collect();
        FixtureSource::new(config, items)
    }

    fn search(source: &FixtureSource, query: QueryState) -> ResultPage {
        tokio_test::block_on(source.search(&query, CancellationToken::new())).unwrap()
    }

    #[test]
    fn test_fixture_source_config() {
        let source = source();
        assert_eq!(source.name(), "Prints");
        assert_eq!(source.shortcut(), "prints");
        assert_eq!(source.len(), 31);
        assert!(!source.is_empty());
    }

    #[test]
    fn test_items_take_source_name() {
        let page = search(&source(), QueryState::new("map"));
        assert_eq!(page.items[0].source, "Prints");
    }

    #[test]
    fn test_term_match_is_case_insensitive() {
        let page = search(&source(), QueryState::new("WOODBLOCK wave"));
        assert_eq!(page.total, Some(30));
        let page = search(&source(), QueryState::new("edo"));
        assert_eq!(page.total, Some(1));
    }

    #[test]
    fn test_pagination() {
        let source = source();
        let first = search(&source, QueryState::new("wave"));
        assert_eq!(first.items.len(), 12);
        assert_eq!(first.continuation, Some(Continuation::Page(2)));

        let third = search(&source, QueryState::new("wave").with_page(3));
        assert_eq!(third.items.len(), 6);
        assert!(third.continuation.is_none());
        assert_eq!(third.items[0].id, "p24");

        let beyond = search(&source, QueryState::new("wave").with_page(9));
        assert!(beyond.items.is_empty());
        assert!(beyond.continuation.is_none());
    }

    #[test]
    fn test_facet_filters() {
        let source = source();
        let page = search(&source, QueryState::new("wave").with_facet("artist", "Hokusai"));
        assert_eq!(page.total, Some(10));

        let page = search(
            &source,
            QueryState::new("print")
                .with_facet("artist", "Hokusai")
                .with_facet("artist", "Unknown"),
        );
        assert_eq!(page.total, Some(10));

        let page = search(
            &source,
            QueryState::new("wave")
                .with_facet("artist", "Hokusai")
                .with_facet("medium", "Silk"),
        );
        assert_eq!(page.total, Some(0));
    }

    #[test]
    fn test_sort_by_title() {
        let query = QueryState::new("").with_term("o").with_sort("title", SortOrder::Asc);
        let page = search(&source(), query.with_size(40));
        assert_eq!(page.items[0].title, "Map of Edo");

        let query = QueryState::new("o").with_sort("title", SortOrder::Desc).with_size(40);
        let page = search(&source(), query);
        assert_eq!(page.items[0].title, "Wave print 29");
    }

    #[test]
    fn test_sort_by_date() {
        let query = QueryState::new("a").with_sort("date", SortOrder::Asc).with_size(40);
        let page = search(&source(), query);
        assert_eq!(page.items[0].id, "m1");
    }

    #[test]
    fn test_relevance_keeps_fixture_order() {
        let page = search(&source(), QueryState::new("wave"));
        assert_eq!(page.items[0].id, "p0");
        assert_eq!(page.items[1].id, "p1");
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "name": "Met",
            "shortcut": "met",
            "facets": [{"key": "culture"}],
            "items": [
                {"id": "1", "title": "Tea bowl", "facets": {"culture": ["Japanese"]}},
                {"id": "2", "title": "Teapot", "facets": {"culture": ["Chinese"]}}
            ]
        }"#;
        let source = FixtureSource::from_json(json).unwrap();
        assert_eq!(source.config().facet_keys(), vec!["culture"]);
        let page = search(&source, QueryState::new("tea"));
        assert_eq!(page.total, Some(2));
        assert!(page.continuation.is_none());
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(FixtureSource::from_json("{").is_err());
    }

    #[test]
    fn test_from_missing_file() {
        let err = FixtureSource::from_file("/nonexistent/fixture.json").err().unwrap();
        assert!(matches!(err, crate::SearchError::Io(_)));
    }
}
