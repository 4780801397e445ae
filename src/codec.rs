//! Canonical query codec: `QueryState` <-> URL query parameters.
//!
//! Defaults are left out of the URL while the search term is empty and
//! written out in full once a search is active, so a shared link always
//! reproduces the exact search that produced it.

use serde::{Deserialize, Serialize};

use crate::{QueryState, SortOrder};

const PARAM_TERM: &str = "q";
const PARAM_PAGE: &str = "page";
const PARAM_SIZE: &str = "size";
const PARAM_SORT: &str = "sort";
const PARAM_ORDER: &str = "order";
const PARAM_CURSOR: &str = "cursor";

const RESERVED: [&str; 6] = [
    PARAM_TERM,
    PARAM_PAGE,
    PARAM_SIZE,
    PARAM_SORT,
    PARAM_ORDER,
    PARAM_CURSOR,
];

/// Defaults and limits applied by the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Default page size.
    #[serde(default = "default_size")]
    pub default_size: u32,
    /// Smallest accepted page size.
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    /// Largest accepted page size.
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    /// Default sort key.
    #[serde(default = "default_sort")]
    pub default_sort: String,
    /// Default sort direction.
    #[serde(default)]
    pub default_order: SortOrder,
    /// Accepted sort keys. Empty accepts any non-blank key.
    #[serde(default = "default_sorts")]
    pub sorts: Vec<String>,
    /// Facet dimensions carried in the URL. Empty treats every unreserved
    /// parameter as a facet.
    #[serde(default)]
    pub facet_keys: Vec<String>,
}

fn default_size() -> u32 {
    12
}

fn default_min_size() -> u32 {
    1
}

fn default_max_size() -> u32 {
    100
}

fn default_sort() -> String {
    "relevance".to_string()
}

fn default_sorts() -> Vec<String> {
    vec!["relevance".to_string(), "date".to_string(), "title".to_string()]
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            default_size: default_size(),
            min_size: default_min_size(),
            max_size: default_max_size(),
            default_sort: default_sort(),
            default_order: SortOrder::Desc,
            sorts: default_sorts(),
            facet_keys: Vec::new(),
        }
    }
}

/// Bidirectional mapping between [`QueryState`] and URL parameters.
#[derive(Debug, Clone, Default)]
pub struct QueryCodec {
    config: CodecConfig,
}

impl QueryCodec {
    /// Creates a codec with the given configuration.
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    /// Sets the facet dimensions carried in the URL.
    pub fn with_facet_keys(mut self, keys: Vec<String>) -> Self {
        self.config.facet_keys = keys;
        self
    }

    /// Returns the codec configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Returns the state with every field at its default.
    pub fn default_state(&self) -> QueryState {
        QueryState {
            term: String::new(),
            facets: Default::default(),
            sort: self.config.default_sort.clone(),
            order: self.config.default_order,
            size: self.config.default_size,
            page: 1,
            cursor: None,
        }
    }

    /// Parses URL parameters into a normalized state.
    ///
    /// Absent fields take their default; invalid values fall back to the
    /// default instead of failing.
    pub fn parse<I, K, V>(&self, params: I) -> QueryState
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut state = self.default_state();
        let mut seen_term = false;

        for (key, value) in params {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                PARAM_TERM if !seen_term => {
                    state.term = value.to_string();
                    seen_term = true;
                }
                PARAM_TERM => {}
                PARAM_PAGE => {
                    state.page = value.trim().parse().unwrap_or(1);
                }
                PARAM_SIZE => {
                    state.size = value.trim().parse().unwrap_or(self.config.default_size);
                }
                PARAM_SORT => state.sort = value.to_string(),
                PARAM_ORDER => {
                    state.order = SortOrder::parse(value).unwrap_or(self.config.default_order);
                }
                PARAM_CURSOR => state.cursor = Some(value.to_string()),
                _ if self.is_facet_key(key) => {
                    state
                        .facets
                        .entry(key.to_string())
                        .or_default()
                        .push(value.to_string());
                }
                _ => {}
            }
        }

        self.normalize(&state)
    }

    /// Parses a raw query string, with or without a leading `?`.
    pub fn parse_query_string(&self, query: &str) -> QueryState {
        let query = query.strip_prefix('?').unwrap_or(query);
        self.parse(url::form_urlencoded::parse(query.as_bytes()))
    }

    /// Serializes a state into ordered URL parameters.
    pub fn serialize(&self, state: &QueryState) -> Vec<(String, String)> {
        let state = self.normalize(state);
        let active = !state.term.is_empty();
        let mut params = Vec::new();

        if active {
            params.push((PARAM_TERM.to_string(), state.term.clone()));
        }
        if active || state.page != 1 {
            params.push((PARAM_PAGE.to_string(), state.page.to_string()));
        }
        if active || state.size != self.config.default_size {
            params.push((PARAM_SIZE.to_string(), state.size.to_string()));
        }
        if active || state.sort != self.config.default_sort {
            params.push((PARAM_SORT.to_string(), state.sort.clone()));
        }
        if active || state.order != self.config.default_order {
            params.push((PARAM_ORDER.to_string(), state.order.as_str().to_string()));
        }
        if let Some(cursor) = &state.cursor {
            params.push((PARAM_CURSOR.to_string(), cursor.clone()));
        }
        for (key, values) in &state.facets {
            for value in values {
                params.push((key.clone(), value.clone()));
            }
        }

        params
    }

    /// Serializes a state into a query string without a leading `?`.
    pub fn to_query_string(&self, state: &QueryState) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.serialize(state))
            .finish()
    }

    /// Normalizes a state and clamps it into the configured ranges.
    pub fn normalize(&self, state: &QueryState) -> QueryState {
        let mut state = state.normalized();
        state.size = state.size.max(self.config.min_size).min(self.config.max_size);
        if !self.is_known_sort(&state.sort) {
            state.sort = self.config.default_sort.clone();
        }
        state.facets.retain(|key, _| self.is_facet_key(key));
        state
    }

    fn is_known_sort(&self, sort: &str) -> bool {
        if sort.trim().is_empty() {
            return false;
        }
        self.config.sorts.is_empty() || self.config.sorts.iter().any(|s| s == sort)
    }

    fn is_facet_key(&self, key: &str) -> bool {
        if RESERVED.contains(&key) || key.is_empty() {
            return false;
        }
        self.config.facet_keys.is_empty() || self.config.facet_keys.iter().any(|k| k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> QueryCodec {
        QueryCodec::default().with_facet_keys(vec![
            "classification".to_string(),
            "century".to_string(),
        ])
    }

    #[test]
    fn test_parse_empty_gives_defaults() {
        let state = codec().parse_query_string("");
        assert_eq!(state, codec().default_state());
    }

    #[test]
    fn test_parse_full() {
        let state = codec().parse_query_string(
            "?q=prints&page=3&size=24&sort=date&order=asc&classification=Prints&century=19th",
        );
        assert_eq!(state.term, "prints");
        assert_eq!(state.page, 3);
        assert_eq!(state.size, 24);
        assert_eq!(state.sort, "date");
        assert_eq!(state.order, SortOrder::Asc);
        assert!(state.is_selected("classification", "Prints"));
        assert!(state.is_selected("century", "19th"));
    }

    #[test]
    fn test_parse_invalid_falls_back() {
        let state = codec().parse_query_string("q=x&page=abc&size=-4&sort=bogus&order=up");
        assert_eq!(state.page, 1);
        assert_eq!(state.size, 12);
        assert_eq!(state.sort, "relevance");
        assert_eq!(state.order, SortOrder::Desc);
    }

    #[test]
    fn test_parse_clamps_numbers() {
        let state = codec().parse_query_string("q=x&page=0&size=5000");
        assert_eq!(state.page, 1);
        assert_eq!(state.size, 100);
    }

    #[test]
    fn test_parse_ignores_unknown_params() {
        let state = codec().parse_query_string("q=x&utm_source=mail&medium=oil");
        assert!(state.facets.is_empty());
    }

    #[test]
    fn test_parse_without_facet_keys_accepts_any() {
        let state = QueryCodec::default().parse_query_string("q=x&medium=oil");
        assert!(state.is_selected("medium", "oil"));
    }

    #[test]
    fn test_parse_first_term_wins() {
        let state = codec().parse_query_string("q=first&q=second");
        assert_eq!(state.term, "first");
    }

    #[test]
    fn test_serialize_omits_defaults_without_term() {
        let codec = codec();
        assert_eq!(codec.to_query_string(&codec.default_state()), "");

        let state = codec.default_state().with_size(24);
        assert_eq!(codec.to_query_string(&state), "size=24");
    }

    #[test]
    fn test_serialize_includes_defaults_with_term() {
        let codec = codec();
        let state = QueryState::new("prints");
        assert_eq!(
            codec.to_query_string(&state),
            "q=prints&page=1&size=12&sort=relevance&order=desc"
        );
    }

    #[test]
    fn test_serialize_facets_repeated_sorted_deduped() {
        let codec = codec();
        let state = QueryState::new("vase")
            .with_facet("classification", "Vases")
            .with_facet("classification", "Ceramics")
            .with_facet("classification", "Vases");
        let params = codec.serialize(&state);
        let facets: Vec<_> = params
            .iter()
            .filter(|(k, _)| k == "classification")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(facets, vec!["Ceramics", "Vases"]);
    }

    #[test]
    fn test_serialize_encodes_special_characters() {
        let codec = codec();
        let state = QueryState::new("a&b c");
        let qs = codec.to_query_string(&state);
        assert!(qs.starts_with("q=a%26b+c&"));
        assert_eq!(codec.parse_query_string(&qs).term, "a&b c");
    }

    #[test]
    fn test_round_trip_is_stable() {
        let codec = codec();
        let states = vec![
            codec.default_state(),
            codec.default_state().with_page(4),
            QueryState::new("prints"),
            QueryState::new(" prints ")
                .with_facet("century", "19th")
                .with_facet("century", "18th")
                .with_facet("century", "19th")
                .with_page(0)
                .with_size(1000),
            QueryState::new("maps").with_cursor("AoIIP4AAACgxMjM="),
            QueryState::new("maps").with_sort("nonsense", SortOrder::Asc),
            QueryState::new("x").with_facet("unconfigured", "dropped"),
        ];

        for state in states {
            let once = codec.serialize(&state);
            let twice = codec.serialize(&codec.parse(once.clone()));
            assert_eq!(once, twice, "unstable round trip for {:?}", state);
            assert_eq!(codec.parse(once), codec.normalize(&state));
        }
    }

    #[test]
    fn test_normalize_clamps_and_filters() {
        let codec = codec();
        let state = QueryState::new("x")
            .with_size(0)
            .with_facet("unconfigured", "v")
            .with_facet("century", "20th");
        let normalized = codec.normalize(&state);
        assert_eq!(normalized.size, 1);
        assert!(!normalized.facets.contains_key("unconfigured"));
        assert!(normalized.is_selected("century", "20th"));
    }

    #[test]
    fn test_codec_config_deserialization_defaults() {
        let config: CodecConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CodecConfig::default());
    }
}
