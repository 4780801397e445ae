//! Search source trait and configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::facets::FacetSpec;
use crate::{QueryState, Result, ResultPage};

/// Configuration for a search source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Display name of the source.
    pub name: String,
    /// Short identifier, also used as the saved-search storage suffix.
    pub shortcut: String,
    /// Whether the source takes part in fan-out searches.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Facet dimensions computed over this source's results.
    #[serde(default)]
    pub facets: Vec<FacetSpec>,
}

fn default_enabled() -> bool {
    true
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            shortcut: String::new(),
            enabled: true,
            facets: Vec::new(),
        }
    }
}

impl SourceConfig {
    /// Creates a configuration with the given name and shortcut.
    pub fn new(name: impl Into<String>, shortcut: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shortcut: shortcut.into(),
            ..Default::default()
        }
    }

    /// Adds a facet dimension.
    pub fn with_facet(mut self, spec: FacetSpec) -> Self {
        self.facets.push(spec);
        self
    }

    /// Sets whether the source is enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns the facet keys, for the codec.
    pub fn facet_keys(&self) -> Vec<String> {
        self.facets.iter().map(|f| f.key.clone()).collect()
    }
}

/// A provider of result pages.
///
/// Implementations should stop work when `token` is cancelled where their
/// transport allows, and must return an error rather than hang. Sessions
/// discard the settlement of a cancelled request whether or not the
/// implementation honors the token.
#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Returns the source configuration.
    fn config(&self) -> &SourceConfig;

    /// Fetches the page described by `query`.
    async fn search(&self, query: &QueryState, token: CancellationToken) -> Result<ResultPage>;

    /// Returns the source name.
    fn name(&self) -> &str {
        &self.config().name
    }

    /// Returns the source shortcut.
    fn shortcut(&self) -> &str {
        &self.config().shortcut
    }

    /// Returns whether the source is enabled by default.
    fn is_enabled(&self) -> bool {
        self.config().enabled
    }
}
