//! JSON-over-HTTP transport and the generic HTTP source built on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::{Continuation, QueryCodec, QueryState, Result, ResultPage, SearchError, SearchSource, SourceConfig};

/// Default number of characters of an error body kept in
/// [`SearchError::Status`].
pub const DEFAULT_BODY_SAMPLE: usize = 256;

/// Issues GET requests that decode JSON and honor a cancellation token.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    body_sample: usize,
}

impl HttpTransport {
    /// Creates a transport with a default client.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("heritage-search/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Creates a transport with a custom reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            body_sample: DEFAULT_BODY_SAMPLE,
        }
    }

    /// Sets how much of an error body is kept.
    pub fn with_body_sample(mut self, chars: usize) -> Self {
        self.body_sample = chars;
        self
    }

    /// GETs `url` with `params` appended and decodes the body as JSON.
    ///
    /// Returns [`SearchError::Cancelled`] as soon as `token` is cancelled,
    /// including when it already is.
    pub async fn get_json(
        &self,
        url: &str,
        params: &[(String, String)],
        token: &CancellationToken,
    ) -> Result<Value> {
        let url = Url::parse_with_params(url, params)?;
        debug!("GET {}", url);

        let request = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| SearchError::Transport(e.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| SearchError::Transport(e.to_string()))?;
            decode_body(status, &body, self.body_sample)
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SearchError::Cancelled),
            result = request => result,
        }
    }
}

fn decode_body(status: u16, body: &str, sample: usize) -> Result<Value> {
    if !(200..300).contains(&status) {
        return Err(SearchError::Status {
            status,
            body: truncate(body, sample),
        });
    }
    serde_json::from_str(body).map_err(|e| SearchError::Decode(e.to_string()))
}

fn truncate(body: &str, max_chars: usize) -> String {
    let body = body.trim();
    match body.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

/// Maps a query to request parameters.
pub type ParamBuilder = Arc<dyn Fn(&QueryState) -> Vec<(String, String)> + Send + Sync>;

/// Maps a decoded response to a page.
pub type PageDecoder = Arc<dyn Fn(&QueryState, Value) -> Result<ResultPage> + Send + Sync>;

/// A [`SearchSource`] for a JSON endpoint.
///
/// By default the query is sent in its canonical URL form and the response
/// is expected to be a serialized [`ResultPage`]. Providers with their own
/// parameters or response shape inject a [`ParamBuilder`] and a
/// [`PageDecoder`].
pub struct HttpSource {
    config: SourceConfig,
    endpoint: String,
    transport: HttpTransport,
    params: ParamBuilder,
    decoder: PageDecoder,
}

impl HttpSource {
    /// Creates a source for `endpoint`.
    pub fn new(config: SourceConfig, endpoint: impl Into<String>, transport: HttpTransport) -> Self {
        let codec = QueryCodec::default().with_facet_keys(config.facet_keys());
        Self {
            config,
            endpoint: endpoint.into(),
            transport,
            params: Arc::new(move |query: &QueryState| codec.serialize(query)),
            decoder: Arc::new(decode_page),
        }
    }

    /// Sets the parameter builder.
    pub fn with_params<F>(mut self, params: F) -> Self
    where
        F: Fn(&QueryState) -> Vec<(String, String)> + Send + Sync + 'static,
    {
        self.params = Arc::new(params);
        self
    }

    /// Sets the response decoder.
    pub fn with_decoder<F>(mut self, decoder: F) -> Self
    where
        F: Fn(&QueryState, Value) -> Result<ResultPage> + Send + Sync + 'static,
    {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Returns the endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SearchSource for HttpSource {
    fn config(&self) -> &SourceConfig {
        &self.config
    }

    async fn search(&self, query: &QueryState, token: CancellationToken) -> Result<ResultPage> {
        let params = (self.params)(query);
        let body = self.transport.get_json(&self.endpoint, &params, &token).await?;
        let mut page = (self.decoder)(query, body)?;
        for item in &mut page.items {
            if item.source.is_empty() {
                item.source = self.config.name.clone();
            }
        }
        Ok(page)
    }
}

/// Decodes a serialized [`ResultPage`].
///
/// A missing continuation is derived from `total` when present, otherwise
/// from whether the page came back full.
pub fn decode_page(query: &QueryState, body: Value) -> Result<ResultPage> {
    let mut page: ResultPage =
        serde_json::from_value(body).map_err(|e| SearchError::Decode(e.to_string()))?;
    if page.continuation.is_none() {
        page.continuation = match page.total {
            Some(total) => Continuation::from_total(total, query.page, query.size),
            None => Continuation::from_page_fill(page.items.len(), query.page, query.size),
        };
    }
    Ok(page)
}
