//! Error types for the search engine.

use thiserror::Error;

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur while running a search session.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The request never produced a response (connection, DNS, TLS, ...).
    #[error("Transport failed: {0}")]
    Transport(String),

    /// The upstream API answered with a non-success status.
    #[error("HTTP status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Leading sample of the response body.
        body: String,
    },

    /// Structured data was expected but the payload was malformed.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The request was superseded or aborted. Not a user-visible failure.
    #[error("Request cancelled")]
    Cancelled,

    /// Invalid query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// No source registered under the given name.
    #[error("Unknown source '{0}'")]
    UnknownSource(String),

    /// Saved-search storage failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl SearchError {
    /// Returns true if this error only signals cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchError::Cancelled)
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SearchError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            SearchError::Status {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            SearchError::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for SearchError {
    fn from(err: url::ParseError) -> Self {
        SearchError::InvalidQuery(err.to_string())
    }
}
