//! # heritage-search
//!
//! A search-session engine for collection and catalogue search pages.
//!
//! The library keeps a canonical query in the URL, turns it into requests
//! against one or more sources, and maintains a consistent result view while
//! requests overlap, fail, or are superseded:
//!
//! - Canonical query codec between URL parameters and [`QueryState`]
//! - URL state store with history integration and change notification
//! - Per-session page cache keyed by canonical query
//! - Request coordinator with cancellation, stale-response immunity and
//!   next-page prefetch
//! - Result aggregation with client-side facets
//! - Fan-out across independent sources
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use heritage_search::{sources::FixtureSource, QueryState, Session};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = FixtureSource::from_file("fixtures/prints.json")?;
//!     let session = Session::new(Arc::new(source));
//!
//!     session.submit(QueryState::new("wave")).await;
//!     session.load_more().await;
//!
//!     for item in session.items() {
//!         println!("{}: {}", item.title, item.url);
//!     }
//!     Ok(())
//! }
//! ```

mod aggregator;
mod cache;
mod codec;
mod error;
mod query;
mod result;
mod source;

pub mod facets;
pub mod fanout;
pub mod history;
pub mod saved;
pub mod session;
pub mod sources;
pub mod store;
pub mod transport;

pub use aggregator::ResultAggregator;
pub use cache::QueryCache;
pub use codec::{CodecConfig, QueryCodec};
pub use error::{Result, SearchError};
pub use fanout::FanOut;
pub use query::{CacheKey, QueryState, SortOrder};
pub use result::{Continuation, Item, ResultPage};
pub use session::{RequestOutcome, Session, SessionConfig, SessionSnapshot, Status};
pub use source::{SearchSource, SourceConfig};
pub use store::{Subscription, UrlStateStore, WriteOptions};
