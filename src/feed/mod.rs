//! Feed ingestion pipeline.
//!
//! One refresh of one feed runs these steps strictly in order:
//!
//! - **Fetching**: HTTP retrieval with timeout, size cap and redirect limits
//! - **Parsing**: `feed-rs`, falling back to a lenient scan for broken documents
//! - **Normalizing**: each entry becomes an [`crate::storage::ArticleCandidate`]
//! - **Storing**: deduplicated insert, then the fetch status is recorded
//!
//! # Architecture
//!
//! - [`fetcher`] - [`FeedFetcher`], one GET per call, no retries
//! - [`parser`] - [`parse_feed`] producing [`ParsedFeed`]
//! - [`normalize`] - [`normalize_entry`] field policies
//! - [`refresh`] - [`RefreshService`] for single and batch refreshes
//!
//! # Example
//!
//! ```ignore
//! use feedsync::feed::{FeedFetcher, FetchSettings, RefreshService};
//!
//! let fetcher = FeedFetcher::new(&FetchSettings::default())?;
//! let service = RefreshService::new(db, fetcher, 10);
//! let report = service.refresh_all().await?;
//! ```

pub mod fetcher;
pub mod normalize;
pub mod parser;
pub mod refresh;

pub use fetcher::{FeedFetcher, FetchError, FetchSettings};
pub use normalize::normalize_entry;
pub use parser::{parse_feed, AuthorDetail, FeedInfo, ParseError, ParseWarning, ParsedFeed, RawEntry};
pub use refresh::{BatchReport, FeedFailure, FeedRefresh, IngestError, RefreshError, RefreshService};
