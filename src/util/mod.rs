//! Utility functions shared by the ingestion pipeline.
//!
//! - **Text processing**: markup sanitizing and character-based truncation
//!   for feed-supplied fields
//! - **URL validation**: checks that a feed identity is an absolute http(s) URL
//!
//! # Examples
//!
//! ```
//! use feedsync::util::{sanitize_html, truncate_with_marker, validate_feed_url};
//!
//! let clean = sanitize_html("<p>Tom &amp; Jerry</p>");
//! assert_eq!(clean, "Tom & Jerry");
//!
//! let title = truncate_with_marker("A rather long headline", 10);
//! assert_eq!(title, "A rathe...");
//!
//! assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
//! ```

mod text;
mod url_validator;

pub use text::{sanitize_html, truncate_chars, truncate_with_marker, TRUNCATION_MARKER};
pub use url_validator::{validate_feed_url, UrlValidationError, MAX_FEED_URL_LENGTH};
