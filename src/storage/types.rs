use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage-layer errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another writer holds the database lock past the busy timeout
    #[error("Database is locked by another writer")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Feed registration rejected before touching the database
    #[error("Invalid feed: {0}")]
    InvalidFeed(String),

    /// A feed with this URL is already registered
    #[error("Feed already exists: {0}")]
    DuplicateFeed(String),

    /// Generic database error
    #[error("{0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return DatabaseError::Locked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Fetch Status
// ============================================================================

/// Outcome of the most recent fetch attempt for a feed.
///
/// `Pending` only exists before the first attempt. The in-flight `fetching`
/// phase is never persisted; it is represented by the per-feed refresh lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Pending,
    Success,
    Error,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Pending => "pending",
            FetchStatus::Success => "success",
            FetchStatus::Error => "error",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FetchStatus::Pending),
            "success" => Ok(FetchStatus::Success),
            "error" => Ok(FetchStatus::Error),
            other => Err(format!("unknown fetch status: {}", other)),
        }
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Minimum and maximum `update_frequency`, in minutes
pub const UPDATE_FREQUENCY_RANGE: std::ops::RangeInclusive<i64> = 15..=1440;

/// Default `update_frequency` for newly registered feeds
pub const DEFAULT_UPDATE_FREQUENCY: i64 = 60;

/// Feed registration request from an external collaborator
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub collection_id: Option<i64>,
    pub update_frequency: i64,
    pub is_active: bool,
}

impl NewFeed {
    /// Active feed with default scheduling and no metadata
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            description: None,
            site_url: None,
            collection_id: None,
            update_frequency: DEFAULT_UPDATE_FREQUENCY,
            is_active: true,
        }
    }
}

/// Normalized article ready for the deduplicating insert
///
/// Produced by [`crate::feed::normalize_entry`]. Field limits are enforced
/// there and re-checked by CHECK constraints in the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleCandidate {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub content: String,
    pub author: String,
    pub published_date: Option<i64>,
}

/// Internal row type for Feed queries (used by sqlx FromRow)
/// Converts to Feed via into_feed() with Arc wrapping
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub collection_id: Option<i64>,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub update_frequency: i64,
    pub is_active: bool,
    pub last_updated: Option<i64>,
    pub last_fetch_status: String,
    pub error_message: Option<String>,
    pub created_at: i64,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Feed {
        // The CHECK constraint restricts the column to known values
        let last_fetch_status = self
            .last_fetch_status
            .parse()
            .unwrap_or(FetchStatus::Pending);
        Feed {
            id: self.id,
            collection_id: self.collection_id,
            title: Arc::from(self.title),
            url: self.url,
            description: self.description,
            site_url: self.site_url,
            update_frequency: self.update_frequency,
            is_active: self.is_active,
            last_updated: self.last_updated,
            last_fetch_status,
            error_message: self.error_message,
            created_at: self.created_at,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Feed data from database
///
/// Ingestion writes only `last_updated`, `last_fetch_status` and
/// `error_message`. Everything else belongs to the external collaborator that
/// registered the feed. `title` uses `Arc<str>` for cheap cloning into batch
/// error records.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: i64,
    pub collection_id: Option<i64>,
    pub title: Arc<str>,
    pub url: String,
    pub description: Option<String>,
    pub site_url: Option<String>,
    /// Scheduling hint in minutes (15..=1440)
    pub update_frequency: i64,
    pub is_active: bool,
    /// Unix seconds of the last fetch attempt, successful or not
    pub last_updated: Option<i64>,
    pub last_fetch_status: FetchStatus,
    /// Set iff `last_fetch_status == FetchStatus::Error`
    pub error_message: Option<String>,
    pub created_at: i64,
}

/// Article data from database
///
/// Immutable once inserted: re-fetching the feed never rewrites these fields.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub content: String,
    pub author: String,
    pub published_date: Option<i64>,
    pub fetched_at: i64,
}
