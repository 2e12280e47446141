use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use super::fetcher::{FeedFetcher, FetchError};
use super::normalize::normalize_entry;
use super::parser::{parse_feed, FeedInfo, ParseError, ParseWarning};
use crate::storage::{Database, DatabaseError, Feed};

/// Why one feed's pipeline stopped.
///
/// The `Display` text is what gets stored in `feeds.error_message`, so each
/// variant carries its own prefix.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Network error: {0}")]
    Network(#[from] FetchError),
    #[error("Parse error: {0}")]
    MalformedFeed(#[from] ParseError),
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Errors returned by [`RefreshService::refresh_feed`]
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Feed {0} not found")]
    FeedNotFound(i64),
    /// The feed exists and the attempt was recorded as `error`
    #[error(transparent)]
    Ingest(#[from] IngestError),
    /// The feed could not be looked up
    #[error("Storage error: {0}")]
    Storage(DatabaseError),
}

/// Outcome of one successful feed refresh
#[derive(Debug, Clone)]
pub struct FeedRefresh {
    pub feed_id: i64,
    pub feed_info: FeedInfo,
    /// IDs of the articles created by this refresh, in document order
    pub new_article_ids: Vec<i64>,
    /// Entries found in the document
    pub total_entries: usize,
    /// Present when entries were recovered from a malformed document
    pub warning: Option<ParseWarning>,
}

impl FeedRefresh {
    pub fn new_articles(&self) -> usize {
        self.new_article_ids.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedFailure {
    pub feed_id: i64,
    pub feed_title: String,
    pub error: String,
}

/// Aggregate result of [`RefreshService::refresh_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total_feeds: usize,
    pub successful_feeds: usize,
    pub failed_feeds: usize,
    pub total_new_articles: usize,
    /// Ordered by feed id
    pub errors: Vec<FeedFailure>,
}

/// One async lock per feed id, shared by single and batch refreshes.
///
/// Entries live only while a refresh holds or waits for them.
#[derive(Clone, Default)]
struct FeedLocks(Arc<Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>>);

impl FeedLocks {
    async fn acquire(&self, feed_id: i64) -> FeedLockGuard {
        let lock = {
            // The map only hands out Arcs, a panic while holding it leaves nothing half-written
            let mut locks = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(feed_id).or_default())
        };
        FeedLockGuard {
            locks: self.clone(),
            feed_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Exclusive hold on one feed; drops the map entry when no one else wants it.
struct FeedLockGuard {
    locks: FeedLocks,
    feed_id: i64,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for FeedLockGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.0.lock().unwrap_or_else(PoisonError::into_inner);
        // Released under the map lock so no new holder can clone the Arc in between
        drop(self.guard.take());
        if locks
            .get(&self.feed_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.feed_id);
        }
    }
}

/// Runs the fetch → parse → normalize → store → record pipeline.
///
/// Cloning is cheap and clones share the per-feed locks, so the same feed is
/// never refreshed twice at once no matter which handle triggered it.
#[derive(Clone)]
pub struct RefreshService {
    db: Database,
    fetcher: FeedFetcher,
    locks: FeedLocks,
    max_concurrent: usize,
}

impl RefreshService {
    pub fn new(db: Database, fetcher: FeedFetcher, max_concurrent: usize) -> Self {
        Self {
            db,
            fetcher,
            locks: FeedLocks::default(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Refresh a single feed, active or not.
    ///
    /// The fetch status is recorded whatever the outcome. On failure the
    /// returned error's message equals the stored `error_message`.
    pub async fn refresh_feed(&self, feed_id: i64) -> Result<FeedRefresh, RefreshError> {
        let feed = self
            .db
            .get_feed(feed_id)
            .await
            .map_err(RefreshError::Storage)?
            .ok_or(RefreshError::FeedNotFound(feed_id))?;

        Ok(self.refresh(&feed).await?)
    }

    /// Refresh every active feed concurrently.
    ///
    /// A failing feed is recorded and reported but never stops the others.
    /// Only the initial lookup of active feeds can fail the whole batch.
    ///
    /// # Behavior
    ///
    /// - Fetches up to `max_concurrent` feeds simultaneously
    /// - Each feed's steps run strictly in sequence
    /// - Completion order across feeds is unspecified
    pub async fn refresh_all(&self) -> Result<BatchReport, DatabaseError> {
        let feeds = self.db.get_active_feeds().await?;
        let total_feeds = feeds.len();
        tracing::info!(feeds = total_feeds, concurrency = self.max_concurrent, "Starting batch refresh");

        let outcomes: Vec<(Feed, Result<FeedRefresh, IngestError>)> = stream::iter(feeds)
            .map(|feed| async move {
                let result = self.refresh(&feed).await;
                (feed, result)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut report = BatchReport {
            total_feeds,
            ..BatchReport::default()
        };
        for (feed, result) in outcomes {
            match result {
                Ok(refresh) => {
                    report.successful_feeds += 1;
                    report.total_new_articles += refresh.new_articles();
                }
                Err(e) => {
                    report.failed_feeds += 1;
                    report.errors.push(FeedFailure {
                        feed_id: feed.id,
                        feed_title: feed.title.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report.errors.sort_by_key(|f| f.feed_id);

        tracing::info!(
            total = report.total_feeds,
            successful = report.successful_feeds,
            failed = report.failed_feeds,
            new_articles = report.total_new_articles,
            "Batch refresh complete"
        );
        Ok(report)
    }

    /// Serialized per feed; records the status after every attempt.
    async fn refresh(&self, feed: &Feed) -> Result<FeedRefresh, IngestError> {
        let _guard = self.locks.acquire(feed.id).await;

        let result = self.ingest(feed).await;

        let error_message = result.as_ref().err().map(ToString::to_string);
        if let Err(e) = self
            .db
            .record_fetch_status(feed.id, error_message.as_deref())
            .await
        {
            tracing::warn!(feed_id = feed.id, error = %e, "Failed to record fetch status");
        }

        match &result {
            Ok(refresh) => tracing::info!(
                feed_id = feed.id,
                title = %feed.title,
                entries = refresh.total_entries,
                new_articles = refresh.new_articles(),
                "Feed refreshed"
            ),
            Err(e) => tracing::warn!(feed_id = feed.id, title = %feed.title, error = %e, "Feed refresh failed"),
        }
        result
    }

    async fn ingest(&self, feed: &Feed) -> Result<FeedRefresh, IngestError> {
        let bytes = self.fetcher.fetch(&feed.url).await?;
        let parsed = parse_feed(&bytes)?;

        if let Some(warning) = &parsed.warning {
            tracing::warn!(feed_id = feed.id, warning = %warning, "Feed document was malformed");
        }

        let total_entries = parsed.entries.len();
        let candidates: Vec<_> = parsed.entries.iter().map(normalize_entry).collect();

        let new_article_ids = self.db.insert_new_articles(feed.id, &candidates).await?;

        Ok(FeedRefresh {
            feed_id: feed.id,
            feed_info: parsed.info,
            new_article_ids,
            total_entries,
            warning: parsed.warning,
        })
    }
}
