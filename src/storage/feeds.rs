use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedDbRow, FetchStatus, NewFeed, UPDATE_FREQUENCY_RANGE};
use crate::util::validate_feed_url;

const FEED_COLUMNS: &str = "id, collection_id, title, url, description, site_url, update_frequency, \
     is_active, last_updated, last_fetch_status, error_message, created_at";

impl Database {
    // ========================================================================
    // Feed Registration
    // ========================================================================

    /// Register a feed and return its ID.
    ///
    /// Feed creation is owned by external collaborators (collection
    /// management); this is the entry point they and the CLI use. The URL must
    /// be an absolute http(s) URL and `update_frequency` must lie in 15..=1440.
    ///
    /// # Errors
    ///
    /// - [`DatabaseError::InvalidFeed`] for a bad URL, empty title or out-of-range frequency
    /// - [`DatabaseError::DuplicateFeed`] if the URL is already registered
    pub async fn insert_feed(&self, feed: &NewFeed) -> Result<i64, DatabaseError> {
        let url = validate_feed_url(&feed.url)
            .map_err(|e| DatabaseError::InvalidFeed(e.to_string()))?;
        if feed.title.trim().is_empty() {
            return Err(DatabaseError::InvalidFeed("title must not be empty".to_string()));
        }
        if !UPDATE_FREQUENCY_RANGE.contains(&feed.update_frequency) {
            return Err(DatabaseError::InvalidFeed(format!(
                "update_frequency must be between {} and {} minutes, got {}",
                UPDATE_FREQUENCY_RANGE.start(),
                UPDATE_FREQUENCY_RANGE.end(),
                feed.update_frequency
            )));
        }

        let now = chrono::Utc::now().timestamp();
        let result: Result<(i64,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO feeds (collection_id, title, url, description, site_url,
                               update_frequency, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(feed.collection_id)
        .bind(feed.title.trim())
        .bind(url.as_str())
        .bind(&feed.description)
        .bind(&feed.site_url)
        .bind(feed.update_frequency)
        .bind(feed.is_active)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok((id,)) => {
                tracing::debug!(feed_id = id, url = %url, "Registered feed");
                Ok(id)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(DatabaseError::DuplicateFeed(url.to_string()))
            }
            Err(e) => Err(DatabaseError::from_sqlx(e)),
        }
    }

    /// Enable or disable a feed for batch refreshes, returns whether it exists
    pub async fn set_feed_active(&self, feed_id: i64, active: bool) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE feeds SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Feed Lookup
    // ========================================================================

    /// Get a feed by its ID
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {} FROM feeds WHERE id = ?",
            FEED_COLUMNS
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FeedDbRow::into_feed))
    }

    /// Get a feed by its unique URL
    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {} FROM feeds WHERE url = ?",
            FEED_COLUMNS
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FeedDbRow::into_feed))
    }

    /// Get every feed eligible for a batch refresh (`is_active = 1`)
    pub async fn get_active_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {} FROM feeds WHERE is_active = 1 ORDER BY id",
            FEED_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    /// Get all feeds, active or not, ordered by title
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {} FROM feeds ORDER BY title, id",
            FEED_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    // ========================================================================
    // Fetch Health
    // ========================================================================

    /// Record the outcome of a fetch attempt.
    ///
    /// Always stamps `last_updated` with the current time. `None` marks the
    /// feed `success` and clears any previous message; `Some(message)` marks it
    /// `error` with that message. The status is derived from the message, so
    /// the two can never disagree.
    pub async fn record_fetch_status(
        &self,
        feed_id: i64,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let status = if error.is_some() {
            FetchStatus::Error
        } else {
            FetchStatus::Success
        };

        sqlx::query(
            "UPDATE feeds SET last_updated = ?, last_fetch_status = ?, error_message = ? WHERE id = ?",
        )
        .bind(now)
        .bind(status.as_str())
        .bind(error)
        .bind(feed_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
