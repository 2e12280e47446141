use super::schema::Database;
use super::types::{Article, ArticleCandidate, DatabaseError};

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

const ARTICLE_COLUMNS: &str =
    "id, feed_id, guid, title, link, description, content, author, published_date, fetched_at";

impl Database {
    // ========================================================================
    // Deduplicating Insert
    // ========================================================================

    /// Persist the candidates whose `(feed_id, guid)` has not been seen yet.
    ///
    /// Returns the IDs of the newly created articles in candidate order.
    /// Candidates whose key already exists, including repeats within the same
    /// slice, are skipped without touching the stored row: articles are
    /// immutable once ingested, so a changed upstream title never overwrites
    /// the original.
    ///
    /// All inserts run in one transaction. If any statement fails the whole
    /// batch rolls back and nothing from this call is persisted, so a retry
    /// cannot leave a partial set behind.
    pub async fn insert_new_articles(
        &self,
        feed_id: i64,
        candidates: &[ArticleCandidate],
    ) -> Result<Vec<i64>, DatabaseError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let mut inserted = Vec::new();

        for candidate in candidates {
            // ON CONFLICT DO NOTHING is the existence check: RETURNING yields a row
            // only when the key was absent.
            let row: Option<(i64,)> = sqlx::query_as(
                r#"
                INSERT INTO articles (feed_id, guid, title, link, description, content,
                                      author, published_date, fetched_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(feed_id, guid) DO NOTHING
                RETURNING id
            "#,
            )
            .bind(feed_id)
            .bind(&candidate.guid)
            .bind(&candidate.title)
            .bind(&candidate.link)
            .bind(&candidate.description)
            .bind(&candidate.content)
            .bind(&candidate.author)
            .bind(candidate.published_date)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            match row {
                Some((id,)) => {
                    tracing::debug!(feed_id = feed_id, article_id = id, title = %candidate.title, "New article");
                    inserted.push(id);
                }
                None => {
                    tracing::trace!(feed_id = feed_id, guid = %candidate.guid, "Article already stored");
                }
            }
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(inserted)
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Look up an article by its natural key
    pub async fn find_article(
        &self,
        feed_id: i64,
        guid: &str,
    ) -> Result<Option<Article>, DatabaseError> {
        let article = sqlx::query_as::<_, Article>(&format!(
            "SELECT {} FROM articles WHERE feed_id = ? AND guid = ?",
            ARTICLE_COLUMNS
        ))
        .bind(feed_id)
        .bind(guid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(article)
    }

    /// Get articles for a specific feed, newest first, with optional limit
    /// PERF-003: Hard cap at MAX_ARTICLES (2000) to prevent OOM
    pub async fn get_articles_for_feed(
        &self,
        feed_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Article>, DatabaseError> {
        let limit = limit.unwrap_or(500).min(MAX_ARTICLES);
        let articles = sqlx::query_as::<_, Article>(&format!(
            r#"
            SELECT {}
            FROM articles
            WHERE feed_id = ?
            ORDER BY published_date DESC, fetched_at DESC, id DESC
            LIMIT ?
        "#,
            ARTICLE_COLUMNS
        ))
        .bind(feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    /// Number of stored articles for a feed
    pub async fn count_articles(&self, feed_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
