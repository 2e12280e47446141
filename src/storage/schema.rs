use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the feed/article store.
///
/// Cloning is cheap (the pool is reference counted), so one handle is shared
/// by every concurrent refresh.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Locked` if another process holds the write lock
    /// past the busy timeout, `DatabaseError::Migration` if the schema could
    /// not be created, and `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // SEC-010: Database file is user-only (0600), set before the pool opens it
        #[cfg(unix)]
        if !in_memory {
            restrict_file_permissions(std::path::Path::new(path));
        }

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release before returning SQLITE_BUSY.
        // Concurrent refreshes of different feeds contend on the single writer; this absorbs it.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // An in-memory database lives and dies with its connection: pin exactly one
        // and never let the pool recycle it.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| match DatabaseError::from_sqlx(e) {
            DatabaseError::Locked => DatabaseError::Locked,
            other => DatabaseError::Migration(other.to_string()),
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op. The feed health invariant (an error message is
    /// present exactly when the status is `error`) and the article field
    /// limits are enforced by CHECK constraints.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                collection_id INTEGER,
                title TEXT NOT NULL,
                url TEXT UNIQUE NOT NULL CHECK (length(url) <= 500),
                description TEXT,
                site_url TEXT,
                update_frequency INTEGER NOT NULL DEFAULT 60
                    CHECK (update_frequency BETWEEN 15 AND 1440),
                is_active INTEGER NOT NULL DEFAULT 1,
                last_updated INTEGER,
                last_fetch_status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (last_fetch_status IN ('pending', 'success', 'error')),
                error_message TEXT,
                created_at INTEGER NOT NULL,
                CHECK ((last_fetch_status = 'error') = (error_message IS NOT NULL))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                guid TEXT NOT NULL CHECK (length(guid) <= 500),
                title TEXT NOT NULL CHECK (length(title) <= 300),
                link TEXT NOT NULL CHECK (length(link) <= 500),
                description TEXT NOT NULL DEFAULT '' CHECK (length(description) <= 1000),
                content TEXT NOT NULL DEFAULT '',
                author TEXT NOT NULL DEFAULT '' CHECK (length(author) <= 100),
                published_date INTEGER,
                fetched_at INTEGER NOT NULL,
                UNIQUE(feed_id, guid)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Batch refresh selects active feeds only
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_active ON feeds(is_active)")
            .execute(&mut *tx)
            .await?;

        // get_articles_for_feed() filters by feed_id and sorts by published_date DESC
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_feed_published ON articles(feed_id, published_date DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

/// Pre-create a missing database file with mode 0600, or tighten an existing one.
/// Failures are logged; SQLite reports anything fatal when it connects.
#[cfg(unix)]
fn restrict_file_permissions(db_path: &std::path::Path) {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    if db_path.exists() {
        if let Err(e) = std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600)) {
            tracing::warn!(path = %db_path.display(), error = %e, "Failed to set database file permissions");
        }
        return;
    }

    let parent_exists = db_path
        .parent()
        .is_some_and(|p| p.as_os_str().is_empty() || p.exists());
    if parent_exists {
        // mode() applies at creation, so the file never exists with umask permissions
        if let Err(e) = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(db_path)
        {
            tracing::debug!(path = %db_path.display(), error = %e, "Could not pre-create database file");
        }
    }
}
