//! Integration tests for the ingestion pipeline: fetch, parse, normalize,
//! deduplicate and record health, for single feeds and batches.
//!
//! Each test creates its own in-memory SQLite database and mock HTTP server.

use feedsync::feed::{FeedFetcher, FetchSettings, RefreshError, RefreshService};
use feedsync::storage::{Database, FetchStatus, NewFeed};
use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RSS_V1: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Pipeline Feed</title>
  <item>
    <guid>story-1</guid>
    <title>Original headline</title>
    <link>https://example.com/story-1</link>
    <description>&lt;p&gt;Hello &amp;amp; &lt;b&gt;world&lt;/b&gt;&lt;/p&gt;</description>
  </item>
  <item>
    <guid>story-2</guid>
    <title>Second story</title>
    <link>https://example.com/story-2</link>
  </item>
</channel></rss>"#;

/// Same guids, retitled upstream, plus one new entry
const RSS_V2: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Pipeline Feed</title>
  <item><guid>story-1</guid><title>Edited headline</title></item>
  <item><guid>story-2</guid><title>Second story, updated</title></item>
  <item><guid>story-3</guid><title>Third story</title></item>
</channel></rss>"#;

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn service_with_timeout(db: Database, timeout: Duration) -> RefreshService {
    let settings = FetchSettings {
        timeout,
        user_agent: "feedsync-integration/1.0".to_string(),
        ..FetchSettings::default()
    };
    RefreshService::new(db, FeedFetcher::new(&settings).unwrap(), 4)
}

fn service(db: Database) -> RefreshService {
    service_with_timeout(db, Duration::from_secs(5))
}

async fn mount_feed(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/feed", port)
}

// ============================================================================
// Single Feed
// ============================================================================

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed", RSS_V1).await;

    let db = test_db().await;
    let feed_id = db
        .insert_feed(&NewFeed::new(format!("{}/feed", server.uri()), "Pipeline"))
        .await
        .unwrap();
    let service = service(db.clone());

    let first = service.refresh_feed(feed_id).await.unwrap();
    assert_eq!(first.new_articles(), 2);

    let second = service.refresh_feed(feed_id).await.unwrap();
    assert_eq!(second.new_articles(), 0);
    assert_eq!(db.count_articles(feed_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_sanitized_description_is_stored() {
    let server = MockServer::start().await;
    mount_feed(&server, "/feed", RSS_V1).await;

    let db = test_db().await;
    let feed_id = db
        .insert_feed(&NewFeed::new(format!("{}/feed", server.uri()), "Pipeline"))
        .await
        .unwrap();
    service(db.clone()).refresh_feed(feed_id).await.unwrap();

    let article = db.find_article(feed_id, "story-1").await.unwrap().unwrap();
    assert_eq!(article.description, "Hello & world");
    assert_eq!(article.link, "https://example.com/story-1");
}

#[tokio::test]
async fn test_retitled_entries_are_not_updated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS_V1))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_feed(&server, "/feed", RSS_V2).await;

    let db = test_db().await;
    let feed_id = db
        .insert_feed(&NewFeed::new(format!("{}/feed", server.uri()), "Pipeline"))
        .await
        .unwrap();
    let service = service(db.clone());

    service.refresh_feed(feed_id).await.unwrap();
    let second = service.refresh_feed(feed_id).await.unwrap();
    assert_eq!(second.total_entries, 3);
    assert_eq!(second.new_articles(), 1);

    let kept = db.find_article(feed_id, "story-1").await.unwrap().unwrap();
    assert_eq!(kept.title, "Original headline");
    let added = db.find_article(feed_id, "story-3").await.unwrap().unwrap();
    assert_eq!(added.title, "Third story");
}

#[tokio::test]
async fn test_long_title_and_missing_fields() {
    let long_title = "x".repeat(400);
    let rss = format!(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Sparse</title>
  <item><title>{}</title><link>https://example.com/long</link></item>
  <item><link>https://example.com/bare</link></item>
</channel></rss>"#,
        long_title
    );

    let server = MockServer::start().await;
    mount_feed(&server, "/feed", &rss).await;

    let db = test_db().await;
    let feed_id = db
        .insert_feed(&NewFeed::new(format!("{}/feed", server.uri()), "Sparse"))
        .await
        .unwrap();
    let refresh = service(db.clone()).refresh_feed(feed_id).await.unwrap();
    assert_eq!(refresh.new_articles(), 2);

    // No guid: the link is the key
    let long = db
        .find_article(feed_id, "https://example.com/long")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(long.title.chars().count(), 300);
    assert!(long.title.ends_with("..."));

    let bare = db
        .find_article(feed_id, "https://example.com/bare")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bare.title, "Sans titre");
    assert_eq!(bare.description, "");
    assert_eq!(bare.author, "");
    assert_eq!(bare.published_date, None);
}

#[tokio::test]
async fn test_malformed_document_keeps_recovered_entries() {
    let broken = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Half</title>
  <item><guid>ok-1</guid><title>Survivor</title></item>
  <item><guid>ok-2</guid><title>Casualty</ti"#;

    let server = MockServer::start().await;
    mount_feed(&server, "/feed", broken).await;

    let db = test_db().await;
    let feed_id = db
        .insert_feed(&NewFeed::new(format!("{}/feed", server.uri()), "Half"))
        .await
        .unwrap();
    let refresh = service(db.clone()).refresh_feed(feed_id).await.unwrap();

    assert_eq!(refresh.new_articles(), 1);
    assert!(refresh.warning.is_some());
    assert!(db.find_article(feed_id, "ok-1").await.unwrap().is_some());

    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(feed.last_fetch_status, FetchStatus::Success);
}

// ============================================================================
// Fetch Status
// ============================================================================

#[tokio::test]
async fn test_timeout_records_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(RSS_V1)
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let db = test_db().await;
    let feed_id = db
        .insert_feed(&NewFeed::new(format!("{}/feed", server.uri()), "Slow"))
        .await
        .unwrap();
    let service = service_with_timeout(db.clone(), Duration::from_secs(1));

    let err = service.refresh_feed(feed_id).await.unwrap_err();
    assert!(matches!(err, RefreshError::Ingest(_)));

    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(feed.last_fetch_status, FetchStatus::Error);
    assert_eq!(
        feed.error_message.as_deref(),
        Some("Network error: Request timed out")
    );
    assert!(feed.last_updated.is_some());
    assert_eq!(db.count_articles(feed_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_success_without_new_articles_still_records_success() {
    let empty = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Empty</title></channel></rss>"#;
    let server = MockServer::start().await;
    mount_feed(&server, "/feed", empty).await;

    let db = test_db().await;
    let feed_id = db
        .insert_feed(&NewFeed::new(format!("{}/feed", server.uri()), "Empty"))
        .await
        .unwrap();
    db.record_fetch_status(feed_id, Some("Network error: earlier failure"))
        .await
        .unwrap();

    let refresh = service(db.clone()).refresh_feed(feed_id).await.unwrap();
    assert_eq!(refresh.total_entries, 0);

    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(feed.last_fetch_status, FetchStatus::Success);
    assert!(feed.error_message.is_none());
}

// ============================================================================
// Batch Refresh
// ============================================================================

#[tokio::test]
async fn test_batch_isolates_failing_feed() {
    let server = MockServer::start().await;
    mount_feed(
        &server,
        "/one",
        r#"<rss version="2.0"><channel><title>One</title>
           <item><guid>1a</guid><title>One A</title></item></channel></rss>"#,
    )
    .await;
    mount_feed(
        &server,
        "/three",
        r#"<rss version="2.0"><channel><title>Three</title>
           <item><guid>3a</guid><title>Three A</title></item>
           <item><guid>3b</guid><title>Three B</title></item></channel></rss>"#,
    )
    .await;

    let db = test_db().await;
    let one = db
        .insert_feed(&NewFeed::new(format!("{}/one", server.uri()), "Feed One"))
        .await
        .unwrap();
    let two = db
        .insert_feed(&NewFeed::new(unreachable_url(), "Feed Two"))
        .await
        .unwrap();
    let three = db
        .insert_feed(&NewFeed::new(format!("{}/three", server.uri()), "Feed Three"))
        .await
        .unwrap();

    let report = service(db.clone()).refresh_all().await.unwrap();
    assert_eq!(report.total_feeds, 3);
    assert_eq!(report.successful_feeds, 2);
    assert_eq!(report.failed_feeds, 1);
    assert_eq!(report.total_new_articles, 3);

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].feed_id, two);
    assert_eq!(report.errors[0].feed_title, "Feed Two");
    assert!(report.errors[0].error.starts_with("Network error:"));

    assert_eq!(db.count_articles(one).await.unwrap(), 1);
    assert_eq!(db.count_articles(three).await.unwrap(), 2);

    let failed = db.get_feed(two).await.unwrap().unwrap();
    assert_eq!(failed.last_fetch_status, FetchStatus::Error);
    assert_eq!(failed.error_message.as_deref(), Some(report.errors[0].error.as_str()));
}

#[tokio::test]
async fn test_batch_report_serializes() {
    let db = test_db().await;
    let bad = db
        .insert_feed(&NewFeed::new(unreachable_url(), "Down"))
        .await
        .unwrap();

    let report = service(db).refresh_all().await.unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["total_feeds"], 1);
    assert_eq!(json["failed_feeds"], 1);
    assert_eq!(json["errors"][0]["feed_id"], bad);
    assert_eq!(json["errors"][0]["feed_title"], "Down");
}
