use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use feedsync::config::Config;
use feedsync::feed::{FeedFetcher, FeedRefresh, RefreshService};
use feedsync::storage::{Database, DatabaseError, NewFeed, DEFAULT_UPDATE_FREQUENCY};

/// Get the config directory path (~/.config/feedsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("feedsync");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(name = "feedsync", version, about = "Fetch RSS/Atom feeds into a local article store")]
struct Args {
    /// Config file (default: ~/.config/feedsync/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database, overrides `database_path` from the config file
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a feed
    Add {
        /// Feed URL (http or https)
        url: String,
        /// Display title, defaults to the URL
        #[arg(long)]
        title: Option<String>,
        /// Refresh interval hint in minutes (15-1440)
        #[arg(long, default_value_t = DEFAULT_UPDATE_FREQUENCY)]
        frequency: i64,
        /// Register without including it in batch refreshes
        #[arg(long)]
        inactive: bool,
    },
    /// List feeds with their last fetch status
    Feeds,
    /// Refresh one feed, or every active feed
    Refresh {
        /// Only refresh this feed id
        #[arg(long, value_name = "ID")]
        feed: Option<i64>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match args.db.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            ensure_config_dir(&config_dir)?;
            config_dir.join("feeds.db")
        }
    };
    let db = open_database(&db_path).await?;

    match args.command {
        Command::Add {
            url,
            title,
            frequency,
            inactive,
        } => {
            let mut feed = NewFeed::new(url.clone(), title.unwrap_or_else(|| url.clone()));
            feed.update_frequency = frequency;
            feed.is_active = !inactive;
            let id = db
                .insert_feed(&feed)
                .await
                .with_context(|| format!("Failed to add feed {}", url))?;
            println!("Added feed {} ({})", id, url);
        }
        Command::Feeds => list_feeds(&db).await?,
        Command::Refresh { feed, json } => {
            let fetcher =
                FeedFetcher::new(&config.fetch_settings()).context("Failed to create HTTP client")?;
            let service = RefreshService::new(db, fetcher, config.max_concurrent_fetches);

            // Dropping the refresh future abandons in-flight feeds; each feed's
            // inserts are a single transaction so nothing is half-written.
            tokio::select! {
                result = run_refresh(&service, feed, json) => result?,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("Interrupted, refresh abandoned");
                    std::process::exit(130);
                }
            }
        }
    }

    Ok(())
}

fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if config_dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }
    Ok(())
}

async fn open_database(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::Locked) => {
            eprintln!(
                "Error: {} is locked by another process. Please wait for it to finish and try again.",
                path.display()
            );
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

async fn list_feeds(db: &Database) -> Result<()> {
    let feeds = db.list_feeds().await.context("Failed to load feeds")?;
    if feeds.is_empty() {
        println!("No feeds registered. Add one with: feedsync add <URL>");
        return Ok(());
    }

    for feed in feeds {
        let last_updated = feed
            .last_updated
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        let active = if feed.is_active { "" } else { " (inactive)" };

        println!(
            "{:>4}  {:<8} {:<16} {}{}",
            feed.id,
            feed.last_fetch_status.as_str(),
            last_updated,
            feed.title,
            active
        );
        println!("      {}", feed.url);
        if let Some(error) = &feed.error_message {
            println!("      {}", error);
        }
    }
    Ok(())
}

async fn run_refresh(service: &RefreshService, feed_id: Option<i64>, json: bool) -> Result<()> {
    match feed_id {
        Some(id) => {
            let refresh = service.refresh_feed(id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&refresh_json(&refresh))?);
            } else {
                let title = refresh.feed_info.title.as_deref().unwrap_or("(untitled)");
                println!(
                    "{}: {} entries, {} new",
                    title,
                    refresh.total_entries,
                    refresh.new_articles()
                );
                if let Some(warning) = &refresh.warning {
                    println!("Warning: {}", warning);
                }
            }
        }
        None => {
            let report = service.refresh_all().await.context("Failed to load active feeds")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Refreshed {} feeds: {} ok, {} failed, {} new articles",
                    report.total_feeds,
                    report.successful_feeds,
                    report.failed_feeds,
                    report.total_new_articles
                );
                for failure in &report.errors {
                    println!("  [{}] {}: {}", failure.feed_id, failure.feed_title, failure.error);
                }
            }
        }
    }
    Ok(())
}

fn refresh_json(refresh: &FeedRefresh) -> serde_json::Value {
    serde_json::json!({
        "feed_id": refresh.feed_id,
        "feed": {
            "title": refresh.feed_info.title,
            "description": refresh.feed_info.description,
            "link": refresh.feed_info.link,
            "language": refresh.feed_info.language,
            "last_build_date": refresh.feed_info.last_build_date.map(|d| d.to_rfc3339()),
        },
        "total_entries": refresh.total_entries,
        "new_articles": refresh.new_article_ids,
        "warning": refresh.warning.as_ref().map(ToString::to_string),
    })
}
