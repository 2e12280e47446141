//! RSS/Atom ingestion core.
//!
//! Fetches feeds, normalizes their entries into articles, stores each
//! `(feed_id, guid)` exactly once and records per-feed fetch health.

pub mod config;
pub mod feed;
pub mod storage;
pub mod util;
