mod articles;
mod feeds;
mod schema;
mod types;

pub use schema::Database;
pub use types::{
    Article, ArticleCandidate, DatabaseError, Feed, FetchStatus, NewFeed,
    DEFAULT_UPDATE_FREQUENCY, UPDATE_FREQUENCY_RANGE,
};
