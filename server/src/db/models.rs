/// Database row types.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
use chrono::{DateTime, Utc};

/// One materialized feed entry: a post, who wrote it and when.
/// Post content is not stored here; it is fetched from the posts service on read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub post: i64,
    pub author: String,
    pub created: DateTime<Utc>,
}
