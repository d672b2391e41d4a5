//! JSON shapes exchanged with clients and sibling services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// New-post notification as produced by the posts service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: i64,
    pub author: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub content: String,
}

/// User profile as returned by the users service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// A feed entry hydrated with its content and author profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub author: User,
    pub created: DateTime<Utc>,
    pub content: String,
}

/// Body of `GET /api/v1/feeds/{user}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedResponse {
    pub posts: Vec<Post>,
}
