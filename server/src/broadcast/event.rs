use chrono::{DateTime, Utc};
use serde::Serialize;

/// Notification pushed to live-feed clients when a post lands in their feed.
///
/// Only the post id goes over the wire; clients re-fetch the feed page to get
/// the actual content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedEvent {
    pub id: i64,
    #[serde(skip)]
    pub delivered_at: DateTime<Utc>,
}

impl FeedEvent {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            delivered_at: Utc::now(),
        }
    }

    /// Value of the SSE `id:` field for this event.
    pub fn sse_id(&self) -> String {
        self.id.to_string()
    }
}
