use std::time::Duration;

use tokio::sync::mpsc;

use crate::broadcast::Broadcaster;
use crate::db::DbPool;
use crate::feed::models::PostSummary;
use crate::upstream::UpstreamClients;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Live-feed subscription registry
    pub broadcaster: Broadcaster,
    /// Clients for the connections, posts and users services
    pub upstream: UpstreamClients,
    /// Queue feeding the post ingestion worker
    pub post_tx: mpsc::UnboundedSender<PostSummary>,
    /// Interval between SSE keep-alive comment frames
    pub sse_ping_interval: Duration,
}
