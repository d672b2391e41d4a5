//! New-post ingestion: HTTP intake plus the background worker that stores
//! posts and fans them out.

use axum::{extract::State, http::StatusCode, Json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::broadcast::Broadcaster;
use crate::db::DbPool;
use crate::feed::models::PostSummary;
use crate::feed::service;
use crate::state::AppState;
use crate::upstream::UpstreamClients;

/// Create the ingestion queue. The sender goes into `AppState`, the receiver
/// into [`spawn_post_listener`].
pub fn new_post_queue() -> (
    mpsc::UnboundedSender<PostSummary>,
    mpsc::UnboundedReceiver<PostSummary>,
) {
    mpsc::unbounded_channel()
}

/// Spawn the worker draining the ingestion queue.
///
/// Posts are handled one at a time in arrival order. The task ends when
/// every sender has been dropped.
pub fn spawn_post_listener(
    db: DbPool,
    upstream: UpstreamClients,
    broadcaster: Broadcaster,
    mut rx: mpsc::UnboundedReceiver<PostSummary>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(post) = rx.recv().await {
            service::ingest_post(&db, &upstream, &broadcaster, post).await;
        }
        tracing::info!("Post listener stopped");
    })
}

/// POST /api/v1/feeds: queue a new post for storage and fan-out.
/// Body: { "id": 42, "author": "alice", "created": "2019-05-01T12:00:00Z", "content": "..." }
pub async fn receive_post(
    State(state): State<AppState>,
    Json(post): Json<PostSummary>,
) -> Result<StatusCode, (StatusCode, String)> {
    let post_id = post.id;
    state.post_tx.send(post).map_err(|_| {
        tracing::error!(post_id, "Post listener is not running");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Post ingestion unavailable".to_string(),
        )
    })?;

    Ok(StatusCode::ACCEPTED)
}
