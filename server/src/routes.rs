use axum::{
    routing::{get, post},
    Router,
};

use crate::feed::{handlers as feed_handlers, ingest};
use crate::state::AppState;

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    let feed_routes = Router::new()
        .route("/api/v1/feeds", post(ingest::receive_post))
        .route("/api/v1/feeds/{user}", get(feed_handlers::get_user_feed))
        .route("/api/v1/feeds/{user}/sse", get(feed_handlers::feed_events));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(feed_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
