use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio_stream::{Stream, StreamExt};

use crate::feed::models::FeedResponse;
use crate::feed::service;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default)]
    pub page: i64,
}

/// GET /api/v1/feeds/{user}?page=N: one page of the user's materialized feed.
/// Negative pages are read as page 0.
///
/// The response carries an `ETag` computed over the body. A request whose
/// `If-None-Match` names the current tag gets `304 Not Modified`, so clients
/// re-fetching after every live event skip unchanged pages.
pub async fn get_user_feed(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Query(query): Query<FeedQuery>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let page = query.page.clamp(0, u32::MAX as i64) as u32;

    let posts = service::get_feed(&state.db, &state.upstream, &user, page)
        .await
        .map_err(|e| {
            tracing::error!(user = %user, page, "Failed to read feed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read feed".to_string())
        })?;

    let body = serde_json::to_vec(&FeedResponse { posts }).map_err(|e| {
        tracing::error!(user = %user, page, "Failed to encode feed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read feed".to_string())
    })?;

    let etag = body_etag(&body);
    if if_none_match(&headers, &etag) {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
    }

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::ETAG, etag),
        ],
        body,
    )
        .into_response())
}

/// Strong entity tag for a response body.
fn body_etag(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// Whether the request's `If-None-Match` header lists `etag` (or `*`).
/// Weak validators compare equal to their strong form.
fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|tag| tag.trim())
        .any(|tag| tag == "*" || tag.strip_prefix("W/").unwrap_or(tag) == etag)
}

/// GET /api/v1/feeds/{user}/sse: live feed notifications.
///
/// Each new post in the user's feed arrives as an event with `id: <postId>`
/// and data `{"id": <postId>}`. The stream ends when the channel's
/// keep-alive expires or the server shuts down; the client reconnects.
pub async fn feed_events(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = state.broadcaster.subscribe(&user);
    tracing::info!(
        user = %subscription.key(),
        channel = %subscription.id(),
        "Live feed opened"
    );

    let stream = subscription
        .into_stream()
        .map(|event| Event::default().id(event.sse_id()).json_data(&event));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.sse_ping_interval))
}
