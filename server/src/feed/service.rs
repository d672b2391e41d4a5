//! Feed ingestion and feed reads.

use futures_util::future::join_all;

use crate::broadcast::{Broadcaster, FeedEvent, PublishReport};
use crate::db::DbPool;
use crate::feed::models::{Post, PostSummary};
use crate::feed::store;
use crate::upstream::UpstreamClients;

/// Entries per feed page.
pub const FEED_PAGE_SIZE: usize = 10;

/// Store a new post in the feed and notify the live clients of its author
/// and followers.
///
/// The author is always the first target so their own open tabs refresh too.
/// A post that was already stored is still broadcast. Storage and follower
/// lookup failures are logged and never stop the broadcast.
pub async fn ingest_post(
    db: &DbPool,
    upstream: &UpstreamClients,
    broadcaster: &Broadcaster,
    post: PostSummary,
) -> PublishReport {
    tracing::info!(post_id = post.id, author = %post.author, "Received post");

    let db = db.clone();
    let summary = post.clone();
    match tokio::task::spawn_blocking(move || store::save_post(&db, &summary)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::error!(post_id = post.id, "Failed to save post: {}", e),
        Err(e) => tracing::error!(post_id = post.id, "Save post task join error: {}", e),
    }

    let mut targets = vec![post.author.clone()];
    targets.extend(upstream.followers(&post.author).await);

    let report = broadcaster.publish(&targets, &FeedEvent::new(post.id)).await;
    tracing::debug!(
        post_id = post.id,
        targets = targets.len(),
        delivered = report.delivered,
        pruned = report.pruned,
        "Post broadcast"
    );
    report
}

/// Page `page` of `user`'s feed: their own posts plus the posts of everyone
/// they follow, newest first, hydrated through the posts and users services.
///
/// Entries whose post or author cannot be fetched are skipped.
pub async fn get_feed(
    db: &DbPool,
    upstream: &UpstreamClients,
    user: &str,
    page: u32,
) -> Result<Vec<Post>, String> {
    let mut authors = upstream.followings(user).await;
    tracing::debug!(user = %user, ?authors, "Resolved followed authors");
    authors.push(user.to_string());

    let db = db.clone();
    let items = tokio::task::spawn_blocking(move || {
        store::find_from_authors(&db, &authors, page, FEED_PAGE_SIZE)
    })
    .await
    .map_err(|e| format!("Task join: {}", e))??;

    let posts = join_all(items.iter().map(|item| hydrate_post(upstream, item.post))).await;
    Ok(posts.into_iter().flatten().collect())
}

async fn hydrate_post(upstream: &UpstreamClients, post_id: i64) -> Option<Post> {
    let summary = upstream.post(post_id).await?;
    let author = upstream.user(&summary.author).await?;
    Some(Post {
        id: summary.id,
        author,
        created: summary.created,
        content: summary.content,
    })
}
