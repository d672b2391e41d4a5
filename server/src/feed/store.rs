//! Feed entry storage (SQLite).
//!
//! One row per post: `(post, author, created)`. Timestamps are stored as
//! fixed-width UTC RFC 3339 text so that lexical order is time order.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;

use crate::db::models::FeedItem;
use crate::db::DbPool;
use crate::feed::models::PostSummary;

fn format_created(created: &DateTime<Utc>) -> String {
    created.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Insert a feed entry for `post` unless one already exists.
///
/// Returns `Ok(true)` if the entry was inserted, `Ok(false)` if the post had
/// already been received.
pub fn save_post(db: &DbPool, post: &PostSummary) -> Result<bool, String> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO feed_items (post, author, created) VALUES (?1, ?2, ?3)",
            rusqlite::params![post.id, post.author, format_created(&post.created)],
        )
        .map_err(|e| format!("Failed to insert feed item: {}", e))?;

    if inserted == 0 {
        tracing::warn!(post_id = post.id, "Post already received");
        return Ok(false);
    }

    tracing::info!(post_id = post.id, author = %post.author, "Saved post to feed");
    Ok(true)
}

/// Most recent feed entries written by any of `authors`, newest first.
///
/// `page` is zero-based; each page holds `page_size` entries.
pub fn find_from_authors(
    db: &DbPool,
    authors: &[String],
    page: u32,
    page_size: usize,
) -> Result<Vec<FeedItem>, String> {
    if authors.is_empty() || page_size == 0 {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; authors.len()].join(", ");
    let sql = format!(
        "SELECT post, author, created FROM feed_items
         WHERE author IN ({})
         ORDER BY created DESC, post DESC
         LIMIT {} OFFSET {}",
        placeholders,
        page_size,
        page as usize * page_size
    );

    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| format!("Failed to prepare feed query: {}", e))?;

    let items = stmt
        .query_map(rusqlite::params_from_iter(authors.iter()), |row| {
            let created: String = row.get(2)?;
            let created = DateTime::parse_from_rfc3339(&created)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?
                .with_timezone(&Utc);
            Ok(FeedItem {
                post: row.get(0)?,
                author: row.get(1)?,
                created,
            })
        })
        .map_err(|e| format!("Failed to query feed items: {}", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("Failed to read feed item: {}", e))?;

    Ok(items)
}
