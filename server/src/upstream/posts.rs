use crate::feed::models::PostSummary;

use super::UpstreamClients;

impl UpstreamClients {
    /// Fetch a post from the posts service. `None` on any upstream failure.
    pub async fn post(&self, post_id: i64) -> Option<PostSummary> {
        tracing::debug!(post_id, "Fetching post");
        let id = post_id.to_string();
        match self
            .get_json::<PostSummary>(&self.posts_url, &["api", "v1", "posts", &id])
            .await
        {
            Ok(post) => Some(post),
            Err(e) => {
                tracing::warn!(post_id, error = %e, "Failed to get post");
                None
            }
        }
    }
}
