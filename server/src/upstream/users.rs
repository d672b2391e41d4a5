use crate::feed::models::User;

use super::UpstreamClients;

impl UpstreamClients {
    /// Fetch a user profile. `None` when the user is unknown or the service fails.
    pub async fn user(&self, user_id: &str) -> Option<User> {
        tracing::debug!(user = %user_id, "Fetching user details");
        match self
            .get_json::<User>(&self.users_url, &["api", "v1", "users", user_id])
            .await
        {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(user = %user_id, error = %e, "Failed to get user");
                None
            }
        }
    }
}
