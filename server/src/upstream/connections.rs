use serde::Deserialize;

use super::UpstreamClients;

#[derive(Debug, Default, Deserialize)]
struct UserFollowers {
    #[serde(default)]
    followers: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UserFollowings {
    #[serde(default)]
    followings: Vec<String>,
}

impl UpstreamClients {
    /// Users following `user`. Empty on any upstream failure.
    pub async fn followers(&self, user: &str) -> Vec<String> {
        match self
            .get_json::<UserFollowers>(&self.connections_url, &["api", "v1", "connections", user])
            .await
        {
            Ok(body) => body.followers,
            Err(e) => {
                tracing::warn!(user = %user, error = %e, "Failed to get user followers");
                Vec::new()
            }
        }
    }

    /// Users `user` follows. Empty on any upstream failure.
    pub async fn followings(&self, user: &str) -> Vec<String> {
        match self
            .get_json::<UserFollowings>(
                &self.connections_url,
                &["api", "v1", "connections", user, "followings"],
            )
            .await
        {
            Ok(body) => body.followings,
            Err(e) => {
                tracing::warn!(user = %user, error = %e, "Failed to get user followings");
                Vec::new()
            }
        }
    }
}
