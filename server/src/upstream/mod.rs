//! HTTP clients for the sibling services the feed reads from.
//!
//! Every lookup is fail-soft: errors are logged and turned into an empty
//! result so that ingestion and feed reads keep working while a dependency
//! is down.

pub mod connections;
pub mod posts;
pub mod users;

use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;

use crate::config::UpstreamConfig;

/// Errors that can occur while calling a sibling service.
#[derive(Debug)]
pub enum UpstreamError {
    /// Configured base URL cannot carry path segments
    InvalidUrl(String),
    /// Transport failure, timeout, non-2xx status or undecodable body
    Http(reqwest::Error),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUrl(e) => write!(f, "Invalid upstream URL: {}", e),
            Self::Http(e) => write!(f, "Upstream request failed: {}", e),
        }
    }
}

impl std::error::Error for UpstreamError {}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

/// Shared client for the connections, posts and users services.
#[derive(Debug, Clone)]
pub struct UpstreamClients {
    http: reqwest::Client,
    connections_url: String,
    posts_url: String,
    users_url: String,
}

impl UpstreamClients {
    pub fn new(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            connections_url: config.connections_url.clone(),
            posts_url: config.posts_url.clone(),
            users_url: config.users_url.clone(),
        })
    }

    /// GET `base/segments...` and decode the JSON body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        base: &str,
        segments: &[&str],
    ) -> Result<T, UpstreamError> {
        let url = endpoint(base, segments)?;
        let body = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await?;
        Ok(body)
    }
}

/// Append percent-encoded path segments to a base URL.
fn endpoint(base: &str, segments: &[&str]) -> Result<Url, UpstreamError> {
    let mut url = Url::parse(base).map_err(|e| UpstreamError::InvalidUrl(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| UpstreamError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
