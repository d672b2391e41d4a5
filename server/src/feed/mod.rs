//! Feeds service shell around the broadcaster: feed storage, ingestion of
//! new posts, and the pull and live HTTP endpoints.

pub mod handlers;
pub mod ingest;
pub mod models;
pub mod service;
pub mod store;
