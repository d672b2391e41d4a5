use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::broadcast::BroadcastSettings;

/// yatc feeds service command line.
///
/// Every field is optional: only flags (or their env vars) that were actually
/// given reach the top layer of [`Config::figment`], so values from the TOML
/// file are not masked by built-in defaults.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "yatc-feeds", version, about = "yatc feed fan-out and live-update service")]
pub struct Cli {
    /// Port to listen on [default: 8084]
    #[arg(long, env = "YATC_FEEDS_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "YATC_FEEDS_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file [default: ./yatc-feeds.toml]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Enable structured JSON logging
    #[arg(long, env = "YATC_FEEDS_JSON_LOGS")]
    #[serde(skip_serializing_if = "is_false")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "is_false")]
    pub generate_config: bool,

    /// Data directory for the feed database [default: ./data]
    #[arg(long, env = "YATC_FEEDS_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Resolved service configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub generate_config: bool,
    pub data_dir: String,

    /// Live-feed broadcaster tuning ([broadcast] section)
    #[serde(default, skip_serializing)]
    pub broadcast: BroadcastConfig,

    /// Sibling service endpoints ([upstream] section)
    #[serde(default, skip_serializing)]
    pub upstream: UpstreamConfig,
}

/// Live-feed channel lifetime and delivery limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Seconds a live-feed connection stays open before the server closes it (default: 300)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Milliseconds a publish waits on one slow subscriber before dropping it (default: 1000)
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// Events buffered per live-feed connection (default: 32)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Seconds between SSE keep-alive comment frames (default: 15)
    #[serde(default = "default_sse_ping_interval_secs")]
    pub sse_ping_interval_secs: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: default_keep_alive_secs(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            channel_capacity: default_channel_capacity(),
            sse_ping_interval_secs: default_sse_ping_interval_secs(),
        }
    }
}

impl BroadcastConfig {
    pub fn settings(&self) -> BroadcastSettings {
        BroadcastSettings {
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            delivery_timeout: Duration::from_millis(self.delivery_timeout_ms),
            channel_capacity: self.channel_capacity,
        }
    }

    pub fn sse_ping_interval(&self) -> Duration {
        Duration::from_secs(self.sse_ping_interval_secs.max(1))
    }
}

fn default_keep_alive_secs() -> u64 {
    300
}

fn default_delivery_timeout_ms() -> u64 {
    1000
}

fn default_channel_capacity() -> usize {
    32
}

fn default_sse_ping_interval_secs() -> u64 {
    15
}

/// Base URLs of the services the feed depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Connections service, answers followers/followings lookups
    #[serde(default = "default_connections_url")]
    pub connections_url: String,

    /// Posts service, answers post lookups
    #[serde(default = "default_posts_url")]
    pub posts_url: String,

    /// Users service, answers user profile lookups
    #[serde(default = "default_users_url")]
    pub users_url: String,

    /// Per-request timeout in seconds (default: 10)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connections_url: default_connections_url(),
            posts_url: default_posts_url(),
            users_url: default_users_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_connections_url() -> String {
    "http://localhost:8083".to_string()
}

fn default_posts_url() -> String {
    "http://localhost:8082".to_string()
}

fn default_users_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8084,
            bind_address: "0.0.0.0".to_string(),
            config: "./yatc-feeds.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            broadcast: BroadcastConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (YATC_FEEDS_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(Cli::parse()).extract()
    }

    pub fn figment(cli: Cli) -> Figment {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| Config::default().config);

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("YATC_FEEDS_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# yatc feeds service configuration
# Place this file at ./yatc-feeds.toml or specify with --config <path>
# All settings can be overridden via environment variables (YATC_FEEDS_PORT,
# YATC_FEEDS_BROADCAST__KEEP_ALIVE_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 8084)
# port = 8084

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging
# json_logs = false

# Data directory for the SQLite feed database
# data_dir = "./data"

# ---- Live feed (SSE) ----
# [broadcast]
# keep_alive_secs = 300        # Live connection lifetime; clients reconnect after it
# delivery_timeout_ms = 1000   # Slow subscribers are dropped after this
# channel_capacity = 32        # Events buffered per live connection
# sse_ping_interval_secs = 15  # Keep-alive comment frames

# ---- Sibling services ----
# [upstream]
# connections_url = "http://localhost:8083"
# posts_url = "http://localhost:8082"
# users_url = "http://localhost:8081"
# request_timeout_secs = 10
"#
    .to_string()
}
