use std::time::Duration;

use tokio::net::TcpListener;

use yatc_feeds::broadcast::Broadcaster;
use yatc_feeds::config::{generate_config_template, Config};
use yatc_feeds::upstream::UpstreamClients;
use yatc_feeds::{db, feed, routes, shutdown, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("yatc_feeds=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter).init();
    }

    tracing::info!("yatc feeds v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;
    let upstream = UpstreamClients::new(&config.upstream)?;
    let broadcaster = Broadcaster::new(config.broadcast.settings());

    let settings = broadcaster.settings();
    tracing::info!(
        keep_alive_secs = settings.keep_alive.as_secs(),
        delivery_timeout_ms = settings.delivery_timeout.as_millis() as u64,
        channel_capacity = settings.channel_capacity,
        "Live feed broadcaster ready"
    );

    // Ingestion worker: stores each new post and fans it out
    let (post_tx, post_rx) = feed::ingest::new_post_queue();
    let listener_handle = feed::ingest::spawn_post_listener(
        db.clone(),
        upstream.clone(),
        broadcaster.clone(),
        post_rx,
    );

    let app_state = state::AppState {
        db,
        broadcaster: broadcaster.clone(),
        upstream,
        post_tx,
        sse_ping_interval: config.broadcast.sse_ping_interval(),
    };

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    // Live streams never end on their own; close them so the graceful
    // shutdown can finish.
    let shutdown_broadcaster = broadcaster.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = shutdown::wait_for_shutdown_signal().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
            shutdown_broadcaster.shutdown();
        })
        .await?;

    // The router (and its queue sender) is gone; let the worker drain.
    match tokio::time::timeout(Duration::from_secs(5), listener_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Post listener task join error: {}", e),
        Err(_) => tracing::warn!("Post listener did not drain in time"),
    }
    broadcaster.shutdown();

    tracing::info!("yatc feeds stopped");
    Ok(())
}
