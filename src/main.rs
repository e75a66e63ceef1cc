mod api;
mod config;
mod descriptor;
mod direct;
mod download;
mod error;
mod extractor;
mod inflight;
mod labels;
mod metadata;
mod platform;
mod reconcile;
#[cfg(test)]
mod test_support;

use std::time::Duration;

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{api::AppState, config::Config, error::ApiError};

// Scratch dirs older than this can only belong to a process that died.
const STALE_SCRATCH_AGE: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "linkdrop=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env();
    config.log_summary();

    tokio::fs::create_dir_all(&config.scratch_root)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create scratch dir {}: {error}",
                config.scratch_root.display()
            ))
        })?;
    download::sweep_stale_scratch(&config.scratch_root, STALE_SCRATCH_AGE).await;

    // No client-wide timeout: direct transfers may legitimately run for long.
    let http = reqwest::Client::builder()
        .build()
        .map_err(|error| ApiError::internal(format!("Could not build HTTP client: {error}")))?;

    let cors = api::build_cors_layer(&config)?;
    let addr = config.bind_addr.clone();
    let app = api::router(AppState::new(config, http))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|error| ApiError::internal(format!("Could not bind {addr}: {error}")))?;

    info!("LinkDrop backend listening on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
