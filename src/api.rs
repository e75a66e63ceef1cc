use std::{collections::HashSet, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::{
        HeaderValue, Method,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH},
    },
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info};
use url::Url;

use crate::{
    config::{Config, non_empty},
    direct::{self, DIRECT_SELECTOR},
    download,
    error::ApiError,
    inflight::Inflight,
    metadata::{self, MediaInfo},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub inflight: Inflight<Result<MediaInfo, ApiError>>,
}

impl AppState {
    pub fn new(config: Config, http: reqwest::Client) -> Self {
        Self {
            config: Arc::new(config),
            http,
            inflight: Inflight::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InfoRequest {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    #[serde(default)]
    url: String,
    #[serde(default)]
    format_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/info", post(media_info))
        .route("/api/download", post(start_download))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

fn required_url(raw: &str) -> Result<&str, ApiError> {
    non_empty(raw).ok_or_else(|| ApiError::bad_request("A URL is required."))
}

async fn media_info(
    State(state): State<AppState>,
    Json(payload): Json<InfoRequest>,
) -> Result<Json<MediaInfo>, ApiError> {
    let url = required_url(&payload.url)?;
    let config = state.config.as_ref();
    let http = &state.http;

    state
        .inflight
        .run(url, move || metadata::fetch_info(config, http, url))
        .await
        .map(Json)
}

async fn start_download(
    State(state): State<AppState>,
    Json(payload): Json<DownloadRequest>,
) -> Result<Response, ApiError> {
    let url = required_url(&payload.url)?;
    let format_id = payload.format_id.as_deref().and_then(non_empty);

    if format_id == Some(DIRECT_SELECTOR) {
        return direct::stream(&state.http, url).await;
    }

    download::download(&state.config, url, format_id)
        .await?
        .respond()
}

pub fn build_cors_layer(config: &Config) -> Result<CorsLayer, ApiError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION, CONTENT_LENGTH]);

    if config.cors_origins.is_empty() {
        info!("CORS: any origin allowed.");
        return Ok(layer.allow_origin(Any));
    }

    let allowed_origins = config
        .cors_origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in CORS_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    info!("CORS allow-list: {:?}", allowed_origins);

    let allowed_origins = Arc::new(allowed_origins);
    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let normalized = origin.to_str().ok().and_then(normalize_origin);
        let allowed = normalized
            .as_ref()
            .is_some_and(|value| allowed_origins.contains(value));
        debug!("CORS origin {:?} allowed={}", origin, allowed);
        allowed
    });

    Ok(layer.allow_origin(allow_origin))
}

/// `scheme://host[:port]` with the host lowercased and default ports dropped.
fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    if !matches!(scheme, "http" | "https") {
        return None;
    }
    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    // `Url::port` is already `None` for the scheme's default port.
    match parsed.port() {
        Some(port) => Some(format!("{scheme}://{host}:{port}")),
        None => Some(format!("{scheme}://{host}")),
    }
}
