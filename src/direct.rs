use std::time::Duration;

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use tracing::{info, warn};
use url::Url;

use crate::{download::build_content_disposition, error::ApiError};

pub const DIRECT_SELECTOR: &str = "direct";
pub const ORIGINAL_LABEL: &str = "Original";
const FALLBACK_FILENAME: &str = "file";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// What a HEAD probe learned about a plain file URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectFile {
    pub filename: String,
    pub content_type: String,
    pub ext: String,
    pub size_bytes: Option<u64>,
}

impl DirectFile {
    pub fn from_headers(url: &str, headers: &HeaderMap) -> Self {
        let filename = filename_from_url(url);
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
        let ext = extension_of(&filename)
            .or_else(|| content_type.split('/').nth(1).map(ToString::to_string))
            .unwrap_or_default();
        let size_bytes = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());

        Self {
            filename,
            content_type,
            ext,
            size_bytes,
        }
    }
}

/// Last path segment of the URL, percent-decoded, ignoring query and fragment.
pub fn filename_from_url(url: &str) -> String {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(ToString::to_string),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .map(ToString::to_string),
    };

    segment
        .map(|raw| {
            urlencoding::decode(&raw)
                .map(|decoded| decoded.into_owned())
                .unwrap_or(raw)
        })
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

fn extension_of(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }

    Some(ext.to_ascii_lowercase())
}

pub async fn probe(
    http: &reqwest::Client,
    url: &str,
    ceiling: Duration,
) -> Result<DirectFile, ApiError> {
    let response = http
        .head(url)
        .timeout(ceiling)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|error| {
            warn!("HEAD probe failed for {url}: {error}");
            ApiError::bad_request(format!("Could not fetch URL info: {error}"))
        })?;

    Ok(DirectFile::from_headers(url, response.headers()))
}

/// Proxies the remote file chunk by chunk. Failures before the first byte
/// become a 502; later failures abort the body.
pub async fn stream(http: &reqwest::Client, url: &str) -> Result<Response, ApiError> {
    let response = http
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|error| {
            warn!("Direct transfer failed for {url}: {error}");
            ApiError::bad_gateway(format!("Could not download file: {error}"))
        })?;

    let filename = filename_from_url(url);
    info!("Streaming direct file {filename}");

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(FALLBACK_CONTENT_TYPE));
    if let Some(length) = response.content_length() {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );

    Ok((headers, Body::from_stream(response.bytes_stream())).into_response())
}
