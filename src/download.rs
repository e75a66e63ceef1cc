use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, SystemTime},
};

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    error::ApiError,
    extractor::{ExtractorError, platform_flags, run_ytdlp},
    platform,
    reconcile::{AUDIO_EXTRACT_EXT, DEFAULT_VIDEO_EXT},
};

pub const SCRATCH_PREFIX: &str = "linkdrop-";
const OUTPUT_TEMPLATE: &str = "%(title).80s.%(ext)s";
const DEFAULT_SELECTOR: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";
// yt-dlp leftovers of an interrupted download.
const PARTIAL_SUFFIXES: [&str; 3] = [".part", ".ytdl", ".temp"];

/// Per-download working directory. Error paths remove it with [`remove`];
/// otherwise it is removed on a blocking thread when dropped.
///
/// [`remove`]: ScratchDir::remove
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    pub async fn create(root: &Path) -> std::io::Result<Self> {
        let path = root.join(format!("{SCRATCH_PREFIX}{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(mut self) {
        self.removed = true;
        log_removal(&self.path, tokio::fs::remove_dir_all(&self.path).await);
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }

        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || log_removal(&path, std::fs::remove_dir_all(&path)));
            }
            Err(_) => log_removal(&path, std::fs::remove_dir_all(&path)),
        }
    }
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!("Removed scratch dir {}", path.display()),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => warn!("Could not remove scratch dir {}: {error}", path.display()),
    }
}

/// The downloaded file, keeping its scratch directory alive until the
/// response body has been fully sent or dropped.
#[derive(Debug)]
pub struct ScratchFile {
    // Declared first so the handle closes before the directory is removed.
    file: tokio::fs::File,
    _scratch: ScratchDir,
}

impl AsyncRead for ScratchFile {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_read(cx, buf)
    }
}

#[derive(Debug)]
pub struct FileDownload {
    pub filename: String,
    pub content_type: &'static str,
    pub content_length: u64,
    pub body: ScratchFile,
}

impl FileDownload {
    pub fn respond(self) -> Result<Response, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(self.content_length));
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_str(&build_content_disposition(&self.filename))
                .map_err(|_| ApiError::internal("Could not build the download header."))?,
        );

        let body = Body::from_stream(ReaderStream::new(self.body));
        Ok((headers, body).into_response())
    }
}

/// Audio-only selectors (`bestaudio...` without a merge) are converted to mp3.
pub fn is_audio_request(selector: &str) -> bool {
    selector.contains("bestaudio") && !selector.contains('+')
}

pub fn build_download_args(
    config: &Config,
    url: &str,
    format_id: Option<&str>,
    scratch: &Path,
) -> Vec<String> {
    let selector = format_id.unwrap_or(DEFAULT_SELECTOR);
    let output_template = scratch.join(OUTPUT_TEMPLATE);

    let mut args = vec!["--no-playlist".to_string(), "--no-warnings".to_string()];
    args.extend(platform_flags(config, platform::classify(url)));
    args.extend([
        "-o".to_string(),
        output_template.to_string_lossy().into_owned(),
        "--merge-output-format".to_string(),
        DEFAULT_VIDEO_EXT.to_string(),
        "-f".to_string(),
        selector.to_string(),
    ]);

    if is_audio_request(selector) {
        args.extend([
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            AUDIO_EXTRACT_EXT.to_string(),
        ]);
    }

    args.push("--".to_string());
    args.push(url.to_string());
    args
}

struct Downloaded {
    filename: String,
    file: tokio::fs::File,
    content_length: u64,
}

/// Runs yt-dlp into a fresh scratch directory and opens the produced file.
/// Every error path removes the scratch directory before returning.
pub async fn download(
    config: &Config,
    url: &str,
    format_id: Option<&str>,
) -> Result<FileDownload, ApiError> {
    let scratch = ScratchDir::create(&config.scratch_root)
        .await
        .map_err(|error| {
            ApiError::internal(format!("Could not prepare a scratch directory: {error}"))
        })?;

    let result = download_into(config, url, format_id, scratch.path()).await;
    match result {
        Ok(downloaded) => Ok(FileDownload {
            content_type: content_type_for_filename(&downloaded.filename),
            filename: downloaded.filename,
            content_length: downloaded.content_length,
            body: ScratchFile {
                file: downloaded.file,
                _scratch: scratch,
            },
        }),
        Err(error) => {
            scratch.remove().await;
            Err(error)
        }
    }
}

async fn download_into(
    config: &Config,
    url: &str,
    format_id: Option<&str>,
    scratch: &Path,
) -> Result<Downloaded, ApiError> {
    let args = build_download_args(config, url, format_id, scratch);
    info!(
        "Downloading {url} with format {}",
        format_id.unwrap_or(DEFAULT_SELECTOR)
    );

    run_ytdlp(config, &args, config.download_timeout)
        .await
        .map_err(download_error)?;

    let path = locate_download(scratch)
        .await
        .map_err(|error| ApiError::internal(format!("Could not read the download: {error}")))?
        .ok_or_else(|| ApiError::internal("No file downloaded"))?;

    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .unwrap_or_else(|| "download.bin".to_string());
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|error| ApiError::internal(format!("Could not open the download: {error}")))?;
    let content_length = file
        .metadata()
        .await
        .map_err(|error| ApiError::internal(format!("Could not read the download: {error}")))?
        .len();

    info!("Downloaded {filename} ({content_length} bytes)");

    Ok(Downloaded {
        filename,
        file,
        content_length,
    })
}

fn download_error(error: ExtractorError) -> ApiError {
    warn!("Download failed: {error}");

    match error {
        ExtractorError::TimedOut(ceiling) => {
            let minutes = ceiling.as_secs().div_ceil(60).max(1);
            ApiError::gateway_timeout(format!("Download timed out ({minutes} min limit)"))
        }
        ExtractorError::Failed { stderr, .. } => {
            ApiError::internal(format!("Download failed: {stderr}"))
        }
        other => ApiError::internal(format!("Download failed: {other}")),
    }
}

/// First finished regular file in the scratch directory, by name.
async fn locate_download(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut candidates = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }

        let path = entry.path();
        let name = path.to_string_lossy();
        if PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            continue;
        }
        candidates.push(path);
    }

    candidates.sort();
    Ok(candidates.into_iter().next())
}

/// Removes scratch directories left behind by a previous process.
pub async fn sweep_stale_scratch(root: &Path, older_than: Duration) {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not open scratch root for cleanup: {error}");
            }
            return;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0usize;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("Could not iterate scratch root for cleanup: {error}");
                break;
            }
        };

        let path = entry.path();
        let is_scratch = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(SCRATCH_PREFIX));
        if !is_scratch {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_dir() => metadata,
            Ok(_) => continue,
            Err(error) => {
                warn!("Could not read metadata of {:?}: {error}", path);
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < older_than {
            continue;
        }

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("Could not remove stale scratch dir {:?}: {error}", path),
        }
    }

    if removed > 0 {
        info!("Removed {removed} stale scratch dir(s) from {}", root.display());
    }
}

pub fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "opus" => "audio/opus",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// RFC 5987 attachment header with an ASCII fallback name.
pub fn build_content_disposition(filename: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitize_ascii_filename(filename),
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric()
                || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
            {
                character
            } else {
                '_'
            }
        })
        .collect::<String>();

    match sanitized.trim() {
        "" => "download.bin".to_string(),
        compact => compact.to_string(),
    }
}
