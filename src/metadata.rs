use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    direct::{self, DIRECT_SELECTOR, DirectFile, ORIGINAL_LABEL},
    error::ApiError,
    extractor::{self, ExtractorError, ExtractorInfo, platform_flags, uses_cookies},
    platform::{self, Platform},
    reconcile::{QualityOption, reconcile},
};

const UNTITLED: &str = "Untitled";

/// Answer of `/api/info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    pub title: String,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub platform: String,
    pub is_direct: bool,
    pub formats: Vec<QualityOption>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
}

impl MediaInfo {
    fn from_extractor(platform: Platform, info: ExtractorInfo) -> Self {
        let platform = match (platform, &info.extractor_key) {
            (Platform::Direct, Some(key)) => key.to_ascii_lowercase(),
            (classified, _) => classified.as_str().to_string(),
        };

        Self {
            title: info.title.unwrap_or_else(|| UNTITLED.to_string()),
            thumbnail: info.thumbnail,
            duration: info.duration,
            platform,
            is_direct: false,
            formats: reconcile(&info.formats),
            uploader: info.uploader.or(info.channel),
            view_count: info.view_count,
        }
    }
}

impl From<DirectFile> for MediaInfo {
    fn from(file: DirectFile) -> Self {
        Self {
            formats: vec![QualityOption {
                selector: DIRECT_SELECTOR.to_string(),
                container_ext: file.ext,
                label: ORIGINAL_LABEL.to_string(),
                size_bytes: file.size_bytes,
            }],
            title: file.filename,
            thumbnail: None,
            duration: None,
            platform: Platform::Direct.as_str().to_string(),
            is_direct: true,
            uploader: None,
            view_count: None,
        }
    }
}

/// Resolves a URL into its title and quality menu. Extractor problems are
/// never surfaced: the URL is then treated as a plain file and probed.
pub async fn fetch_info(
    config: &Config,
    http: &reqwest::Client,
    url: &str,
) -> Result<MediaInfo, ApiError> {
    let platform = platform::classify(url);
    let flags = platform_flags(config, platform);

    let mut extracted = extract(config, url, &flags).await;
    if extracted.is_none() && uses_cookies(&flags) {
        info!("Retrying {url} without browser cookies");
        extracted = extract(config, url, &[]).await;
    }

    if let Some(info) = extracted {
        let media = MediaInfo::from_extractor(platform, info);
        info!(
            "Resolved {url} as {} with {} option(s)",
            media.platform,
            media.formats.len()
        );
        return Ok(media);
    }

    let file = direct::probe(http, url, config.probe_timeout).await?;
    info!("Treating {url} as a direct file ({})", file.content_type);
    Ok(MediaInfo::from(file))
}

async fn extract(config: &Config, url: &str, flags: &[String]) -> Option<ExtractorInfo> {
    match extractor::dump_info(config, url, flags).await {
        Ok(info) => Some(info),
        Err(ExtractorError::Generic) => {
            debug!("No dedicated extractor for {url}");
            None
        }
        Err(error) => {
            warn!("yt-dlp could not read {url}: {error}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        http::{StatusCode, header::CONTENT_TYPE},
        routing::get,
    };

    use super::*;
    use crate::test_support;

    async fn file_server() -> String {
        let router = Router::new().route(
            "/files/{name}",
            get(|| async { ([(CONTENT_TYPE, "video/mp4")], "0123456789") }),
        );
        format!("http://{}", test_support::serve(router).await)
    }

    #[test]
    fn extractor_document_becomes_media_info() {
        let info = extractor::parse_info(test_support::YOUTUBE_INFO_JSON.as_bytes()).unwrap();
        let media = MediaInfo::from_extractor(Platform::Youtube, info);

        assert_eq!(media.title, "Big Buck Bunny");
        assert_eq!(media.platform, "youtube");
        assert!(!media.is_direct);
        assert_eq!(media.uploader.as_deref(), Some("Blender"));
        assert_eq!(media.view_count, Some(1_234_567));
        assert_eq!(
            media
                .formats
                .iter()
                .map(|option| (option.selector.as_str(), option.label.as_str()))
                .collect::<Vec<_>>(),
            vec![
                ("137+140", "1080p"),
                ("bestaudio[ext=m4a]/bestaudio", "Audio only")
            ]
        );
        assert_eq!(media.formats[0].size_bytes, Some(93_400_000));
    }

    #[test]
    fn unclassified_urls_take_extractor_platform() {
        let info = ExtractorInfo {
            extractor_key: Some("Streamable".to_string()),
            ..ExtractorInfo::default()
        };
        let media = MediaInfo::from_extractor(Platform::Direct, info);
        assert_eq!(media.platform, "streamable");
        assert_eq!(media.title, "Untitled");
        assert_eq!(media.formats, vec![QualityOption::best()]);
    }

    #[test]
    fn serializes_wire_shape() {
        let media = MediaInfo::from(DirectFile {
            filename: "movie.mp4".to_string(),
            content_type: "video/mp4".to_string(),
            ext: "mp4".to_string(),
            size_bytes: Some(42),
        });

        assert_eq!(
            serde_json::to_value(&media).unwrap(),
            serde_json::json!({
                "title": "movie.mp4",
                "thumbnail": null,
                "duration": null,
                "platform": "direct",
                "is_direct": true,
                "formats": [
                    {"id": "direct", "ext": "mp4", "quality": "Original", "filesize": 42}
                ],
                "uploader": null,
                "view_count": null
            })
        );
    }

    #[tokio::test]
    async fn without_extractor_falls_back_to_probe() {
        let base = file_server().await;
        let config = Config::for_tests(None, std::env::temp_dir());

        let media = fetch_info(
            &config,
            &reqwest::Client::new(),
            &format!("{base}/files/trailer.mp4?download=1"),
        )
        .await
        .unwrap();
        assert!(media.is_direct);
        assert_eq!(media.title, "trailer.mp4");
        assert_eq!(media.platform, "direct");
        assert_eq!(media.formats[0].selector, "direct");
        assert_eq!(media.formats[0].container_ext, "mp4");
    }

    #[tokio::test]
    async fn probe_failure_is_the_only_visible_error() {
        let base = file_server().await;
        let config = Config::for_tests(None, std::env::temp_dir());

        let error = fetch_info(&config, &reqwest::Client::new(), &format!("{base}/nothing"))
            .await
            .unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert!(error.message.starts_with("Could not fetch URL info"));
    }

    #[cfg(unix)]
    fn recording_stub(dir: &std::path::Path, on_success: &str) -> std::path::PathBuf {
        let log = dir.join("calls.log");
        test_support::write_script(
            dir,
            "yt-dlp",
            &format!(
                "echo \"$@\" >> '{log}'\n\
                 for arg in \"$@\"; do\n\
                 if [ \"$arg\" = \"--cookies-from-browser\" ]; then\n\
                 echo 'ERROR: could not find chrome cookies database' >&2\n\
                 exit 1\n\
                 fi\n\
                 done\n\
                 {on_success}",
                log = log.display()
            ),
        )
    }

    #[cfg(unix)]
    fn calls(dir: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(ToString::to_string)
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cookie_failure_retries_once_without_cookies() {
        let dir = test_support::temp_dir();
        let script = recording_stub(
            &dir,
            &format!("cat <<'JSON'\n{}\nJSON", test_support::YOUTUBE_INFO_JSON),
        );
        let config = Config::for_tests(Some(script), dir.clone());

        let media = fetch_info(
            &config,
            &reqwest::Client::new(),
            "https://www.instagram.com/reel/Cxyz/",
        )
        .await
        .unwrap();
        assert_eq!(media.platform, "instagram");
        assert_eq!(media.title, "Big Buck Bunny");

        let calls = calls(&dir);
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("--cookies-from-browser chrome"));
        assert!(!calls[1].contains("--cookies-from-browser"));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn generic_extractor_falls_through_to_probe_without_retry() {
        let dir = test_support::temp_dir();
        let script = recording_stub(
            &dir,
            "echo '{\"title\": \"trailer\", \"extractor_key\": \"Generic\"}'",
        );
        let config = Config::for_tests(Some(script), dir.clone());
        let base = file_server().await;

        let media = fetch_info(
            &config,
            &reqwest::Client::new(),
            &format!("{base}/files/trailer.mp4"),
        )
        .await
        .unwrap();
        assert!(media.is_direct);
        assert_eq!(media.formats[0].label, "Original");
        assert_eq!(calls(&dir).len(), 1);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn youtube_failure_is_not_retried() {
        let dir = test_support::temp_dir();
        let script = recording_stub(&dir, "echo 'ERROR: Video unavailable' >&2\nexit 1");
        let config = Config::for_tests(Some(script), dir.clone());

        // The probe then fails too: nothing answers on port 9.
        let error = fetch_info(
            &config,
            &reqwest::Client::new(),
            "http://127.0.0.1:9/watch?v=youtube.com",
        )
        .await
        .unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);

        let calls = calls(&dir);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("youtube:player_client=android_vr"));

        std::fs::remove_dir_all(dir).unwrap();
    }
}
