use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{info, warn};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_COOKIES_BROWSER: &str = "chrome";
// android_vr returns the full DASH list (144p to 4K) without a PO token.
const DEFAULT_YOUTUBE_CLIENT: &str = "android_vr";
const DEFAULT_INFO_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_DOWNLOAD_TIMEOUT_SECONDS: u64 = 300;
const DEFAULT_PROBE_TIMEOUT_SECONDS: u64 = 10;

/// Process-wide settings, read once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Resolved yt-dlp executable; `None` when it could not be found, in which
    /// case only direct-file URLs can be served.
    pub ytdlp_path: Option<PathBuf>,
    pub cookies_browser: Option<String>,
    pub youtube_client: String,
    pub info_timeout: Duration,
    pub download_timeout: Duration,
    pub probe_timeout: Duration,
    pub scratch_root: PathBuf,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let cookies_browser = match std::env::var("COOKIES_BROWSER") {
            Ok(value) => non_empty(&value).map(ToString::to_string),
            Err(_) => Some(DEFAULT_COOKIES_BROWSER.to_string()),
        };

        Self {
            bind_addr: resolve_bind_addr(),
            ytdlp_path: discover_ytdlp(),
            cookies_browser,
            youtube_client: read_string_env("YT_PLAYER_CLIENT")
                .unwrap_or_else(|| DEFAULT_YOUTUBE_CLIENT.to_string()),
            info_timeout: read_seconds_env("INFO_TIMEOUT_SECONDS", DEFAULT_INFO_TIMEOUT_SECONDS),
            download_timeout: read_seconds_env(
                "DOWNLOAD_TIMEOUT_SECONDS",
                DEFAULT_DOWNLOAD_TIMEOUT_SECONDS,
            ),
            probe_timeout: read_seconds_env("PROBE_TIMEOUT_SECONDS", DEFAULT_PROBE_TIMEOUT_SECONDS),
            scratch_root: read_string_env("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            cors_origins: parse_origins(std::env::var("CORS_ORIGINS").ok().as_deref()),
        }
    }

    pub fn log_summary(&self) {
        match &self.ytdlp_path {
            Some(path) => info!("yt-dlp: {}", path.display()),
            None => warn!(
                "yt-dlp not found. Install it with `pip install yt-dlp` or set YTDLP_PATH; only direct files will be served."
            ),
        }
        match &self.cookies_browser {
            Some(browser) => info!("Browser cookies for social platforms: {browser}"),
            None => info!("Browser cookies disabled (COOKIES_BROWSER is empty)."),
        }
        info!(
            "Timeouts: info={}s download={}s probe={}s; scratch dir {}",
            self.info_timeout.as_secs(),
            self.download_timeout.as_secs(),
            self.probe_timeout.as_secs(),
            self.scratch_root.display()
        );
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests(ytdlp_path: Option<PathBuf>, scratch_root: PathBuf) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            ytdlp_path,
            cookies_browser: Some(DEFAULT_COOKIES_BROWSER.to_string()),
            youtube_client: DEFAULT_YOUTUBE_CLIENT.to_string(),
            info_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            scratch_root,
            cors_origins: Vec::new(),
        }
    }
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = read_string_env("APP_ADDR") {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

fn parse_origins(raw: Option<&str>) -> Vec<String> {
    let origins = raw
        .unwrap_or("*")
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(ToString::to_string)
        .collect::<Vec<_>>();

    if origins.iter().any(|origin| origin == "*") {
        Vec::new()
    } else {
        origins
    }
}

fn ytdlp_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    }
}

/// Resolves the yt-dlp executable: explicit `YTDLP_PATH`, then `PATH`, then
/// the usual pip/Homebrew install locations.
fn discover_ytdlp() -> Option<PathBuf> {
    if let Some(explicit) = read_string_env("YTDLP_PATH") {
        let path = PathBuf::from(explicit);
        if !path.is_file() {
            warn!("YTDLP_PATH points to {:?}, which does not exist.", path);
        }
        return Some(path);
    }

    let binary = ytdlp_binary_name();
    let search_path = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
        .unwrap_or_default();

    search_path
        .into_iter()
        .chain(well_known_install_dirs())
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable_file(candidate))
}

fn well_known_install_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
    ];

    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        dirs.push(home.join(".local/bin"));
        for minor in 9..=13 {
            dirs.push(home.join(format!("Library/Python/3.{minor}/bin")));
        }
    }

    dirs
}

fn is_executable_file(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        path.metadata()
            .is_ok_and(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
    }

    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
}

fn read_seconds_env(name: &str, default: u64) -> Duration {
    let seconds = std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default);

    Duration::from_secs(seconds)
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_origins_allow_any() {
        assert!(parse_origins(None).is_empty());
        assert!(parse_origins(Some("*")).is_empty());
        assert!(parse_origins(Some("https://a.example, *")).is_empty());
    }

    #[test]
    fn explicit_origins_are_trimmed() {
        assert_eq!(
            parse_origins(Some(" https://linkdrop.app ,http://localhost:5173,, ")),
            vec![
                "https://linkdrop.app".to_string(),
                "http://localhost:5173".to_string()
            ]
        );
    }

    #[test]
    fn blank_values_are_absent() {
        assert_eq!(non_empty("  "), None);
        assert_eq!(non_empty(" chrome "), Some("chrome"));
    }

    #[cfg(unix)]
    #[test]
    fn only_executable_files_qualify() {
        use std::os::unix::fs::PermissionsExt;

        let dir = crate::test_support::temp_dir();
        let plain = dir.join("yt-dlp-plain");
        std::fs::write(&plain, "#!/bin/sh\n").unwrap();
        assert!(!is_executable_file(&plain));

        std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(is_executable_file(&plain));
        assert!(!is_executable_file(&dir));

        std::fs::remove_dir_all(dir).unwrap();
    }
}
