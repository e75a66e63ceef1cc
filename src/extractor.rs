use std::{
    io::ErrorKind,
    process::{Output, Stdio},
    time::Duration,
};

use serde::{Deserialize, Deserializer};
use tokio::{process::Command, time::timeout};
use tracing::debug;

use crate::{
    config::Config,
    descriptor::{StreamDescriptor, loose_f64, loose_text, loose_u64},
    platform::Platform,
};

const GENERIC_EXTRACTOR: &str = "Generic";
const STDERR_TAIL_CHARS: usize = 500;
pub const COOKIES_FLAG: &str = "--cookies-from-browser";

/// Subset of the yt-dlp `--dump-json` document the service uses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractorInfo {
    #[serde(default, deserialize_with = "loose_text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub thumbnail: Option<String>,
    #[serde(default, deserialize_with = "loose_f64")]
    pub duration: Option<f64>,
    #[serde(default, deserialize_with = "loose_text")]
    pub extractor_key: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub uploader: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub channel: Option<String>,
    #[serde(default, deserialize_with = "loose_u64")]
    pub view_count: Option<u64>,
    #[serde(default, deserialize_with = "formats_or_empty")]
    pub formats: Vec<StreamDescriptor>,
}

impl ExtractorInfo {
    /// yt-dlp fell back to its generic extractor: the URL is not a page it
    /// understands and is better served as an opaque file.
    pub fn is_generic(&self) -> bool {
        self.extractor_key
            .as_deref()
            .is_none_or(|key| key.eq_ignore_ascii_case(GENERIC_EXTRACTOR))
    }
}

fn formats_or_empty<'de, D>(deserializer: D) -> Result<Vec<StreamDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<StreamDescriptor>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug)]
pub enum ExtractorError {
    NotInstalled,
    Spawn(std::io::Error),
    TimedOut(Duration),
    Failed { code: Option<i32>, stderr: String },
    Malformed(String),
    Generic,
}

impl std::fmt::Display for ExtractorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInstalled => write!(f, "yt-dlp is not installed"),
            Self::Spawn(error) => write!(f, "could not run yt-dlp: {error}"),
            Self::TimedOut(ceiling) => {
                write!(f, "yt-dlp did not finish within {}s", ceiling.as_secs())
            }
            Self::Failed { code, stderr } => match code {
                Some(code) => write!(f, "yt-dlp exited with status {code}: {stderr}"),
                None => write!(f, "yt-dlp was terminated by a signal: {stderr}"),
            },
            Self::Malformed(reason) => write!(f, "unreadable yt-dlp output: {reason}"),
            Self::Generic => write!(f, "only the generic extractor matched"),
        }
    }
}

impl std::error::Error for ExtractorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(error) => Some(error),
            _ => None,
        }
    }
}

/// Extra yt-dlp flags a platform needs to expose its full format list.
pub fn platform_flags(config: &Config, platform: Platform) -> Vec<String> {
    if platform == Platform::Youtube {
        return vec![
            "--extractor-args".to_string(),
            format!("youtube:player_client={}", config.youtube_client),
        ];
    }

    match &config.cookies_browser {
        Some(browser) if platform.needs_cookies() => {
            vec![COOKIES_FLAG.to_string(), browser.clone()]
        }
        _ => Vec::new(),
    }
}

pub fn uses_cookies(flags: &[String]) -> bool {
    flags.iter().any(|flag| flag == COOKIES_FLAG)
}

/// Runs yt-dlp under a wall-clock ceiling. The child is killed if the
/// ceiling expires or the calling future is dropped.
pub async fn run_ytdlp(
    config: &Config,
    args: &[String],
    ceiling: Duration,
) -> Result<Output, ExtractorError> {
    let program = config
        .ytdlp_path
        .as_ref()
        .ok_or(ExtractorError::NotInstalled)?;
    debug!("yt-dlp {:?}", args);

    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);

    let output = timeout(ceiling, command.output())
        .await
        .map_err(|_| ExtractorError::TimedOut(ceiling))?
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ExtractorError::NotInstalled
            } else {
                ExtractorError::Spawn(error)
            }
        })?;

    if !output.status.success() {
        return Err(ExtractorError::Failed {
            code: output.status.code(),
            stderr: stderr_tail(&output.stderr),
        });
    }

    Ok(output)
}

pub async fn dump_info(
    config: &Config,
    url: &str,
    flags: &[String],
) -> Result<ExtractorInfo, ExtractorError> {
    let mut args = vec![
        "--dump-json".to_string(),
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
    ];
    args.extend(flags.iter().cloned());
    args.push("--".to_string());
    args.push(url.to_string());

    let output = run_ytdlp(config, &args, config.info_timeout).await?;
    parse_info(&output.stdout)
}

pub fn parse_info(stdout: &[u8]) -> Result<ExtractorInfo, ExtractorError> {
    let text = String::from_utf8_lossy(stdout);
    let document = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| ExtractorError::Malformed("empty output".to_string()))?;

    let info: ExtractorInfo = serde_json::from_str(document)
        .map_err(|error| ExtractorError::Malformed(error.to_string()))?;

    if info.is_generic() {
        return Err(ExtractorError::Generic);
    }

    Ok(info)
}

/// Last few hundred characters of stderr, where yt-dlp puts the actual error.
pub fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim_end();
    let skip = text.chars().count().saturating_sub(STDERR_TAIL_CHARS);

    text.chars().skip(skip).collect()
}
