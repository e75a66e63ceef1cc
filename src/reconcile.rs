//! Turns the raw `formats` list reported by yt-dlp into the quality menu shown
//! to the user.
//!
//! Sources disagree wildly on what they expose. YouTube publishes DASH
//! video-only tracks up to 4K next to a single 360p muxed legacy stream,
//! TikTok publishes combined streams in several codecs with byte-identical
//! `-0`/`-1` duplicates, X publishes muxed progressive files without codec
//! metadata next to HLS splits. Two strategies cover them:
//!
//! * split streams: pair the best audio track with the best video track of
//!   every height, merged downstream by yt-dlp (`"<video>+<audio>"`);
//! * combined streams: pick one already-muxed stream per height.
//!
//! The split strategy wins whenever it reaches a strictly taller ceiling than
//! the combined streams.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, HashMap, HashSet},
};

use serde::Serialize;
use tracing::debug;

use crate::{
    descriptor::{StreamDescriptor, StreamKind},
    labels::{codec_priority, height_to_label, label_from_identifier, label_rank},
};

pub const DEFAULT_VIDEO_EXT: &str = "mp4";
const PREFERRED_AUDIO_EXT: &str = "m4a";
pub const AUDIO_EXTRACT_EXT: &str = "mp3";

pub const AUDIO_ONLY_LABEL: &str = "Audio only";
pub const BEST_LABEL: &str = "Best";

pub const BEST_SELECTOR: &str = "best";
pub const SPLIT_AUDIO_SELECTOR: &str = "bestaudio[ext=m4a]/bestaudio";
pub const COMBINED_AUDIO_SELECTOR: &str = "bestaudio/best";

/// One row of the quality menu. Field names on the wire match what the web
/// client already consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityOption {
    #[serde(rename = "id")]
    pub selector: String,
    #[serde(rename = "ext")]
    pub container_ext: String,
    #[serde(rename = "quality")]
    pub label: String,
    #[serde(rename = "filesize")]
    pub size_bytes: Option<u64>,
}

impl QualityOption {
    pub fn best() -> Self {
        Self {
            selector: BEST_SELECTOR.to_string(),
            container_ext: DEFAULT_VIDEO_EXT.to_string(),
            label: BEST_LABEL.to_string(),
            size_bytes: None,
        }
    }

    pub fn is_audio_only(&self) -> bool {
        self.label == AUDIO_ONLY_LABEL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergePath {
    SplitStreams,
    Combined,
    Fallback,
}

/// Builds the ordered quality menu. Never returns an empty list.
pub fn reconcile(formats: &[StreamDescriptor]) -> Vec<QualityOption> {
    let mut video_only = Vec::new();
    let mut audio_only = Vec::new();
    let mut combined = Vec::new();

    for descriptor in formats
        .iter()
        .filter(|descriptor| !descriptor.format_identifier.is_empty())
    {
        match descriptor.kind() {
            Some(StreamKind::VideoOnly) => video_only.push(descriptor),
            Some(StreamKind::AudioOnly) => audio_only.push(descriptor),
            Some(StreamKind::Combined) => combined.push(descriptor),
            None => {}
        }
    }

    let path = choose_path(&video_only, &audio_only, &combined);
    debug!(
        video_only = video_only.len(),
        audio_only = audio_only.len(),
        combined = combined.len(),
        ?path,
        "reconciling formats"
    );

    let options = match path {
        MergePath::SplitStreams => split_stream_options(&video_only, &audio_only),
        MergePath::Combined => combined_options(&combined),
        MergePath::Fallback => Vec::new(),
    };

    let options = order_and_dedupe(options);
    if options.is_empty() {
        vec![QualityOption::best()]
    } else {
        options
    }
}

fn max_height(streams: &[&StreamDescriptor]) -> u32 {
    streams
        .iter()
        .filter_map(|stream| stream.height())
        .max()
        .unwrap_or_default()
}

fn choose_path(
    video_only: &[&StreamDescriptor],
    audio_only: &[&StreamDescriptor],
    combined: &[&StreamDescriptor],
) -> MergePath {
    let split_available = !video_only.is_empty() && !audio_only.is_empty();

    if split_available && (combined.is_empty() || max_height(video_only) > max_height(combined)) {
        MergePath::SplitStreams
    } else if !combined.is_empty() {
        MergePath::Combined
    } else {
        MergePath::Fallback
    }
}

/// Keeps one stream per height; `better(candidate, current)` decides whether a
/// later stream replaces the one already kept, so the first wins full ties.
fn best_per_height<'a>(
    streams: impl IntoIterator<Item = &'a StreamDescriptor>,
    better: impl Fn(&StreamDescriptor, &StreamDescriptor) -> bool,
) -> BTreeMap<u32, &'a StreamDescriptor> {
    let mut by_height: BTreeMap<u32, &'a StreamDescriptor> = BTreeMap::new();

    for stream in streams {
        let Some(height) = stream.height() else {
            continue;
        };

        by_height
            .entry(height)
            .and_modify(|current| {
                if better(stream, *current) {
                    *current = stream;
                }
            })
            .or_insert(stream);
    }

    by_height
}

fn pick_best_audio<'a>(audio_only: &[&'a StreamDescriptor]) -> Option<&'a StreamDescriptor> {
    let preferred: Vec<&StreamDescriptor> = audio_only
        .iter()
        .copied()
        .filter(|stream| stream.has_container(PREFERRED_AUDIO_EXT))
        .collect();
    let pool = if preferred.is_empty() {
        audio_only
    } else {
        &preferred[..]
    };

    pool.iter().copied().fold(None, |best, stream| match best {
        Some(current) if stream.audio_sort_bitrate() <= current.audio_sort_bitrate() => {
            Some(current)
        }
        _ => Some(stream),
    })
}

fn split_stream_options(
    video_only: &[&StreamDescriptor],
    audio_only: &[&StreamDescriptor],
) -> Vec<QualityOption> {
    let Some(audio) = pick_best_audio(audio_only) else {
        return Vec::new();
    };
    let audio_size = audio.size();

    let by_height = best_per_height(video_only.iter().copied(), |candidate, current| {
        let candidate_preferred = candidate.has_container(DEFAULT_VIDEO_EXT);
        let current_preferred = current.has_container(DEFAULT_VIDEO_EXT);

        (candidate_preferred && !current_preferred)
            || (candidate_preferred == current_preferred
                && candidate.video_sort_bitrate() > current.video_sort_bitrate())
    });

    let mut seen = HashSet::new();
    let mut options = Vec::with_capacity(by_height.len() + 1);

    for (height, video) in by_height.into_iter().rev() {
        let selector = format!("{}+{}", video.format_identifier, audio.format_identifier);
        if !seen.insert(selector.clone()) {
            continue;
        }

        options.push(QualityOption {
            selector,
            container_ext: DEFAULT_VIDEO_EXT.to_string(),
            label: height_to_label(height),
            size_bytes: video
                .size()
                .zip(audio_size)
                .map(|(video_size, audio_size)| video_size.saturating_add(audio_size)),
        });
    }

    options.push(QualityOption {
        selector: SPLIT_AUDIO_SELECTOR.to_string(),
        container_ext: AUDIO_EXTRACT_EXT.to_string(),
        label: AUDIO_ONLY_LABEL.to_string(),
        size_bytes: audio_size,
    });

    options
}

/// `abc-0` / `abc-1` style identifier: stem and single-digit discriminator.
fn duplicate_suffix(identifier: &str) -> Option<(&str, u32)> {
    let (stem, suffix) = identifier.rsplit_once('-')?;
    if stem.is_empty() || suffix.len() != 1 {
        return None;
    }

    let discriminator = suffix.chars().next()?.to_digit(10)?;
    Some((stem, discriminator))
}

/// Drops every suffixed duplicate except the lowest-numbered one among
/// siblings of the same stem and height. Siblings at other heights are
/// distinct variants (`hls-0`, `hls-1`, ...) and all survive.
fn drop_duplicate_suffixes<'a>(combined: &[&'a StreamDescriptor]) -> Vec<&'a StreamDescriptor> {
    let mut lowest: HashMap<(&str, Option<u32>), u32> = HashMap::new();
    for stream in combined {
        if let Some((stem, discriminator)) = duplicate_suffix(&stream.format_identifier) {
            lowest
                .entry((stem, stream.height()))
                .and_modify(|kept| *kept = (*kept).min(discriminator))
                .or_insert(discriminator);
        }
    }

    combined
        .iter()
        .copied()
        .filter(|stream| match duplicate_suffix(&stream.format_identifier) {
            Some((stem, discriminator)) => {
                lowest.get(&(stem, stream.height())) == Some(&discriminator)
            }
            None => true,
        })
        .collect()
}

/// Portrait video (taller than wide) is rated by its width.
fn quality_dimension(height: u32, width: Option<u32>) -> u32 {
    match width {
        Some(width) if height > width => width,
        _ => height,
    }
}

fn combined_options(combined: &[&StreamDescriptor]) -> Vec<QualityOption> {
    let candidates = drop_duplicate_suffixes(combined);

    let by_height = best_per_height(candidates, |candidate, current| {
        let candidate_priority = codec_priority(candidate.video_codec.as_deref());
        let current_priority = codec_priority(current.video_codec.as_deref());

        candidate_priority > current_priority
            || (candidate_priority == current_priority
                && candidate.video_sort_bitrate() > current.video_sort_bitrate())
    });

    let mut options = Vec::with_capacity(by_height.len() + 1);

    for (height, stream) in by_height.into_iter().rev() {
        let label = label_from_identifier(&stream.format_identifier).unwrap_or_else(|| {
            height_to_label(quality_dimension(height, stream.width()))
        });

        options.push(QualityOption {
            selector: stream.format_identifier.clone(),
            container_ext: stream
                .container_ext
                .clone()
                .unwrap_or_else(|| DEFAULT_VIDEO_EXT.to_string()),
            label,
            size_bytes: stream.size(),
        });
    }

    options.push(QualityOption {
        selector: COMBINED_AUDIO_SELECTOR.to_string(),
        container_ext: AUDIO_EXTRACT_EXT.to_string(),
        label: AUDIO_ONLY_LABEL.to_string(),
        size_bytes: None,
    });

    options
}

/// Sorts video rows by label quality, keeps the first row of every label and
/// moves the audio row to the end.
fn order_and_dedupe(options: Vec<QualityOption>) -> Vec<QualityOption> {
    let (mut video, audio): (Vec<_>, Vec<_>) = options
        .into_iter()
        .partition(|option| !option.is_audio_only());

    video.sort_by_key(|option| Reverse(label_rank(&option.label)));

    let mut seen_labels = HashSet::new();
    video.retain(|option| seen_labels.insert(option.label.clone()));
    video.extend(audio.into_iter().take(1));

    video
}
