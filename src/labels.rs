use std::sync::LazyLock;

use regex::Regex;

/// Standard tiers, tallest first.
pub const QUALITY_TIERS: [(u32, &str); 8] = [
    (2160, "4K"),
    (1440, "1440p"),
    (1080, "1080p"),
    (720, "720p"),
    (480, "480p"),
    (360, "360p"),
    (240, "240p"),
    (144, "144p"),
];

/// Maximum relative distance, in percent, for snapping to a tier.
const SNAP_TOLERANCE_PERCENT: u64 = 12;

pub const UNKNOWN_LABEL: &str = "Unknown";

static RESOLUTION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{3,4})p").expect("resolution token pattern is valid"));

fn exact_tier_label(height: u32) -> Option<&'static str> {
    QUALITY_TIERS
        .iter()
        .find(|(tier, _)| *tier == height)
        .map(|(_, label)| *label)
}

/// Maps a pixel height to a display label, snapping off-standard encodes
/// (652px, 1072px, ...) to the nearest tier within tolerance.
pub fn height_to_label(height: u32) -> String {
    if height == 0 {
        return UNKNOWN_LABEL.to_string();
    }
    if let Some(label) = exact_tier_label(height) {
        return label.to_string();
    }

    nearest_tier_within_tolerance(height)
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("{height}p"))
}

fn nearest_tier_within_tolerance(height: u32) -> Option<&'static str> {
    let height = u64::from(height);
    let mut nearest: Option<(u64, u64, &'static str)> = None;

    for (tier, label) in QUALITY_TIERS {
        let tier = u64::from(tier);
        let diff = height.abs_diff(tier);
        if diff * 100 > tier * SNAP_TOLERANCE_PERCENT {
            continue;
        }

        // diff/tier < best_diff/best_tier, compared without floats. Strict so
        // the taller tier keeps an exact tie.
        let closer = nearest
            .is_none_or(|(best_diff, best_tier, _)| diff * best_tier < best_diff * tier);
        if closer {
            nearest = Some((diff, tier, label));
        }
    }

    nearest.map(|(_, _, label)| label)
}

/// Resolution label encoded in a format identifier such as
/// `h264_720p_1349035-0`. Extractors that rotate portrait video report a
/// misleading height, while the identifier keeps the encoder's own name.
pub fn label_from_identifier(identifier: &str) -> Option<String> {
    let captures = RESOLUTION_TOKEN.captures(identifier)?;
    let pixels = captures.get(1)?.as_str().parse::<u32>().ok()?;

    Some(
        exact_tier_label(pixels)
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("{pixels}p")),
    )
}

/// Ordering key for a video label: tier height for tier labels, `NNN` for
/// `"NNNp"`, zero for anything else.
pub fn label_rank(label: &str) -> u32 {
    if let Some((tier, _)) = QUALITY_TIERS.iter().find(|(_, name)| *name == label) {
        return *tier;
    }

    label
        .strip_suffix('p')
        .and_then(|digits| digits.parse::<u32>().ok())
        .unwrap_or_default()
}

/// Compatibility priority of a video codec, higher is more widely hardware
/// decodable. HEVC and proprietary codecs (bytevc1) rank lowest.
pub fn codec_priority(video_codec: Option<&str>) -> u8 {
    let codec = video_codec.unwrap_or_default().to_ascii_lowercase();

    if codec.contains("h264") || codec.contains("avc") {
        3
    } else if codec.contains("vp9") || codec.contains("vp8") || codec.contains("vp09") {
        2
    } else if codec.contains("av01") || codec.contains("av1") {
        1
    } else {
        0
    }
}
