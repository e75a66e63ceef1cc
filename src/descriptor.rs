use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// One raw stream as reported by yt-dlp in the `formats` array.
///
/// yt-dlp fields are loosely typed: numbers may arrive as strings, floats or
/// `null` depending on the extractor. Everything is normalised here so the
/// reconciler only deals with typed optionals.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamDescriptor {
    #[serde(rename = "format_id", default, deserialize_with = "loose_string")]
    pub format_identifier: String,
    #[serde(rename = "vcodec", default, deserialize_with = "loose_text")]
    pub video_codec: Option<String>,
    #[serde(rename = "acodec", default, deserialize_with = "loose_text")]
    pub audio_codec: Option<String>,
    #[serde(rename = "ext", default, deserialize_with = "loose_text")]
    pub container_ext: Option<String>,
    #[serde(default, deserialize_with = "loose_u32")]
    pub height: Option<u32>,
    #[serde(default, deserialize_with = "loose_u32")]
    pub width: Option<u32>,
    #[serde(rename = "tbr", default, deserialize_with = "loose_f64")]
    pub bitrate_total: Option<f64>,
    #[serde(rename = "vbr", default, deserialize_with = "loose_f64")]
    pub bitrate_video: Option<f64>,
    #[serde(rename = "abr", default, deserialize_with = "loose_f64")]
    pub bitrate_audio: Option<f64>,
    #[serde(rename = "filesize", default, deserialize_with = "loose_u64")]
    pub size_bytes: Option<u64>,
    #[serde(rename = "filesize_approx", default, deserialize_with = "loose_u64")]
    pub size_bytes_approx: Option<u64>,
}

/// How a descriptor participates in reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Video and audio in one file, including muxed progressive files whose
    /// extractor reported no codecs at all.
    Combined,
    VideoOnly,
    AudioOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Track {
    Declared,
    DeclaredAbsent,
    Unreported,
}

fn track(codec: Option<&str>) -> Track {
    match codec {
        None => Track::Unreported,
        Some(value) if value.eq_ignore_ascii_case("none") => Track::DeclaredAbsent,
        Some(_) => Track::Declared,
    }
}

impl StreamDescriptor {
    pub fn kind(&self) -> Option<StreamKind> {
        let video = track(self.video_codec.as_deref());
        let audio = track(self.audio_codec.as_deref());
        let has_height = self.height().is_some();

        let explicit_combined = video == Track::Declared && audio == Track::Declared;
        let muxed_progressive = video == Track::Unreported && audio == Track::Unreported;

        if has_height && (explicit_combined || muxed_progressive) {
            Some(StreamKind::Combined)
        } else if has_height && video == Track::Declared {
            Some(StreamKind::VideoOnly)
        } else if !has_height
            && video != Track::Declared
            && (audio == Track::Declared || self.bitrate_audio.is_some_and(|abr| abr > 0.0))
        {
            // Some HLS extractors leave acodec unset but still report abr.
            Some(StreamKind::AudioOnly)
        } else {
            None
        }
    }

    /// Height in pixels; zero is treated as unknown.
    pub fn height(&self) -> Option<u32> {
        self.height.filter(|height| *height > 0)
    }

    pub fn width(&self) -> Option<u32> {
        self.width.filter(|width| *width > 0)
    }

    /// Exact size if reported, otherwise the approximation. Zero is unknown.
    pub fn size(&self) -> Option<u64> {
        self.size_bytes
            .filter(|size| *size > 0)
            .or(self.size_bytes_approx.filter(|size| *size > 0))
    }

    pub fn has_container(&self, ext: &str) -> bool {
        self.container_ext
            .as_deref()
            .is_some_and(|value| value.eq_ignore_ascii_case(ext))
    }

    /// Tie-break bitrate for streams carrying video.
    pub fn video_sort_bitrate(&self) -> f64 {
        self.bitrate_total
            .or(self.bitrate_video)
            .unwrap_or_default()
    }

    /// Tie-break bitrate for audio-only streams.
    pub fn audio_sort_bitrate(&self) -> f64 {
        self.bitrate_audio
            .or(self.bitrate_total)
            .unwrap_or_default()
    }
}

fn number_from_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };

    number.filter(|number| number.is_finite())
}

pub(crate) fn loose_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_from_value))
}

pub(crate) fn loose_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = loose_f64(deserializer)?;
    Ok(number
        .filter(|number| *number >= 0.0 && *number <= u64::MAX as f64)
        .map(|number| number.round() as u64))
}

fn loose_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = loose_f64(deserializer)?;
    Ok(number
        .filter(|number| *number >= 0.0 && *number <= f64::from(u32::MAX))
        .map(|number| number.round() as u32))
}

pub(crate) fn loose_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let text = match value {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    };

    Ok(text
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty()))
}

fn loose_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(loose_text(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::StreamDescriptor;

    pub fn video(id: &str, codec: &str, ext: &str, height: u32) -> StreamDescriptor {
        StreamDescriptor {
            format_identifier: id.to_string(),
            video_codec: Some(codec.to_string()),
            audio_codec: Some("none".to_string()),
            container_ext: Some(ext.to_string()),
            height: Some(height),
            ..StreamDescriptor::default()
        }
    }

    pub fn audio(id: &str, codec: &str, ext: &str, abr: f64) -> StreamDescriptor {
        StreamDescriptor {
            format_identifier: id.to_string(),
            video_codec: Some("none".to_string()),
            audio_codec: Some(codec.to_string()),
            container_ext: Some(ext.to_string()),
            bitrate_audio: Some(abr),
            ..StreamDescriptor::default()
        }
    }

    pub fn combined(id: &str, codec: &str, width: u32, height: u32) -> StreamDescriptor {
        StreamDescriptor {
            format_identifier: id.to_string(),
            video_codec: Some(codec.to_string()),
            audio_codec: Some("aac".to_string()),
            container_ext: Some("mp4".to_string()),
            height: Some(height),
            width: Some(width),
            ..StreamDescriptor::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{audio, combined, video};
    use super::*;

    #[test]
    fn decodes_loosely_typed_fields() {
        let descriptor: StreamDescriptor = serde_json::from_str(
            r#"{
                "format_id": 137,
                "vcodec": "avc1.640028",
                "acodec": null,
                "ext": "mp4",
                "height": "1080",
                "width": 1920.0,
                "tbr": "4403.5",
                "vbr": true,
                "filesize": 123456789.0,
                "filesize_approx": "n/a",
                "fps": 30
            }"#,
        )
        .unwrap();

        assert_eq!(descriptor.format_identifier, "137");
        assert_eq!(descriptor.video_codec.as_deref(), Some("avc1.640028"));
        assert_eq!(descriptor.audio_codec, None);
        assert_eq!(descriptor.height(), Some(1080));
        assert_eq!(descriptor.width(), Some(1920));
        assert_eq!(descriptor.bitrate_total, Some(4403.5));
        assert_eq!(descriptor.bitrate_video, None);
        assert_eq!(descriptor.size(), Some(123_456_789));
        assert_eq!(descriptor.size_bytes_approx, None);
    }

    #[test]
    fn missing_fields_default_to_absent() {
        let descriptor: StreamDescriptor = serde_json::from_str("{}").unwrap();
        assert_eq!(descriptor, StreamDescriptor::default());
        assert_eq!(descriptor.kind(), None);
    }

    #[test]
    fn classifies_split_streams() {
        assert_eq!(
            video("137", "avc1", "mp4", 1080).kind(),
            Some(StreamKind::VideoOnly)
        );
        assert_eq!(
            audio("140", "mp4a.40.2", "m4a", 129.5).kind(),
            Some(StreamKind::AudioOnly)
        );
    }

    #[test]
    fn combined_requires_both_codecs() {
        assert_eq!(
            combined("h264_540p-0", "h264", 576, 1024).kind(),
            Some(StreamKind::Combined)
        );

        // Video codec with unreported audio stays video-only.
        let mut partial = video("v", "vp9", "webm", 720);
        partial.audio_codec = None;
        assert_eq!(partial.kind(), Some(StreamKind::VideoOnly));
    }

    #[test]
    fn muxed_progressive_without_codecs_is_combined() {
        let muxed = StreamDescriptor {
            format_identifier: "http-2176".to_string(),
            height: Some(720),
            width: Some(1280),
            ..StreamDescriptor::default()
        };
        assert_eq!(muxed.kind(), Some(StreamKind::Combined));

        // The explicit "none" sentinel is not the same as unreported.
        let mut declared_none = muxed.clone();
        declared_none.video_codec = Some("none".to_string());
        declared_none.audio_codec = Some("none".to_string());
        assert_eq!(declared_none.kind(), None);
    }

    #[test]
    fn audio_detected_from_bitrate_when_codec_unreported() {
        let hls_audio = StreamDescriptor {
            format_identifier: "hls-audio-128000-Audio".to_string(),
            bitrate_audio: Some(128.0),
            ..StreamDescriptor::default()
        };
        assert_eq!(hls_audio.kind(), Some(StreamKind::AudioOnly));

        let silent = StreamDescriptor {
            format_identifier: "sb0".to_string(),
            video_codec: Some("none".to_string()),
            audio_codec: Some("none".to_string()),
            ..StreamDescriptor::default()
        };
        assert_eq!(silent.kind(), None);
    }

    #[test]
    fn zero_height_and_size_are_unknown() {
        let mut descriptor = video("x", "avc1", "mp4", 0);
        descriptor.size_bytes = Some(0);
        descriptor.size_bytes_approx = Some(5_000);
        assert_eq!(descriptor.height(), None);
        assert_eq!(descriptor.kind(), None);
        assert_eq!(descriptor.size(), Some(5_000));
    }

    #[test]
    fn sort_bitrates_fall_back_in_order() {
        let mut descriptor = video("x", "avc1", "mp4", 720);
        assert_eq!(descriptor.video_sort_bitrate(), 0.0);
        descriptor.bitrate_video = Some(900.0);
        assert_eq!(descriptor.video_sort_bitrate(), 900.0);
        descriptor.bitrate_total = Some(1_100.0);
        assert_eq!(descriptor.video_sort_bitrate(), 1_100.0);

        let mut track = audio("a", "opus", "webm", 0.0);
        track.bitrate_audio = None;
        track.bitrate_total = Some(64.0);
        assert_eq!(track.audio_sort_bitrate(), 64.0);
    }
}
