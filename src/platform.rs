/// Source platform of a media URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Youtube,
    Tiktok,
    Instagram,
    Twitter,
    Facebook,
    Reddit,
    Vimeo,
    Soundcloud,
    Twitch,
    Pinterest,
    Dailymotion,
    Bilibili,
    Direct,
}

// Checked top to bottom; the first platform with a matching substring wins.
const PLATFORM_PATTERNS: [(Platform, &[&str]); 12] = [
    (Platform::Youtube, &["youtube.com", "youtu.be"]),
    (Platform::Tiktok, &["tiktok.com"]),
    (Platform::Instagram, &["instagram.com"]),
    (Platform::Twitter, &["twitter.com", "x.com"]),
    (Platform::Facebook, &["facebook.com", "fb.com", "fb.watch"]),
    (Platform::Reddit, &["reddit.com", "redd.it", "v.redd.it"]),
    (Platform::Vimeo, &["vimeo.com"]),
    (Platform::Soundcloud, &["soundcloud.com"]),
    (Platform::Twitch, &["twitch.tv", "clips.twitch.tv"]),
    (Platform::Pinterest, &["pinterest.com", "pin.it"]),
    (Platform::Dailymotion, &["dailymotion.com"]),
    (Platform::Bilibili, &["bilibili.com", "b23.tv"]),
];

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Tiktok => "tiktok",
            Self::Instagram => "instagram",
            Self::Twitter => "twitter",
            Self::Facebook => "facebook",
            Self::Reddit => "reddit",
            Self::Vimeo => "vimeo",
            Self::Soundcloud => "soundcloud",
            Self::Twitch => "twitch",
            Self::Pinterest => "pinterest",
            Self::Dailymotion => "dailymotion",
            Self::Bilibili => "bilibili",
            Self::Direct => "direct",
        }
    }

    /// Platforms that only return complete format lists with a browser session.
    pub fn needs_cookies(self) -> bool {
        matches!(
            self,
            Self::Tiktok | Self::Instagram | Self::Twitter | Self::Facebook
        )
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify(url: &str) -> Platform {
    let lower = url.to_ascii_lowercase();

    PLATFORM_PATTERNS
        .iter()
        .find(|(_, domains)| domains.iter().any(|domain| lower.contains(domain)))
        .map(|(platform, _)| *platform)
        .unwrap_or(Platform::Direct)
}
