use regex::Regex;
use std::sync::OnceLock;

/// How the player should present a video content block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    /// Embeddable player URL (YouTube/Vimeo iframe src).
    Embed(String),
    /// Progressive file URL handed straight to a `<video>` element.
    Direct(String),
    Unsupported,
}

impl VideoSource {
    pub fn kind(&self) -> &'static str {
        match self {
            VideoSource::Embed(_) => "embed",
            VideoSource::Direct(_) => "direct",
            VideoSource::Unsupported => "unsupported",
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            VideoSource::Embed(u) | VideoSource::Direct(u) => Some(u),
            VideoSource::Unsupported => None,
        }
    }
}

fn youtube_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(youtu\.be/|v/|u/\w/|embed/|watch\?v=|&v=)([^#&?]*)").expect("youtube regex")
    })
}

fn vimeo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"vimeo\.com/(?:channels/(?:\w+/)?|groups/[^/]*/videos/|album/\d+/video/|)(\d+)(?:$|/|\?)")
            .expect("vimeo regex")
    })
}

fn file_ext_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.(mp4|webm|ogg|mov)(\?|$)").expect("file ext regex"))
}

fn youtube_video_id(url: &str) -> Option<&str> {
    let caps = youtube_re().captures(url)?;
    let id = caps.get(2)?.as_str();
    // Canonical YouTube ids are exactly 11 characters.
    if id.len() == 11 {
        Some(id)
    } else {
        None
    }
}

fn vimeo_video_id(url: &str) -> Option<&str> {
    let caps = vimeo_re().captures(url)?;
    Some(caps.get(1)?.as_str())
}

/// Maps a raw lesson video URL to a playback source. Host-specific share
/// links become embed URLs; recognizable file URLs (and any other http
/// URL) play directly; everything else is unsupported.
pub fn resolve_video_url(url: &str) -> VideoSource {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return VideoSource::Unsupported;
    }

    if trimmed.contains("youtube.com") || trimmed.contains("youtu.be") {
        return match youtube_video_id(trimmed) {
            Some(id) => VideoSource::Embed(format!("https://www.youtube.com/embed/{}", id)),
            None => VideoSource::Unsupported,
        };
    }

    if trimmed.contains("vimeo.com") {
        return match vimeo_video_id(trimmed) {
            Some(id) => VideoSource::Embed(format!("https://player.vimeo.com/video/{}", id)),
            None => VideoSource::Unsupported,
        };
    }

    if file_ext_re().is_match(trimmed) {
        return VideoSource::Direct(trimmed.to_string());
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return VideoSource::Direct(trimmed.to_string());
    }

    VideoSource::Unsupported
}
