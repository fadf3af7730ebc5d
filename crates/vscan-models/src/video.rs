//! Video identifiers derived from source URLs.
//!
//! The video id scopes result and transcript keys, so the same URL must
//! always produce the same id on every worker.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Identifier of a source video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Errors that can occur during YouTube ID extraction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum YoutubeIdError {
    #[error("URL is not a valid YouTube URL")]
    InvalidYoutubeUrl,
    #[error("Video ID has invalid format")]
    InvalidVideoId,
    #[error("Video ID not found in URL")]
    VideoIdNotFound,
}

/// Result type for YouTube ID extraction.
pub type YoutubeIdResult<T> = Result<T, YoutubeIdError>;

/// URL fragments that directly precede a YouTube video id, in lookup order.
const YOUTUBE_ID_MARKERS: [&str; 6] = ["?v=", "&v=", "youtu.be/", "/embed/", "/v/", "/shorts/"];

/// Length of every YouTube video id.
const YOUTUBE_ID_LEN: usize = 11;

/// Longest path segment accepted verbatim as a generic video id.
const MAX_PATH_ID_LEN: usize = 64;

/// Extract the 11-character video id from a YouTube URL.
///
/// Handles `watch?v=`, `youtu.be/`, `embed/`, `v/` and `shorts/` forms with
/// or without trailing query parameters and fragments.
pub fn extract_youtube_id(url: &str) -> YoutubeIdResult<String> {
    let url = url.trim();
    if !is_youtube_domain(url) {
        return Err(YoutubeIdError::InvalidYoutubeUrl);
    }

    let candidate = YOUTUBE_ID_MARKERS.iter().find_map(|marker| {
        let pos = url.find(marker)?;
        let rest = &url[pos + marker.len()..];
        if rest.is_empty() && *marker != "?v=" && *marker != "&v=" {
            return None;
        }
        let end = rest.find(['&', '#', '?', '/']).unwrap_or(rest.len());
        Some(rest[..end].trim())
    });

    let id = candidate.ok_or(YoutubeIdError::VideoIdNotFound)?;
    if id.len() != YOUTUBE_ID_LEN || !is_id_chars(id) {
        return Err(YoutubeIdError::InvalidVideoId);
    }
    Ok(id.to_string())
}

/// Derive a stable video id from any source URL.
///
/// YouTube URLs yield their canonical video id. Other URLs use their last
/// path segment (minus any extension) when it is a plain identifier, and
/// anything else is hashed. Returns `None` only for a blank URL.
pub fn derive_video_id(url: &str) -> Option<VideoId> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    if is_youtube_domain(url) {
        if let Ok(id) = extract_youtube_id(url) {
            return Some(VideoId(id));
        }
    } else if let Some(id) = last_path_segment(url) {
        return Some(VideoId(id));
    }

    let digest = Sha256::digest(url.as_bytes());
    let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    Some(VideoId(format!("url-{hex}")))
}

fn is_youtube_domain(url: &str) -> bool {
    let url = url.to_ascii_lowercase();
    url.contains("youtube.com") || url.contains("youtu.be")
}

fn is_id_chars(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn last_path_segment(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let stem = match segment.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => segment,
    };
    (stem.len() <= MAX_PATH_ID_LEN && is_id_chars(stem)).then(|| stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_youtube_id_success_cases() {
        for url in [
            "https://youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtube.com/embed/dQw4w9WgXcQ",
            "https://youtube.com/v/dQw4w9WgXcQ",
            "https://youtube.com/shorts/dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ&list=PLrAXtmRdnEQy4qtr",
            "https://youtu.be/dQw4w9WgXcQ?t=30&feature=share",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "  https://YOUTUBE.COM/watch?v=dQw4w9WgXcQ  ",
        ] {
            assert_eq!(extract_youtube_id(url).unwrap(), "dQw4w9WgXcQ", "{url}");
        }
    }

    #[test]
    fn test_extract_youtube_id_error_cases() {
        assert_eq!(
            extract_youtube_id("https://vimeo.com/123"),
            Err(YoutubeIdError::InvalidYoutubeUrl)
        );
        assert_eq!(
            extract_youtube_id("https://youtube.com"),
            Err(YoutubeIdError::VideoIdNotFound)
        );
        assert_eq!(
            extract_youtube_id("https://youtu.be/"),
            Err(YoutubeIdError::VideoIdNotFound)
        );
        assert_eq!(
            extract_youtube_id("https://youtube.com/watch?v=abc123"),
            Err(YoutubeIdError::InvalidVideoId)
        );
        assert_eq!(
            extract_youtube_id("https://youtube.com/watch?v=abc123def!!"),
            Err(YoutubeIdError::InvalidVideoId)
        );
        assert_eq!(
            extract_youtube_id("https://youtube.com/watch?v="),
            Err(YoutubeIdError::InvalidVideoId)
        );
    }

    #[test]
    fn test_derive_video_id_prefers_youtube_id() {
        let id = derive_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=4").unwrap();
        assert_eq!(id.as_str(), "dQw4w9WgXcQ");
    }

    #[test]
    fn test_derive_video_id_uses_last_path_segment() {
        assert_eq!(
            derive_video_id("https://videos.example.com/watch/abc123").unwrap(),
            VideoId::from("abc123")
        );
        assert_eq!(
            derive_video_id("https://cdn.example.com/media/talk_01.mp4?sig=x").unwrap(),
            VideoId::from("talk_01")
        );
    }

    #[test]
    fn test_derive_video_id_hashes_everything_else() {
        let a = derive_video_id("not a url at all").unwrap();
        let b = derive_video_id("not a url at all").unwrap();
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("url-"));
        assert_eq!(a.as_str().len(), "url-".len() + 16);

        let other = derive_video_id("https://example.com/").unwrap();
        assert!(other.as_str().starts_with("url-"));
        assert_ne!(other, a);
    }

    #[test]
    fn test_derive_video_id_malformed_youtube_url_is_hashed() {
        let id = derive_video_id("https://youtube.com/watch?v=abc123").unwrap();
        assert!(id.as_str().starts_with("url-"));
    }

    #[test]
    fn test_derive_video_id_blank() {
        assert!(derive_video_id("   ").is_none());
    }
}
