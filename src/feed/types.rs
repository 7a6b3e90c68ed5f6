use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::util::BodyError;

/// Placeholder substituted for missing links and sentinel thumbnails.
pub const FALLBACK_IMAGE_URL: &str = "https://www.reddit.com/static/noimage.jpg";

/// Thumbnail values the listing API uses instead of a URL.
pub const THUMBNAIL_SENTINELS: [&str; 4] = ["self", "default", "nsfw", "spoiler"];

/// Hosts of the provider's image CDN; links there render directly.
pub const IMAGE_CDN_HOSTS: [&str; 2] = ["i.redd.it", "preview.redd.it"];

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

// ============================================================================
// Error Types
// ============================================================================

/// Errors reported by [`FeedStore`](super::FeedStore) operations.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The requested topic was empty or whitespace
    #[error("Topic must not be empty")]
    InvalidTopic,
    /// A page fetch for the same topic has not resolved yet
    #[error("A page fetch for this topic is already in flight")]
    FetchInProgress,
    /// The active topic changed while the request was in flight; the page was dropped
    #[error("Topic changed before the page arrived")]
    Superseded,
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server kept answering 429 after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Body was not a listing envelope at all
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    /// Direct lookup returned nothing, or an item with a different id
    #[error("Item with id {0} not found")]
    NotFound(String),
}

impl From<BodyError> for FeedError {
    fn from(err: BodyError) -> Self {
        match err {
            BodyError::Network(e) => FeedError::Network(e),
            BodyError::TooLarge(limit) => FeedError::ResponseTooLarge(limit),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// One image reference inside a preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// Full-size source plus the downscaled variants of one preview image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewImage {
    pub source: ImageRef,
    #[serde(default)]
    pub resolutions: Vec<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    pub images: Vec<PreviewImage>,
}

/// A normalized listing entry.
///
/// `link_url` and `thumbnail_url` are never empty, and `preview` is either a
/// well-formed structure or `None` (serialized as `null`, never omitted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    pub author: String,
    pub topic: String,
    /// Epoch seconds, as delivered by the API
    pub created_at: f64,
    pub comment_count: u64,
    pub score: i64,
    pub body_text: String,
    pub link_url: String,
    pub thumbnail_url: String,
    pub preview: Option<Preview>,
}

impl FeedItem {
    /// Re-apply placeholder substitution.
    ///
    /// Idempotent: the placeholder is neither empty nor a sentinel, so a
    /// second pass leaves every field as it is.
    pub fn normalized(mut self) -> Self {
        self.link_url = normalize_link(Some(&self.link_url));
        self.thumbnail_url = normalize_thumbnail(Some(&self.thumbnail_url));
        self.preview = self.preview.filter(|p| !p.images.is_empty());
        self
    }

    /// Whether `link_url` points straight at an image that can be rendered inline.
    pub fn is_direct_image(&self) -> bool {
        is_image_url(&self.link_url)
    }

    pub fn has_thumbnail(&self) -> bool {
        self.thumbnail_url != FALLBACK_IMAGE_URL
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        if !self.created_at.is_finite() {
            return None;
        }
        DateTime::from_timestamp(self.created_at.trunc() as i64, 0)
    }
}

/// Absent or blank links become the placeholder.
pub fn normalize_link(url: Option<&str>) -> String {
    match url.map(str::trim) {
        Some(u) if !u.is_empty() => u.to_string(),
        _ => FALLBACK_IMAGE_URL.to_string(),
    }
}

/// Absent, blank and sentinel thumbnails become the placeholder.
pub fn normalize_thumbnail(url: Option<&str>) -> String {
    match url.map(str::trim) {
        Some(u) if !u.is_empty() && !THUMBNAIL_SENTINELS.contains(&u) => u.to_string(),
        _ => FALLBACK_IMAGE_URL.to_string(),
    }
}

/// Image file extension on the path, or a host on the provider's image CDN.
pub fn is_image_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return has_image_extension(url);
    };

    if parsed
        .host_str()
        .is_some_and(|host| IMAGE_CDN_HOSTS.contains(&host))
    {
        return true;
    }
    has_image_extension(parsed.path())
}

fn has_image_extension(path: &str) -> bool {
    path.rsplit_once('.').is_some_and(|(_, ext)| {
        IMAGE_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
    })
}
