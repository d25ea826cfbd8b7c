//! Pluggable scraping sources.
//!
//! Every source implements [`Source`]: given a resolved [`PostReference`] it
//! returns a [`MediaBundle`] or a typed [`SourceError`]. The orchestrator runs
//! enabled sources concurrently and merges their bundles.
//!
//! - [`MirrorSource`] - scrapes an alternate-frontend mirror (primary)
//! - [`BrowserSource`] - delegates to an injected headless-browser driver
//! - [`DirectSource`] - scrapes the canonical site's legacy markup
//! - [`UserIdLookup`] - resolves the numeric account id from two lookup services

mod browser;
mod direct;
mod mirror;
mod user_id;

pub use browser::{BrowserDriver, BrowserSource};
pub use direct::{DirectSource, MAX_QUOTE_DEPTH};
pub use mirror::{MirrorSource, fix_image_url};
pub use user_id::UserIdLookup;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::config::{RetrievalConfig, SourceKind};
use crate::fetch::FetchError;
use crate::reference::PostReference;
use crate::util::non_empty;

/// Errors a source reports instead of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The request failed after retries.
    #[error("request failed: {message}")]
    Transport {
        /// Last HTTP status, if the failure was a status.
        status: Option<u16>,
        /// Description of the failure.
        message: String,
    },

    /// The post is confirmed absent (deleted, suspended, private).
    #[error("post not found: {message}")]
    NotFound {
        /// Text reported by the source.
        message: String,
    },

    /// The page did not have the expected structure.
    #[error("unexpected page structure: {message}")]
    Parse {
        /// What was missing.
        message: String,
    },

    /// The source cannot run in this environment.
    #[error("source unavailable: {message}")]
    Unavailable {
        /// Why the source cannot run.
        message: String,
    },
}

impl SourceError {
    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Returns the HTTP status associated with the failure, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<FetchError> for SourceError {
    fn from(error: FetchError) -> Self {
        Self::Transport {
            status: error.status(),
            message: error.to_string(),
        }
    }
}

/// What one source found out about one post.
///
/// `error` set means the source produced nothing; `media` is empty then.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaBundle {
    /// Display name.
    pub name: Option<String>,
    /// Handle without `@`.
    pub username: Option<String>,
    /// Numeric account id.
    pub user_id: Option<String>,
    /// Avatar image URL.
    pub avatar: Option<String>,
    /// Profile bio.
    pub bio: Option<String>,
    /// Profile website.
    pub website: Option<String>,
    /// Profile location.
    pub location: Option<String>,
    /// Join date as displayed.
    pub joined: Option<String>,
    /// Birthday as displayed.
    pub birthday: Option<String>,
    /// Post text.
    pub text: Option<String>,
    /// Post time in milliseconds since the Unix epoch.
    pub timestamp: Option<i64>,
    /// The post carries a video or animated GIF.
    pub is_video: bool,
    /// Media URLs in display order.
    pub media: Vec<String>,
    /// Media URLs of the quoted post.
    pub quote_media: Vec<String>,
    /// Why the source produced nothing.
    pub error: Option<SourceError>,
}

impl MediaBundle {
    /// Creates a bundle that only records a failure.
    #[must_use]
    pub fn failed(error: SourceError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Returns true when the source failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Returns true when `media` holds something that plays as video.
    #[must_use]
    pub fn has_video_url(&self) -> bool {
        self.media.iter().any(|url| is_video_locator(url))
    }
}

/// A scraping source.
///
/// Uses `async_trait` so sources can be stored as `Arc<dyn Source>`.
#[async_trait]
pub trait Source: Send + Sync {
    /// Returns the source identifier (also its merge priority).
    fn kind(&self) -> SourceKind;

    /// Scrapes `post`.
    async fn fetch_bundle(
        &self,
        post: &PostReference,
        config: &RetrievalConfig,
    ) -> Result<MediaBundle, SourceError>;
}

/// Returns true for URLs of playable video files or stream manifests.
#[must_use]
pub fn is_video_locator(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default().to_ascii_lowercase();
    [".mp4", ".m3u8", ".webm", ".mov", ".m4s", ".ts"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

pub(crate) fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::parse(format!("bad selector '{css}': {e}")))
}

pub(crate) fn first<'a>(scope: ElementRef<'a>, css: &str) -> Result<Option<ElementRef<'a>>, SourceError> {
    Ok(scope.select(&selector(css)?).next())
}

pub(crate) fn first_in<'a>(doc: &'a Html, css: &str) -> Result<Option<ElementRef<'a>>, SourceError> {
    Ok(doc.select(&selector(css)?).next())
}

pub(crate) fn text_of(element: Option<ElementRef<'_>>) -> Option<String> {
    element.and_then(|el| non_empty(&el.text().collect::<String>()))
}

pub(crate) fn attr_of(element: Option<ElementRef<'_>>, name: &str) -> Option<String> {
    element.and_then(|el| el.value().attr(name)).and_then(non_empty)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_bundle_has_no_media() {
        let bundle = MediaBundle::failed(SourceError::not_found("Tweet not found"));
        assert!(bundle.is_failed());
        assert!(bundle.media.is_empty());
    }

    #[test]
    fn test_is_video_locator() {
        assert!(is_video_locator("https://video.twimg.com/ext_tw_video/1/pu/vid/1280x720/a.mp4?tag=12"));
        assert!(is_video_locator("https://video.twimg.com/a/pl/1280x720/b.m3u8"));
        assert!(!is_video_locator("https://pbs.twimg.com/media/EXg.jpg"));
    }

    #[test]
    fn test_transport_error_keeps_status() {
        let error = SourceError::from(FetchError::http_status("https://nitter.it/a", 502, 5));
        assert_eq!(error.status(), Some(502));
        assert!(error.to_string().contains("502"));
    }

    #[test]
    fn test_helpers_extract_trimmed_text_and_attrs() {
        let doc = Html::parse_document(r#"<div class="a"> hi <img class="b" src=" /pic/x.jpg "></div>"#);
        let root = first_in(&doc, ".a").unwrap();
        assert_eq!(text_of(root), Some("hi".to_string()));
        let img = first(root.unwrap(), ".b").unwrap();
        assert_eq!(attr_of(img, "src"), Some("/pic/x.jpg".to_string()));
        assert_eq!(attr_of(img, "alt"), None);
    }
}
