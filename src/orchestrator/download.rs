//! Per-media retrieval contract.
//!
//! Writing files and embedding metadata are left to a [`MediaDownloader`]
//! supplied by the embedding program. The orchestrator only defines the
//! result shape and calls the downloader once per media URL.

use std::fmt;

use async_trait::async_trait;

use crate::reference::PostReference;
use crate::source::MediaBundle;

/// Outcome of one media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStatus {
    /// The file was written.
    Downloaded,
    /// The file already existed.
    Skipped,
    /// The item failed; see `errors`.
    Failed,
    /// The URL was reported without downloading.
    Listed,
}

/// Stage at which a media item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// Fetching the media bytes.
    Download,
    /// Writing the file.
    Write,
    /// Embedding descriptive metadata.
    Metadata,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Download => "download",
            Self::Write => "write",
            Self::Metadata => "metadata",
        })
    }
}

/// One problem recorded for a media item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalIssue {
    /// Failing stage.
    pub kind: IssueKind,
    /// Description.
    pub message: String,
}

/// Immutable record of one media item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalResult {
    /// Outcome.
    pub status: RetrievalStatus,
    /// The media URL.
    pub media_url: String,
    /// The post the media belongs to.
    pub post_url: String,
    /// Problems met along the way.
    pub errors: Vec<RetrievalIssue>,
}

impl RetrievalResult {
    /// Creates a result with no issues.
    #[must_use]
    pub fn new(status: RetrievalStatus, media_url: &str, post: &PostReference) -> Self {
        Self {
            status,
            media_url: media_url.to_string(),
            post_url: post.final_url().to_string(),
            errors: Vec::new(),
        }
    }

    /// Creates a failed result with one issue.
    #[must_use]
    pub fn failed(
        media_url: &str,
        post: &PostReference,
        kind: IssueKind,
        message: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(RetrievalStatus::Failed, media_url, post);
        result.errors.push(RetrievalIssue {
            kind,
            message: message.into(),
        });
        result
    }
}

/// Retrieves one media item.
///
/// Implementations must not panic: failures belong in the returned result so
/// sibling items of the same post are unaffected.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Handles `media_url` of `post`.
    async fn download(
        &self,
        media_url: &str,
        post: &PostReference,
        bundle: &MediaBundle,
    ) -> RetrievalResult;
}

/// Reports every URL as [`RetrievalStatus::Listed`] without downloading.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListingDownloader;

#[async_trait]
impl MediaDownloader for ListingDownloader {
    async fn download(
        &self,
        media_url: &str,
        post: &PostReference,
        _bundle: &MediaBundle,
    ) -> RetrievalResult {
        RetrievalResult::new(RetrievalStatus::Listed, media_url, post)
    }
}
