//! Post-level errors and their user-facing classification.

use std::fmt;

use thiserror::Error;

use crate::config::SourceKind;
use crate::reference::ReferenceError;
use crate::source::SourceError;

/// Errors that fail one post.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The reference could not be resolved to a post.
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Every enabled source failed or returned no media.
    #[error("no source returned media for {post_url}{}", summarize(.failures))]
    AllSourcesFailed {
        /// The resolved post URL.
        post_url: String,
        /// Failure reported by each failing source, in priority order.
        failures: Vec<(SourceKind, SourceError)>,
    },

    /// The configuration enables no source.
    #[error("no scraping source is enabled\n  Suggestion: pass --scraper mirror")]
    NoSourcesEnabled,
}

fn summarize(failures: &[(SourceKind, SourceError)]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = failures
        .iter()
        .map(|(kind, error)| format!("{kind}: {error}"))
        .collect();
    format!(" ({})", parts.join("; "))
}

/// Human-readable reason shown for a failed post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 4xx or confirmed absence.
    ProbablyDeleted,
    /// 5xx.
    TechnicalIssue,
    /// Anything else.
    Unknown,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProbablyDeleted => "probably deleted",
            Self::TechnicalIssue => "technical issue",
            Self::Unknown => "unknown error",
        })
    }
}

impl FailureClass {
    /// Classifies an HTTP status.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            400..=499 => Self::ProbablyDeleted,
            500..=599 => Self::TechnicalIssue,
            _ => Self::Unknown,
        }
    }

    fn of_source(error: &SourceError) -> Self {
        match error {
            SourceError::NotFound { .. } => Self::ProbablyDeleted,
            other => other.status().map_or(Self::Unknown, Self::from_status),
        }
    }
}

impl RetrievalError {
    /// Returns the reason to show the user.
    ///
    /// Across several failing sources, confirmed absence wins over server
    /// trouble, which wins over anything unclassified.
    #[must_use]
    pub fn classification(&self) -> FailureClass {
        match self {
            Self::Reference(ReferenceError::Fetch(error)) => {
                error.status().map_or(FailureClass::Unknown, FailureClass::from_status)
            }
            Self::Reference(_) | Self::NoSourcesEnabled => FailureClass::Unknown,
            Self::AllSourcesFailed { failures, .. } => {
                let classes: Vec<FailureClass> = failures
                    .iter()
                    .map(|(_, error)| FailureClass::of_source(error))
                    .collect();
                [FailureClass::ProbablyDeleted, FailureClass::TechnicalIssue]
                    .into_iter()
                    .find(|class| classes.contains(class))
                    .unwrap_or(FailureClass::Unknown)
            }
        }
    }
}
