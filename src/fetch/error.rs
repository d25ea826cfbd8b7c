//! Transport errors surfaced by the fetch layer.

use thiserror::Error;

/// Errors that can occur while fetching a page or lookup response.
///
/// These are transport-level only; callers classify them into domain
/// outcomes (deleted post, service outage) themselves.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection-level failure (DNS, refused, reset, TLS) on the last attempt.
    #[error("network error fetching {url} after {attempts} attempt(s): {source}")]
    Network {
        /// The URL of the last attempt.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// The underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The last attempt timed out.
    #[error("timeout fetching {url} after {attempts} attempt(s)")]
    Timeout {
        /// The URL of the last attempt.
        url: String,
        /// Attempts made.
        attempts: u32,
    },

    /// The last attempt returned an error status.
    #[error("HTTP {status} fetching {url} after {attempts} attempt(s)")]
    HttpStatus {
        /// The URL of the last attempt.
        url: String,
        /// The last status code.
        status: u16,
        /// Attempts made.
        attempts: u32,
    },

    /// The redirect chain exceeded the hop limit or had an unusable target.
    #[error("too many or invalid redirects fetching {url}")]
    Redirect {
        /// The URL whose redirect chain failed.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("HTTP client construction failed: {message}")]
    Client {
        /// Description of the failure.
        message: String,
    },
}

impl FetchError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, attempts: u32, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            attempts,
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>, attempts: u32) -> Self {
        Self::Timeout {
            url: url.into(),
            attempts,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16, attempts: u32) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            attempts,
        }
    }

    /// Creates a redirect error.
    pub fn redirect(url: impl Into<String>) -> Self {
        Self::Redirect { url: url.into() }
    }

    /// Creates a client construction error.
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client {
            message: message.into(),
        }
    }

    /// Returns the last HTTP status, when the failure was a status.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display_and_status() {
        let error = FetchError::http_status("https://nitter.it/a/status/1", 404, 5);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("5 attempt"), "Expected attempts in: {msg}");
        assert_eq!(error.status(), Some(404));
    }

    #[test]
    fn test_timeout_has_no_status() {
        let error = FetchError::timeout("https://nitter.it/", 2);
        assert!(error.to_string().contains("timeout"));
        assert_eq!(error.status(), None);
    }
}
