//! Turns a user-supplied post reference into a canonical URL plus
//! `(username, post id)`.
//!
//! References on the canonical site (or its aliases) are normalized without
//! any network traffic. Anything else, typically a link-shortener URL, is
//! expanded: the first hop's meta-refresh or `Location` is preferred, and a
//! non-canonical target is followed to its final URL.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::config::RetrievalConfig;
use crate::fetch::redirect::{canonicalize, is_canonical_site, meta_refresh_target};
use crate::fetch::{FetchClient, FetchError, FetchRequest};
use crate::util::compile_static_regex;

static POST_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"([A-Za-z0-9_]+)/status(?:es)?/([0-9]+)"));

/// Errors raised while resolving a post reference.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// The input is not a usable URL.
    #[error("invalid post URL '{input}'\n  Suggestion: pass a full post URL such as https://twitter.com/<user>/status/<id>")]
    InvalidUrl {
        /// The rejected input.
        input: String,
    },

    /// The resolved URL does not identify a post.
    #[error("'{url}' does not point to a post")]
    NotAPost {
        /// The resolved URL.
        url: String,
    },

    /// Expanding the reference failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// A resolved post reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostReference {
    original_url: String,
    final_url: Url,
    username: String,
    post_id: String,
}

impl PostReference {
    /// Builds a reference from an already-final URL.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::NotAPost`] when the URL has no
    /// `<username>/status/<id>` path.
    pub fn from_final_url(
        original_url: impl Into<String>,
        final_url: Url,
    ) -> Result<Self, ReferenceError> {
        let (username, post_id) = parse_post_path(&final_url).ok_or_else(|| {
            ReferenceError::NotAPost {
                url: final_url.to_string(),
            }
        })?;
        Ok(Self {
            original_url: original_url.into(),
            final_url,
            username,
            post_id,
        })
    }

    /// Returns the input exactly as supplied.
    #[must_use]
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    /// Returns the resolved URL.
    #[must_use]
    pub fn final_url(&self) -> &Url {
        &self.final_url
    }

    /// Returns the author's handle.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the numeric post id.
    #[must_use]
    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    /// Returns `/<username>/status/<id>`, the path every frontend shares.
    #[must_use]
    pub fn status_path(&self) -> String {
        format!("/{}/status/{}", self.username, self.post_id)
    }
}

impl fmt::Display for PostReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.final_url.as_str())
    }
}

/// Extracts `(username, post id)` from a URL path.
#[must_use]
pub fn parse_post_path(url: &Url) -> Option<(String, String)> {
    let caps = POST_PATH_RE.captures(url.path())?;
    Some((caps.get(1)?.as_str().to_string(), caps.get(2)?.as_str().to_string()))
}

/// Parses user input into a URL, adding `https://` when no scheme is given.
///
/// # Errors
///
/// Returns [`ReferenceError::InvalidUrl`] when the input cannot be parsed.
pub fn normalize_input(input: &str) -> Result<Url, ReferenceError> {
    let trimmed = input.trim();
    let invalid = || ReferenceError::InvalidUrl {
        input: input.to_string(),
    };
    if trimmed.is_empty() {
        return Err(invalid());
    }
    let lower = trimmed.to_ascii_lowercase();
    let with_scheme = if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&with_scheme).map_err(|_| invalid())?;
    if url.host_str().is_none() {
        return Err(invalid());
    }
    Ok(url)
}

/// Resolves `input` into a [`PostReference`].
///
/// With `config.redirect` disabled the parsed input is used verbatim.
///
/// # Errors
///
/// Returns [`ReferenceError`] for malformed input, unreachable shortlinks or
/// targets that are not posts.
#[instrument(level = "debug", skip(client, config))]
pub async fn resolve(
    client: &FetchClient,
    input: &str,
    config: &RetrievalConfig,
) -> Result<PostReference, ReferenceError> {
    let url = normalize_input(input)?;
    let final_url = if !config.redirect {
        url
    } else if is_canonical_site(&url) {
        canonicalize(&url)
    } else {
        expand(client, &url, config).await?
    };
    debug!(final_url = %final_url, "Resolved post reference");
    PostReference::from_final_url(input.trim(), final_url)
}

async fn expand(
    client: &FetchClient,
    url: &Url,
    config: &RetrievalConfig,
) -> Result<Url, ReferenceError> {
    let first = client
        .fetch(
            FetchRequest::get(url.clone())
                .cookie(config.cookie())
                .no_redirects(),
        )
        .await?;

    let hop = meta_refresh_target(&first.body)
        .or_else(|| first.location.clone())
        .and_then(|target| first.url.join(&target).ok())
        .unwrap_or_else(|| first.url.clone());

    if is_canonical_site(&hop) || parse_post_path(&hop).is_some() {
        return Ok(canonicalize(&hop));
    }

    let followed = client
        .fetch(
            FetchRequest::get(hop)
                .cookie(config.cookie()),
        )
        .await?;
    Ok(canonicalize(&followed.url))
}
