//! Semantic cache keys for outbound requests.
//!
//! Keys describe *what* a request asks for, never *where* it was sent: the same
//! post fetched from two different mirrors maps to one key, so a retry that was
//! moved to another mirror still hits the cache. The mapping is a pure, total
//! function; anything it does not recognize is not cacheable.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::util::{canonical_host, compile_static_regex};

/// Mirror paths that look like `/{username}` but are not profiles.
const RESERVED_MIRROR_PATHS: &[&str] = &["enablehls", "pic", "video", "search", "settings", "about"];

static STATUS_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)/status/([0-9]+)"));
static PROFILE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^/([A-Za-z0-9_]+)/?$"));
static BODY_STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)status/([0-9]+)"));
static BODY_USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)username=([a-z0-9_]+)"));
static BODY_INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)input=([a-z0-9_]+)"));

/// The kind of remote service a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// An alternate-frontend mirror.
    Mirror,
    /// Primary video lookup service (POST with the post URL).
    VideoLookup,
    /// Secondary, token-protected video lookup service.
    VideoLookupAlt,
    /// Primary user-id lookup service (POST `username=`).
    IdLookup,
    /// Secondary user-id lookup service (POST `input=`).
    IdLookupAlt,
    /// The canonical site or its link shortener.
    Canonical,
    /// Anything else, including CDN media.
    Other,
}

impl Service {
    /// Guesses the service from well-known public hostnames and paths.
    #[must_use]
    pub fn detect(url: &Url) -> Self {
        let host = url.host_str().map(canonical_host).unwrap_or_default();
        if host.contains("nitter") {
            Self::Mirror
        } else if host.contains("savetweetvid") {
            Self::VideoLookup
        } else if host.contains("ssstwitter") {
            Self::VideoLookupAlt
        } else if url.path().contains("find-twitter-id-answer") {
            Self::IdLookup
        } else if host.contains("tweeterid") {
            Self::IdLookupAlt
        } else if matches!(host.as_str(), "twitter.com" | "x.com" | "t.co" | "mobile.twitter.com") {
            Self::Canonical
        } else {
            Self::Other
        }
    }
}

/// Normalized view of a request used for fingerprinting.
#[derive(Debug, Clone, Copy)]
pub struct RequestDescriptor<'a> {
    /// Upper-case HTTP method.
    pub method: &'a str,
    /// Target URL.
    pub url: &'a Url,
    /// URL-encoded form body, when any.
    pub body: Option<&'a str>,
    /// The service the request targets.
    pub service: Service,
}

/// Derives the cache key for a request, or `None` when it is not cacheable.
#[must_use]
pub fn fingerprint(request: &RequestDescriptor<'_>) -> Option<String> {
    match request.service {
        Service::Mirror if request.method == "GET" => mirror_key(request.url),
        Service::VideoLookup => {
            let body = decoded_body(request.body?);
            capture(&BODY_STATUS_RE, &body).map(|id| format!("video-{id}"))
        }
        Service::IdLookup => {
            let body = decoded_body(request.body?);
            capture(&BODY_USERNAME_RE, &body).map(|name| format!("id-{name}"))
        }
        Service::IdLookupAlt => {
            let body = decoded_body(request.body?);
            capture(&BODY_INPUT_RE, &body).map(|name| format!("id2-{name}"))
        }
        _ => None,
    }
}

fn mirror_key(url: &Url) -> Option<String> {
    let path = url.path();
    if let Some(id) = capture(&STATUS_ID_RE, path) {
        return Some(format!("mirror-tweet-{id}"));
    }
    let name = capture(&PROFILE_PATH_RE, path)?;
    if RESERVED_MIRROR_PATHS.contains(&name.to_ascii_lowercase().as_str()) {
        return None;
    }
    Some(format!("mirror-user-{name}"))
}

fn decoded_body(body: &str) -> String {
    let spaced = body.replace('+', " ");
    urlencoding::decode(&spaced).map_or_else(|_| body.to_string(), |decoded| decoded.into_owned())
}

fn capture(regex: &Regex, haystack: &str) -> Option<String> {
    regex
        .captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
