//! Shared helpers: static regex compilation, host normalization and URL joining.

use regex::Regex;
use url::Url;

/// Compiles a regex at static init; panics on invalid pattern.
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Normalizes a host string: trim, strip leading "www.", trailing '.', and lowercases.
#[must_use]
pub fn canonical_host(host: &str) -> String {
    host.trim()
        .trim_start_matches("www.")
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

/// Returns `host[:port]` of a URL, the unit mirrors are compared by.
#[must_use]
pub fn authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{port}", canonical_host(host)),
        None => canonical_host(host),
    })
}

/// Returns the `scheme://host[:port]` origin of a URL without a trailing slash.
#[must_use]
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Resolves a possibly relative URL string against a base URL.
///
/// Returns the value as-is if it already starts with `http://` or `https://`;
/// normalizes `//...` to `https:...`; otherwise joins with `base_url`.
#[must_use]
pub fn absolutize_url(value: &str, base_url: &Url) -> Option<String> {
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    if value.starts_with("//") {
        return Some(format!("https:{value}"));
    }
    base_url.join(value).ok().map(|url| url.to_string())
}

/// Trims and returns `None` for empty text.
#[must_use]
pub fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_host_trim_www_and_trailing_dot_lowercase() {
        assert_eq!(canonical_host("  www.Nitter.NET.  "), "nitter.net");
        assert_eq!(canonical_host("twitter.com"), "twitter.com");
    }

    #[test]
    fn test_authority_includes_explicit_port() {
        let url = Url::parse("http://127.0.0.1:8080/user/status/1").unwrap();
        assert_eq!(authority(&url).as_deref(), Some("127.0.0.1:8080"));
        let url = Url::parse("https://nitter.it/user").unwrap();
        assert_eq!(authority(&url).as_deref(), Some("nitter.it"));
    }

    #[test]
    fn test_origin_of_has_no_trailing_slash() {
        let url = Url::parse("https://nitter.it/a/b?c=d").unwrap();
        assert_eq!(origin_of(&url), "https://nitter.it");
    }

    #[test]
    fn test_absolutize_url_variants() {
        let base = Url::parse("https://nitter.it/video/").unwrap();
        assert_eq!(
            absolutize_url("https://video.twimg.com/a.mp4", &base).as_deref(),
            Some("https://video.twimg.com/a.mp4")
        );
        assert_eq!(
            absolutize_url("//video.twimg.com/a.mp4", &base).as_deref(),
            Some("https://video.twimg.com/a.mp4")
        );
        assert_eq!(
            absolutize_url("/pic/a.jpg", &base).as_deref(),
            Some("https://nitter.it/pic/a.jpg")
        );
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("  hi "), Some("hi".to_string()));
        assert_eq!(non_empty("   "), None);
    }
}
