//! Redirect handling and canonical-site URL normalization.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::util::{canonical_host, compile_static_regex};

/// Maximum redirect hops followed for one attempt.
pub const MAX_REDIRECTS: usize = 10;

/// Scheme and host every canonical-site URL is rewritten to.
pub const CANONICAL_ORIGIN: &str = "https://twitter.com";

/// Hosts serving the canonical site under another name.
const CANONICAL_HOSTS: &[&str] = &["twitter.com", "x.com", "mobile.twitter.com"];

static META_REFRESH_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?i)content="[0-9];URL=([^"]+)""#));

/// What to do with a redirect response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectStep {
    /// Follow to the target and keep following further redirects.
    Follow(Url),
    /// Follow to the canonicalized target once, then stop.
    FollowOnce(Url),
}

/// Returns true for statuses that carry a `Location` to follow.
#[must_use]
pub fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Returns true when `url` points at the canonical site.
#[must_use]
pub fn is_canonical_site(url: &Url) -> bool {
    url.host_str()
        .map(canonical_host)
        .is_some_and(|host| CANONICAL_HOSTS.contains(&host.as_str()))
}

/// Rewrites a canonical-site URL to `https://twitter.com/<path>` with no query
/// or fragment. Other URLs are returned unchanged.
#[must_use]
pub fn canonicalize(url: &Url) -> Url {
    if !is_canonical_site(url) {
        return url.clone();
    }
    let path = url.path().trim_end_matches('/');
    Url::parse(&format!("{CANONICAL_ORIGIN}{path}")).unwrap_or_else(|_| url.clone())
}

/// Plans the next hop for a redirect from `current` to `location`.
///
/// A 302 from the canonical site is resolved to an absolute canonical URL and
/// followed once; anything else is followed normally. Returns `None` when the
/// location cannot be resolved.
#[must_use]
pub fn plan_redirect(current: &Url, status: u16, location: &str) -> Option<RedirectStep> {
    let target = current.join(location.trim()).ok()?;
    if status == 302 && is_canonical_site(current) {
        return Some(RedirectStep::FollowOnce(canonicalize(&target)));
    }
    Some(RedirectStep::Follow(target))
}

/// Extracts the target of a `<meta http-equiv="refresh">` tag.
#[must_use]
pub fn meta_refresh_target(body: &str) -> Option<String> {
    META_REFRESH_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace("&amp;", "&"))
}
