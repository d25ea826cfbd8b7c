//! Browser User-Agent strings for mirror, lookup-service and canonical-site traffic.
//!
//! Requests rotate through a small pool of mainstream browser identities so that
//! consecutive requests to the same mirror are not trivially fingerprintable.

use rand::seq::SliceRandom;

/// Desktop browser identities used for rotation.
const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) \
     Version/17.3.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/122.0.0.0 Safari/537.36",
];

/// User-Agent that makes the canonical site serve its legacy, script-free markup.
pub const LEGACY_MARKUP_USER_AGENT: &str =
    "Opera/9.80 (Windows NT 6.1; WOW64) Presto/2.12.388 Version/12.18 Bot";

/// Returns a randomly chosen browser User-Agent.
#[must_use]
pub fn random_browser_user_agent() -> &'static str {
    BROWSER_USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(LEGACY_MARKUP_USER_AGENT)
}

/// Returns `custom` when provided, otherwise a rotated browser User-Agent.
#[must_use]
pub fn user_agent_or_random(custom: Option<&str>) -> &str {
    match custom {
        Some(value) if !value.trim().is_empty() => value,
        _ => random_browser_user_agent(),
    }
}
