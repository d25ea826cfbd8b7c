//! Pool of interchangeable alternate-frontend mirrors.
//!
//! The [`MirrorRegistry`] hands out a randomly chosen mirror per request and,
//! when a request against a mirror has to be retried, rewrites the request URL
//! onto a different, independently chosen mirror. There is no active health
//! checking: mirrors that keep failing are deprioritized through a consecutive
//! failure streak and become eligible again after their next success, or when
//! every mirror in the pool is unhealthy.
//!
//! # Example
//!
//! ```
//! use twdl_core::mirror::{MirrorEndpoint, MirrorRegistry};
//!
//! let registry = MirrorRegistry::new(vec![
//!     MirrorEndpoint::parse("https://nitter.example.org").unwrap(),
//!     MirrorEndpoint::parse("https://nitter.example.net").unwrap(),
//! ])
//! .unwrap();
//!
//! let mirror = registry.select(None);
//! let url = mirror.join("/user/status/1").unwrap();
//! let moved = registry.substitute(&url);
//! assert_eq!(moved.path(), "/user/status/1");
//! ```

use dashmap::DashMap;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::util::{authority, canonical_host};

/// Consecutive failures after which a mirror is deprioritized.
pub const UNHEALTHY_STREAK: u32 = 3;

/// Host fragment that identifies mirror-style frontends outside the pool.
const MIRROR_HOST_MARKER: &str = "nitter";

/// Built-in mirror pool.
pub const DEFAULT_MIRRORS: &[&str] = &[
    "https://nitter.42l.fr",
    "https://nitter.fdn.fr",
    "https://nitter.1d4.us",
    "https://nitter.kavin.rocks",
    "https://nitter.namazso.eu",
    "https://nitter.moomoo.me",
    "https://nitter.it",
    "https://nitter.grimneko.de",
    "https://nitter.weiler.rocks",
    "https://nitter.sethforprivacy.com",
    "https://nitter.nl",
    "https://nitter.mint.lgbt",
    "https://nitter.esmailelbob.xyz",
    "https://nitter.tiekoetter.com",
    "https://nitter.privacy.com.de",
    "https://nitter.mastodon.pro",
    "https://nitter.notraxx.ch",
    "https://nitter.poast.org",
    "https://nitter.lunar.icu",
    "https://nitter.bird.froth.zone",
    "https://nitter.dcs0.hu",
    "https://nitter.cz",
    "https://nitter.privacydev.net",
    "https://nitter.kylrth.com",
    "https://nitter.foss.wtf",
];

/// Errors raised while building a mirror pool.
#[derive(Debug, Clone, Error)]
pub enum MirrorError {
    /// The mirror base is not an absolute http(s) URL.
    #[error("invalid mirror URL '{url}'\n  Suggestion: use an absolute URL such as https://nitter.example.org")]
    InvalidUrl {
        /// The rejected value.
        url: String,
    },

    /// The pool has no members.
    #[error("mirror pool is empty")]
    EmptyPool,

    /// A URL could not be moved onto another mirror.
    #[error("cannot move '{url}' onto mirror {mirror}")]
    Rehost {
        /// The URL being moved.
        url: String,
        /// The target mirror.
        mirror: String,
    },
}

/// One alternate-frontend base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorEndpoint {
    url: Url,
    authority: String,
}

impl MirrorEndpoint {
    /// Parses a mirror base URL.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::InvalidUrl`] for anything that is not an absolute
    /// http(s) URL with a host.
    pub fn parse(value: &str) -> Result<Self, MirrorError> {
        let invalid = || MirrorError::InvalidUrl {
            url: value.to_string(),
        };
        let url = Url::parse(value.trim()).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid());
        }
        let authority = authority(&url).ok_or_else(invalid)?;
        Ok(Self { url, authority })
    }

    /// Returns the base URL without a trailing slash.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str().trim_end_matches('/')
    }

    /// Returns the `host[:port]` identity of this mirror.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Joins an absolute path (`/user/status/1`) onto the mirror base.
    ///
    /// # Errors
    ///
    /// Returns the URL parser error when the path cannot be joined.
    pub fn join(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}{path}", self.as_str()))
    }

    /// Moves `url` onto this mirror, keeping path, query and fragment.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Rehost`] when `url` cannot carry this mirror's
    /// scheme, host or port (for example a `data:` URL).
    pub fn rehost(&self, url: &Url) -> Result<Url, MirrorError> {
        let mut moved = url.clone();
        let rewritten = moved.set_scheme(self.url.scheme()).is_ok()
            && moved.set_host(self.url.host_str()).is_ok()
            && moved.set_port(self.url.port()).is_ok();
        if !rewritten {
            return Err(MirrorError::Rehost {
                url: url.to_string(),
                mirror: self.as_str().to_string(),
            });
        }
        Ok(moved)
    }
}

/// Static pool of mirrors with random selection and retry-time substitution.
#[derive(Debug)]
pub struct MirrorRegistry {
    pool: Vec<MirrorEndpoint>,
    pinned: Option<MirrorEndpoint>,
    streaks: DashMap<String, u32>,
}

impl MirrorRegistry {
    /// Creates a registry over the given pool.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::EmptyPool`] when `pool` is empty.
    pub fn new(pool: Vec<MirrorEndpoint>) -> Result<Self, MirrorError> {
        if pool.is_empty() {
            return Err(MirrorError::EmptyPool);
        }
        Ok(Self {
            pool,
            pinned: None,
            streaks: DashMap::new(),
        })
    }

    /// Creates a registry over [`DEFAULT_MIRRORS`].
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError`] only if the built-in list is malformed.
    pub fn with_defaults() -> Result<Self, MirrorError> {
        let pool = DEFAULT_MIRRORS
            .iter()
            .map(|value| MirrorEndpoint::parse(value))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(pool)
    }

    /// Pins a mirror that [`select`](Self::select) returns instead of a random one.
    #[must_use]
    pub fn with_pinned(mut self, pinned: Option<MirrorEndpoint>) -> Self {
        self.pinned = pinned;
        self
    }

    /// Returns the pool members.
    #[must_use]
    pub fn pool(&self) -> &[MirrorEndpoint] {
        &self.pool
    }

    /// Picks the mirror for a new request.
    ///
    /// An explicit override wins verbatim, then a pinned mirror, then a
    /// uniformly random healthy pool member.
    #[must_use]
    pub fn select(&self, override_endpoint: Option<&MirrorEndpoint>) -> MirrorEndpoint {
        if let Some(endpoint) = override_endpoint.or(self.pinned.as_ref()) {
            return endpoint.clone();
        }
        self.pick_random(None)
    }

    /// Rewrites a failing mirror URL onto a newly chosen mirror.
    ///
    /// Records a failure for the failing host. URLs that do not target a
    /// mirror are returned unchanged.
    #[must_use]
    pub fn substitute(&self, failing: &Url) -> Url {
        if !self.is_mirror_url(failing) {
            return failing.clone();
        }
        let failing_authority = authority(failing);
        if let Some(key) = &failing_authority {
            self.record_failure_for(key);
        }

        let replacement = self.pick_random(failing_authority.as_deref());
        match replacement.rehost(failing) {
            Ok(moved) => {
                debug!(
                    from = failing_authority.as_deref().unwrap_or_default(),
                    to = replacement.authority(),
                    "Substituted mirror"
                );
                moved
            }
            Err(error) => {
                debug!(error = %error, "Keeping the failing mirror");
                failing.clone()
            }
        }
    }

    /// Returns true when `url` targets a pool member, the pinned mirror, or a
    /// host that looks like a mirror frontend.
    #[must_use]
    pub fn is_mirror_url(&self, url: &Url) -> bool {
        let Some(key) = authority(url) else {
            return false;
        };
        self.pool
            .iter()
            .chain(self.pinned.iter())
            .any(|endpoint| endpoint.authority() == key)
            || url
                .host_str()
                .is_some_and(|host| canonical_host(host).contains(MIRROR_HOST_MARKER))
    }

    /// Clears the failure streak of the mirror that served `url`.
    pub fn record_success(&self, url: &Url) {
        if let Some(key) = authority(url) {
            self.streaks.remove(&key);
        }
    }

    /// Counts one more consecutive failure for the mirror that served `url`.
    pub fn record_failure(&self, url: &Url) {
        if let Some(key) = authority(url) {
            self.record_failure_for(&key);
        }
    }

    /// Returns the current consecutive failure count for a mirror authority.
    #[must_use]
    pub fn failure_streak(&self, authority: &str) -> u32 {
        self.streaks.get(authority).map_or(0, |entry| *entry)
    }

    fn record_failure_for(&self, key: &str) {
        let mut entry = self.streaks.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
        if *entry == UNHEALTHY_STREAK {
            warn!(mirror = key, streak = *entry, "Mirror deprioritized after repeated failures");
        }
    }

    fn is_healthy(&self, endpoint: &MirrorEndpoint) -> bool {
        self.failure_streak(endpoint.authority()) < UNHEALTHY_STREAK
    }

    fn pick_random(&self, exclude: Option<&str>) -> MirrorEndpoint {
        let not_excluded =
            |endpoint: &&MirrorEndpoint| exclude.is_none_or(|key| endpoint.authority() != key);

        let healthy: Vec<&MirrorEndpoint> = self
            .pool
            .iter()
            .filter(not_excluded)
            .filter(|endpoint| self.is_healthy(endpoint))
            .collect();
        let candidates = if healthy.is_empty() {
            let others: Vec<&MirrorEndpoint> = self.pool.iter().filter(not_excluded).collect();
            if others.is_empty() {
                self.pool.iter().collect()
            } else {
                others
            }
        } else {
            healthy
        };

        let mut rng = rand::thread_rng();
        candidates
            .choose(&mut rng)
            .map(|endpoint| (*endpoint).clone())
            .unwrap_or_else(|| self.pool[0].clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registry(bases: &[&str]) -> MirrorRegistry {
        MirrorRegistry::new(
            bases
                .iter()
                .map(|base| MirrorEndpoint::parse(base).unwrap())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_default_pool_parses() {
        let registry = MirrorRegistry::with_defaults().unwrap();
        assert_eq!(registry.pool().len(), DEFAULT_MIRRORS.len());
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(matches!(
            MirrorRegistry::new(Vec::new()),
            Err(MirrorError::EmptyPool)
        ));
    }

    #[test]
    fn test_invalid_mirror_rejected() {
        assert!(MirrorEndpoint::parse("not a url").is_err());
        assert!(MirrorEndpoint::parse("ftp://nitter.example.org").is_err());
    }

    #[test]
    fn test_select_returns_pool_member() {
        let registry = registry(&["https://a.example", "https://b.example"]);
        for _ in 0..20 {
            let selected = registry.select(None);
            assert!(registry.pool().contains(&selected));
        }
    }

    #[test]
    fn test_select_override_returned_verbatim() {
        let registry = registry(&["https://a.example"]);
        let custom = MirrorEndpoint::parse("https://custom.example:8443").unwrap();
        assert_eq!(registry.select(Some(&custom)), custom);
    }

    #[test]
    fn test_select_uses_pinned_mirror() {
        let pinned = MirrorEndpoint::parse("https://pinned.example").unwrap();
        let registry = registry(&["https://a.example"]).with_pinned(Some(pinned.clone()));
        assert_eq!(registry.select(None), pinned);
    }

    #[test]
    fn test_substitute_moves_to_other_mirror_and_keeps_path() {
        let registry = registry(&["https://a.example", "https://b.example"]);
        let failing = Url::parse("https://a.example/user/status/42?x=1").unwrap();
        let moved = registry.substitute(&failing);
        assert_eq!(moved.host_str(), Some("b.example"));
        assert_eq!(moved.path(), "/user/status/42");
        assert_eq!(moved.query(), Some("x=1"));
        assert_eq!(registry.failure_streak("a.example"), 1);
    }

    #[test]
    fn test_substitute_rewrites_port() {
        let registry = registry(&["http://127.0.0.1:1000", "http://127.0.0.1:2000"]);
        let failing = Url::parse("http://127.0.0.1:1000/u/status/1").unwrap();
        let moved = registry.substitute(&failing);
        assert_eq!(moved.port(), Some(2000));
    }

    #[test]
    fn test_rehost_rejects_url_without_host() {
        let mirror = MirrorEndpoint::parse("https://b.example").unwrap();
        let url = Url::parse("data:text/plain,hello").unwrap();
        assert!(matches!(
            mirror.rehost(&url),
            Err(MirrorError::Rehost { .. })
        ));

        let url = Url::parse("http://a.example:8080/u/status/1?x=1").unwrap();
        let moved = mirror.rehost(&url).unwrap();
        assert_eq!(moved.as_str(), "https://b.example/u/status/1?x=1");
    }

    #[test]
    fn test_substitute_leaves_non_mirror_untouched() {
        let registry = registry(&["https://a.example"]);
        let url = Url::parse("https://twitter.com/user/status/1").unwrap();
        assert_eq!(registry.substitute(&url), url);
    }

    #[test]
    fn test_is_mirror_url_recognizes_marker_hosts() {
        let registry = registry(&["https://a.example"]);
        assert!(registry.is_mirror_url(&Url::parse("https://nitter.unknown.org/x").unwrap()));
        assert!(registry.is_mirror_url(&Url::parse("https://a.example/x").unwrap()));
        assert!(!registry.is_mirror_url(&Url::parse("https://twitter.com/x").unwrap()));
    }

    #[test]
    fn test_unhealthy_mirror_is_deprioritized_until_success() {
        let registry = registry(&["https://a.example", "https://b.example"]);
        let a = Url::parse("https://a.example/").unwrap();
        for _ in 0..UNHEALTHY_STREAK {
            registry.record_failure(&a);
        }
        for _ in 0..20 {
            assert_eq!(registry.select(None).authority(), "b.example");
        }
        registry.record_success(&a);
        assert_eq!(registry.failure_streak("a.example"), 0);
    }

    #[test]
    fn test_all_unhealthy_falls_back_to_whole_pool() {
        let registry = registry(&["https://a.example"]);
        let a = Url::parse("https://a.example/").unwrap();
        for _ in 0..UNHEALTHY_STREAK + 2 {
            registry.record_failure(&a);
        }
        assert_eq!(registry.select(None).authority(), "a.example");
    }
}
