//! Immutable run configuration.
//!
//! A [`RetrievalConfig`] is built once per run (by the CLI or an embedding
//! program) and passed by reference to every component.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::cache::{DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL};

/// Environment variable overriding the cache capacity.
pub const CACHE_MAX_ENV: &str = "TWDL_CACHE_MAX";
/// Environment variable overriding the cache TTL, in milliseconds.
pub const CACHE_TTL_ENV: &str = "TWDL_CACHE_TTL";
/// Environment variable overriding the cache file location.
pub const CACHE_PATH_ENV: &str = "TWDL_CACHE_PATH";
/// Environment variable providing a default Cookie header.
pub const COOKIE_ENV: &str = "TWDL_COOKIE";

/// Default cache file name inside the OS temp directory.
pub const DEFAULT_CACHE_FILE_NAME: &str = "twdl-cache.json";

/// Body marker a mirror returns for posts that do not exist.
pub const NOT_FOUND_MARKER: &str = "Tweet not found";

/// Scraping source identifiers.
///
/// The declaration order is the merge priority: earlier variants win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    /// Alternate-frontend mirror scraper.
    Mirror,
    /// Headless-browser scraper.
    Browser,
    /// Direct scraper against the canonical site's legacy markup.
    Direct,
}

impl SourceKind {
    /// Returns the identifier used on the command line and in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mirror => "mirror",
            Self::Browser => "browser",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unknown source identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown scraper '{0}'\n  Suggestion: use one of mirror, browser, direct")]
pub struct UnknownSourceError(pub String);

impl FromStr for SourceKind {
    type Err = UnknownSourceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mirror" | "nitter" => Ok(Self::Mirror),
            "browser" | "puppeteer" => Ok(Self::Browser),
            "direct" | "twitter" => Ok(Self::Direct),
            other => Err(UnknownSourceError(other.to_string())),
        }
    }
}

/// Options recognized for one retrieval run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalConfig {
    /// Resolve shortlinks and redirects before scraping.
    pub redirect: bool,
    /// Consult and populate the response cache.
    pub cache: bool,
    /// Log a failed post and continue with the next one.
    pub ignore_errors: bool,
    /// Cookie header forwarded for authenticated scraping.
    pub cookie: Option<String>,
    /// Enabled scraping sources.
    pub sources: BTreeSet<SourceKind>,
    /// Append the author's avatar to the media list.
    pub avatar: bool,
    /// Append quoted-post media to the media list.
    pub quote: bool,
    /// Mirror base used for every mirror request instead of a random one.
    pub mirror_override: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            redirect: true,
            cache: true,
            ignore_errors: false,
            cookie: None,
            sources: BTreeSet::from([SourceKind::Mirror]),
            avatar: false,
            quote: false,
            mirror_override: None,
        }
    }
}

impl RetrievalConfig {
    /// Returns true when `kind` is enabled.
    #[must_use]
    pub fn uses(&self, kind: SourceKind) -> bool {
        self.sources.contains(&kind)
    }

    /// Returns the cookie, ignoring blank values.
    #[must_use]
    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref().filter(|c| !c.trim().is_empty())
    }
}

/// Capacity, lifetime and location of the response cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum live entries.
    pub max_entries: usize,
    /// Entry time to live.
    pub ttl: Duration,
    /// Snapshot file.
    pub path: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            ttl: DEFAULT_CACHE_TTL,
            path: std::env::temp_dir().join(DEFAULT_CACHE_FILE_NAME),
        }
    }
}

impl CacheSettings {
    /// Reads overrides from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup`; malformed numbers keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        if let Some(raw) = lookup(CACHE_MAX_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(max) => settings.max_entries = max,
                Err(_) => warn!(variable = CACHE_MAX_ENV, value = %raw, "Ignoring invalid cache size"),
            }
        }
        if let Some(raw) = lookup(CACHE_TTL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => settings.ttl = Duration::from_millis(ms),
                Err(_) => warn!(variable = CACHE_TTL_ENV, value = %raw, "Ignoring invalid cache TTL"),
            }
        }
        if let Some(path) = lookup(CACHE_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            settings.path = PathBuf::from(path);
        }
        settings
    }
}

/// Base URLs of the non-mirror services the crate talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    /// The canonical site.
    pub canonical: String,
    /// Primary video lookup form endpoint.
    pub video_lookup: String,
    /// Secondary, token-protected video lookup page.
    pub video_lookup_alt: String,
    /// Primary user-id lookup endpoint.
    pub id_lookup: String,
    /// Secondary user-id lookup endpoint.
    pub id_lookup_alt: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            canonical: "https://twitter.com".to_string(),
            video_lookup: "https://www.savetweetvid.com/downloader".to_string(),
            video_lookup_alt: "https://ssstwitter.com".to_string(),
            id_lookup: "https://tools.codeofaninja.com/find-twitter-id-answer".to_string(),
            id_lookup_alt: "https://tweeterid.com/ajax.php".to_string(),
        }
    }
}
