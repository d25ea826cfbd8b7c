//! twdl core library
//!
//! Resolves social-media post references into media URLs through a pool of
//! unreliable alternate-frontend mirrors, a couple of lookup services and the
//! canonical site, and hands the merged result to a downloader.
//!
//! # Architecture
//!
//! - [`mirror`] - mirror pool with random selection and retry-time substitution
//! - [`cache`] - bounded TTL cache keyed by semantic request fingerprints
//! - [`fetch`] - shared HTTP client: cache, retry, mirror substitution, redirects
//! - [`reference`] - shortlink expansion and `(username, post id)` parsing
//! - [`source`] - pluggable scrapers (mirror, browser, direct) and id lookup
//! - [`video`] - best-quality video discovery and HLS variant selection
//! - [`orchestrator`] - per-post fan-out, merge and batch policy

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod mirror;
pub mod orchestrator;
pub mod reference;
pub mod source;
pub mod user_agent;
pub mod util;
pub mod video;

// Re-export commonly used types
pub use cache::{CacheError, CacheSnapshot, CacheStore};
pub use config::{CacheSettings, RetrievalConfig, ServiceEndpoints, SourceKind};
pub use error::{FailureClass, RetrievalError};
pub use fetch::{FetchClient, FetchError, FetchRequest, FetchResponse, RetryPolicy};
pub use mirror::{MirrorEndpoint, MirrorError, MirrorRegistry};
pub use orchestrator::{
    ListingDownloader, MediaDownloader, Orchestrator, RetrievalResult, RetrievalStatus,
};
pub use reference::{PostReference, ReferenceError};
pub use source::{BrowserDriver, MediaBundle, Source, SourceError};
pub use video::{ManifestError, VideoResolver};
