//! Response cache keyed by semantic request fingerprints.

mod fingerprint;
mod persist;
mod store;

pub use fingerprint::{RequestDescriptor, Service, fingerprint};
pub use persist::{CacheError, CacheSnapshot, SnapshotEntry};
pub use store::{CacheStore, DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL};
