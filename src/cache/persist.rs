//! On-disk snapshot of the cache.
//!
//! The snapshot is a single JSON document mapping fingerprint keys to
//! base64-encoded bodies plus their TTL metadata. It is written once at
//! shutdown and read once at startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::store::CacheStore;

/// Errors raised while saving a cache snapshot.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The snapshot file could not be written.
    #[error("cannot write cache file {path}: {source}")]
    Io {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The snapshot could not be serialized.
    #[error("cannot serialize cache snapshot: {source}")]
    Serialize {
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    /// Creates an I/O error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// One persisted cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Base64 of the cached body.
    pub value: String,
    /// Insertion time in milliseconds since the Unix epoch.
    pub inserted_at_ms: u64,
    /// Time to live in milliseconds.
    pub ttl_ms: u64,
}

impl SnapshotEntry {
    /// Encodes raw bytes into a snapshot entry.
    #[must_use]
    pub fn new(value: &[u8], inserted_at_ms: u64, ttl_ms: u64) -> Self {
        Self {
            value: STANDARD.encode(value),
            inserted_at_ms,
            ttl_ms,
        }
    }

    /// Decodes the stored body, `None` if the base64 is damaged.
    #[must_use]
    pub fn decode_value(&self) -> Option<Vec<u8>> {
        STANDARD.decode(self.value.as_bytes()).ok()
    }
}

/// Serializable image of a [`CacheStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// Entries keyed by fingerprint.
    pub entries: BTreeMap<String, SnapshotEntry>,
}

impl CacheSnapshot {
    /// Reads a snapshot file.
    ///
    /// A missing, unreadable or corrupt file yields an empty snapshot.
    #[must_use]
    pub fn read_from(path: &Path) -> Self {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No cache file loaded");
                return Self::default();
            }
        };
        serde_json::from_slice(&raw).unwrap_or_else(|e| {
            debug!(path = %path.display(), error = %e, "Ignoring corrupt cache file");
            Self::default()
        })
    }

    /// Writes the snapshot as JSON, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when serialization or the write fails.
    pub fn write_to(&self, path: &Path) -> Result<(), CacheError> {
        let json = serde_json::to_vec(self).map_err(|source| CacheError::Serialize { source })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        std::fs::write(path, json).map_err(|e| CacheError::io(path, e))
    }
}

impl CacheStore {
    /// Loads live entries from a snapshot file into this store.
    ///
    /// Returns the number of entries loaded; never fails.
    pub fn load_from(&self, path: &Path) -> usize {
        let loaded = self.reload(CacheSnapshot::read_from(path));
        if loaded > 0 {
            info!(entries = loaded, path = %path.display(), "Loaded response cache");
        }
        loaded
    }

    /// Saves every live entry to a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<(), CacheError> {
        let snapshot = self.dump();
        debug!(entries = snapshot.entries.len(), path = %path.display(), "Saving response cache");
        snapshot.write_to(path)
    }
}
