//! Bounded, time-expiring response cache.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use super::persist::{CacheSnapshot, SnapshotEntry};

/// Default maximum number of live entries.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 500;

/// Default time-to-live of an entry (one hour).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Vec<u8>,
    inserted_at_ms: u64,
    ttl_ms: u64,
    last_used: u64,
}

impl StoredEntry {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.inserted_at_ms) >= self.ttl_ms
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, StoredEntry>,
    /// Monotonic use counter for LRU ordering.
    tick: u64,
}

impl CacheInner {
    fn next_tick(&mut self) -> u64 {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }

    fn purge_expired(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now_ms));
        before - self.entries.len()
    }

    fn evict_least_recently_used(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            trace!(key = %key, "Evicting least recently used cache entry");
            self.entries.remove(&key);
        }
    }
}

/// LRU cache with per-entry TTL, keyed by request fingerprint.
///
/// Expired entries are invisible to reads and are removed lazily: on the
/// read that finds them, and in bulk whenever an insert hits capacity.
/// Writes are first-writer-wins: a live entry is never overwritten.
#[derive(Debug)]
pub struct CacheStore {
    inner: Mutex<CacheInner>,
    max_entries: usize,
    ttl: Duration,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL)
    }
}

impl CacheStore {
    /// Creates an empty cache bounded to `max_entries` live entries.
    #[must_use]
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_entries,
            ttl,
        }
    }

    /// Returns the configured capacity.
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Returns the configured entry TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached bytes for `key`, or `None` on miss or expiry.
    #[must_use]
    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        let now = now_ms();
        let mut inner = self.lock();
        let expired = inner.entries.get(key)?.is_expired(now);
        if expired {
            inner.entries.remove(key);
            trace!(key, "Cache entry expired");
            return None;
        }
        let tick = inner.next_tick();
        let entry = inner.entries.get_mut(key)?;
        entry.last_used = tick;
        Some(entry.value.clone())
    }

    /// Stores `value` under `key` unless a live entry already exists.
    ///
    /// Returns true when the value was inserted.
    pub fn write(&self, key: &str, value: Vec<u8>) -> bool {
        let ttl_ms = duration_ms(self.ttl);
        self.insert_entry(key, value, now_ms(), ttl_ms)
    }

    /// Returns true when a live entry exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = now_ms();
        self.lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Returns the number of stored entries, including not-yet-purged expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Captures every live entry with its TTL metadata.
    #[must_use]
    pub fn dump(&self) -> CacheSnapshot {
        let now = now_ms();
        let inner = self.lock();
        let entries = inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| {
                (
                    key.clone(),
                    SnapshotEntry::new(&entry.value, entry.inserted_at_ms, entry.ttl_ms),
                )
            })
            .collect();
        CacheSnapshot { entries }
    }

    /// Loads entries from a snapshot, silently dropping expired and undecodable ones.
    ///
    /// Entries keep their original insertion time, so their TTL keeps running
    /// from when they were first cached. Returns the number of entries loaded.
    pub fn reload(&self, snapshot: CacheSnapshot) -> usize {
        let now = now_ms();
        let mut ordered: Vec<(String, SnapshotEntry)> = snapshot.entries.into_iter().collect();
        ordered.sort_by_key(|(_, entry)| entry.inserted_at_ms);

        let mut loaded = 0;
        let mut dropped = 0;
        for (key, entry) in ordered {
            if now.saturating_sub(entry.inserted_at_ms) >= entry.ttl_ms {
                dropped += 1;
                continue;
            }
            let Some(value) = entry.decode_value() else {
                dropped += 1;
                continue;
            };
            if self.insert_entry(&key, value, entry.inserted_at_ms, entry.ttl_ms) {
                loaded += 1;
            }
        }
        debug!(loaded, dropped, "Reloaded cache snapshot");
        loaded
    }

    fn insert_entry(&self, key: &str, value: Vec<u8>, inserted_at_ms: u64, ttl_ms: u64) -> bool {
        if self.max_entries == 0 {
            return false;
        }
        let now = now_ms();
        let mut inner = self.lock();
        if inner
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
        {
            return false;
        }
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.max_entries {
            inner.purge_expired(now);
            while inner.entries.len() >= self.max_entries {
                inner.evict_least_recently_used();
            }
        }
        let last_used = inner.next_tick();
        inner.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                inserted_at_ms,
                ttl_ms,
                last_used,
            },
        );
        true
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, duration_ms)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_read_miss_then_hit() {
        let cache = CacheStore::default();
        assert_eq!(cache.read("mirror-tweet-1"), None);
        assert!(cache.write("mirror-tweet-1", b"<html>".to_vec()));
        assert_eq!(cache.read("mirror-tweet-1"), Some(b"<html>".to_vec()));
    }

    #[test]
    fn test_first_writer_wins() {
        let cache = CacheStore::default();
        assert!(cache.write("video-1", b"first".to_vec()));
        assert!(!cache.write("video-1", b"second".to_vec()));
        assert_eq!(cache.read("video-1"), Some(b"first".to_vec()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_invisible_and_replaceable() {
        let cache = CacheStore::new(10, Duration::ZERO);
        assert!(cache.write("id-user", b"1".to_vec()));
        assert!(!cache.contains("id-user"));
        assert_eq!(cache.read("id-user"), None);
        assert!(cache.write("id-user", b"2".to_vec()));
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let cache = CacheStore::new(2, DEFAULT_CACHE_TTL);
        cache.write("a", b"a".to_vec());
        cache.write("b", b"b".to_vec());
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.read("a").is_some());
        cache.write("c", b"c".to_vec());
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = CacheStore::new(0, DEFAULT_CACHE_TTL);
        assert!(!cache.write("a", b"a".to_vec()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_dump_and_reload_round_trip() {
        let cache = CacheStore::default();
        cache.write("mirror-tweet-1", b"one".to_vec());
        cache.write("mirror-user-bob", b"two".to_vec());

        let restored = CacheStore::default();
        assert_eq!(restored.reload(cache.dump()), 2);
        assert_eq!(restored.read("mirror-tweet-1"), Some(b"one".to_vec()));
        assert_eq!(restored.read("mirror-user-bob"), Some(b"two".to_vec()));
    }

    #[test]
    fn test_reload_drops_entries_expired_since_dump() {
        let mut snapshot = CacheStore::default().dump();
        snapshot.entries.insert(
            "video-1".to_string(),
            SnapshotEntry::new(b"stale", now_ms() - 10_000, 5_000),
        );
        snapshot.entries.insert(
            "video-2".to_string(),
            SnapshotEntry::new(b"fresh", now_ms(), 60_000),
        );

        let cache = CacheStore::default();
        assert_eq!(cache.reload(snapshot), 1);
        assert_eq!(cache.read("video-1"), None);
        assert_eq!(cache.read("video-2"), Some(b"fresh".to_vec()));
    }
}
