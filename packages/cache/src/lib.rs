#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory cache for derived market views.
//!
//! Memoizes merged collections, flow edges, and statistics so that
//! re-selecting a commodity or date does not redo the join. Entries expire
//! after a fixed TTL and the cache never holds more than a fixed number of
//! entries (oldest evicted first). Large payloads are stored
//! gzip-compressed.
//!
//! A miss never produces a wrong result, only recomputation. The cache is
//! an explicit value owned by the caller; there is no global instance.

pub mod clock;
pub mod key;

use std::collections::BTreeMap;
use std::io::{Read as _, Write as _};

use chrono::{DateTime, TimeDelta, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{cache_key, fingerprint};

/// Default time-to-live: 30 minutes.
pub const DEFAULT_TTL_SECS: u64 = 30 * 60;

/// Default maximum number of entries.
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Default size above which payloads are compressed: 100 KiB.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 100 * 1024;

/// Errors that can occur while storing or keying cache entries.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The value could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cache limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this many seconds are stale.
    pub ttl_secs: u64,
    /// Maximum number of entries held at once.
    pub max_entries: usize,
    /// Serialized payloads larger than this many bytes are compressed.
    pub compression_threshold_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            max_entries: DEFAULT_MAX_ENTRIES,
            compression_threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl CacheConfig {
    /// The TTL as a [`TimeDelta`], saturating for absurdly large values.
    #[must_use]
    pub fn ttl(&self) -> TimeDelta {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

#[derive(Debug, Clone)]
enum Payload {
    Plain(String),
    Compressed(Vec<u8>),
}

impl Payload {
    const fn len(&self) -> usize {
        match self {
            Self::Plain(s) => s.len(),
            Self::Compressed(bytes) => bytes.len(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Payload,
    timestamp: DateTime<Utc>,
    /// Write order, for entries written at the same instant.
    sequence: u64,
}

impl CacheEntry {
    const fn compressed(&self) -> bool {
        matches!(self.payload, Payload::Compressed(_))
    }
}

/// Entry counts and sizes, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of entries, stale ones included.
    pub entries: usize,
    /// Number of compressed entries.
    pub compressed_entries: usize,
    /// Bytes held by payloads.
    pub stored_bytes: usize,
}

/// Key -> JSON payload store with TTL and size bounds.
pub struct MarketCache<C: Clock = SystemClock> {
    entries: BTreeMap<String, CacheEntry>,
    config: CacheConfig,
    clock: C,
    next_sequence: u64,
}

impl MarketCache<SystemClock> {
    /// Creates a cache backed by the system clock.
    #[must_use]
    pub const fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for MarketCache<SystemClock> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<C: Clock> std::fmt::Debug for MarketCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketCache")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: Clock> MarketCache<C> {
    /// Creates a cache with an explicit clock.
    #[must_use]
    pub const fn with_clock(config: CacheConfig, clock: C) -> Self {
        Self {
            entries: BTreeMap::new(),
            config,
            clock,
            next_sequence: 0,
        }
    }

    /// The configured limits.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.timestamp) > self.config.ttl()
    }

    /// Returns the cached value for `key`.
    ///
    /// Returns `None` if the key is absent or stale (stale entries are
    /// evicted), or if the stored payload cannot be decoded as `T`.
    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let entry = self.entries.get(key)?;

        if self.is_expired(entry, now) {
            log::debug!("Cache entry '{key}' expired");
            self.entries.remove(key);
            return None;
        }

        match decode(&entry.payload) {
            Ok(value) => {
                log::debug!("Cache hit for '{key}'");
                Some(value)
            }
            Err(e) => {
                log::warn!("Evicting undecodable cache entry '{key}': {e}");
                self.entries.remove(key);
                None
            }
        }
    }

    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// Payloads above the compression threshold are stored compressed.
    /// Afterwards the oldest entries are evicted until the cache is within
    /// its entry limit.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if `value` cannot be serialized or compressed.
    pub fn set<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), CacheError> {
        let key = key.into();
        let json = serde_json::to_string(value)?;

        let payload = if json.len() > self.config.compression_threshold_bytes {
            let compressed = compress(&json)?;
            log::debug!(
                "Compressed cache entry '{key}' from {} to {} bytes",
                json.len(),
                compressed.len()
            );
            Payload::Compressed(compressed)
        } else {
            Payload::Plain(json)
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(
            key,
            CacheEntry {
                payload,
                timestamp: self.clock.now(),
                sequence,
            },
        );
        self.enforce_limit();

        Ok(())
    }

    /// Returns `true` if a fresh entry exists for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .get(key)
            .is_some_and(|entry| !self.is_expired(entry, now))
    }

    /// Removes one entry. Returns `true` if it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every stale entry. Returns how many were removed.
    pub fn clear_expired(&mut self) -> usize {
        let now = self.clock.now();
        let ttl = self.config.ttl();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.signed_duration_since(entry.timestamp) <= ttl);
        let removed = before - self.entries.len();
        if removed > 0 {
            log::debug!("Cleared {removed} expired cache entries");
        }
        removed
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry counts and sizes.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            compressed_entries: self.entries.values().filter(|e| e.compressed()).count(),
            stored_bytes: self.entries.values().map(|e| e.payload.len()).sum(),
        }
    }

    /// Evicts the oldest entries until the entry limit holds. Ties on
    /// timestamp are broken by write order, so the entry just written is
    /// always the last candidate.
    fn enforce_limit(&mut self) {
        let excess = self.entries.len().saturating_sub(self.config.max_entries);
        if excess == 0 {
            return;
        }

        let mut by_age: Vec<(DateTime<Utc>, u64, String)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.timestamp, entry.sequence, key.clone()))
            .collect();
        by_age.sort();

        for (_, _, key) in by_age.into_iter().take(excess) {
            log::debug!("Evicting cache entry '{key}' (limit {})", self.config.max_entries);
            self.entries.remove(&key);
        }
    }
}

fn compress(json: &str) -> Result<Vec<u8>, CacheError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json.as_bytes())?;
    Ok(encoder.finish()?)
}

fn decode<T: DeserializeOwned>(payload: &Payload) -> Result<T, CacheError> {
    match payload {
        Payload::Plain(json) => Ok(serde_json::from_str(json)?),
        Payload::Compressed(bytes) => {
            let mut json = String::new();
            GzDecoder::new(bytes.as_slice()).read_to_string(&mut json)?;
            Ok(serde_json::from_str(&json)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn cache_with(config: CacheConfig) -> (MarketCache<ManualClock>, ManualClock) {
        let clock = ManualClock::default();
        (MarketCache::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn round_trips_values() {
        let (mut cache, _) = cache_with(CacheConfig::default());
        let value = json!({ "features": [{ "id": "sanaa_wheat", "price": 100.5 }] });

        cache.set("merged:abc", &value).unwrap();
        assert_eq!(cache.get::<Value>("merged:abc"), Some(value));
        assert_eq!(cache.get::<Value>("missing"), None);
    }

    #[test]
    fn expires_after_ttl() {
        let (mut cache, clock) = cache_with(CacheConfig::default());
        cache.set("k", &vec![1, 2, 3]).unwrap();

        clock.advance(TimeDelta::minutes(30));
        assert_eq!(cache.get::<Vec<i32>>("k"), Some(vec![1, 2, 3]));

        clock.advance(TimeDelta::seconds(1));
        assert!(!cache.contains_key("k"));
        assert_eq!(cache.get::<Vec<i32>>("k"), None);
        assert!(cache.is_empty(), "expired entry should be evicted on read");
    }

    #[test]
    fn set_refreshes_timestamp() {
        let (mut cache, clock) = cache_with(CacheConfig::default());
        cache.set("k", &1).unwrap();
        clock.advance(TimeDelta::minutes(20));
        cache.set("k", &2).unwrap();
        clock.advance(TimeDelta::minutes(20));
        assert_eq!(cache.get::<i32>("k"), Some(2));
    }

    #[test]
    fn never_exceeds_max_entries() {
        let (mut cache, clock) = cache_with(CacheConfig {
            max_entries: 5,
            ..CacheConfig::default()
        });

        for i in 0..200 {
            cache.set(format!("key-{i}"), &i).unwrap();
            assert!(cache.len() <= 5);
            if i % 3 == 0 {
                clock.advance(TimeDelta::seconds(1));
            }
        }
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn evicts_oldest_first() {
        let (mut cache, clock) = cache_with(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });

        cache.set("a", &1).unwrap();
        clock.advance(TimeDelta::seconds(1));
        cache.set("b", &2).unwrap();
        clock.advance(TimeDelta::seconds(1));
        cache.set("a", &3).unwrap();
        clock.advance(TimeDelta::seconds(1));
        cache.set("c", &4).unwrap();

        assert_eq!(cache.get::<i32>("b"), None);
        assert_eq!(cache.get::<i32>("a"), Some(3));
        assert_eq!(cache.get::<i32>("c"), Some(4));
    }

    #[test]
    fn same_instant_writes_evict_the_earlier_entry() {
        let (mut cache, _) = cache_with(CacheConfig {
            max_entries: 1,
            ..CacheConfig::default()
        });

        cache.set("b", &1).unwrap();
        cache.set("a", &2).unwrap();

        assert_eq!(cache.get::<i32>("a"), Some(2));
        assert_eq!(cache.get::<i32>("b"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn rewriting_a_key_makes_it_newest() {
        let (mut cache, _) = cache_with(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });

        cache.set("a", &1).unwrap();
        cache.set("b", &2).unwrap();
        cache.set("a", &3).unwrap();
        cache.set("c", &4).unwrap();

        assert_eq!(cache.get::<i32>("b"), None);
        assert_eq!(cache.get::<i32>("a"), Some(3));
        assert_eq!(cache.get::<i32>("c"), Some(4));
    }

    #[test]
    fn compresses_large_payloads() {
        let (mut cache, _) = cache_with(CacheConfig {
            compression_threshold_bytes: 64,
            ..CacheConfig::default()
        });
        let large: Vec<String> = (0..100).map(|i| format!("region-{i}")).collect();

        cache.set("small", "tiny").unwrap();
        cache.set("large", &large).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.compressed_entries, 1);
        assert_eq!(cache.get::<Vec<String>>("large"), Some(large));
        assert_eq!(cache.get::<String>("small").as_deref(), Some("tiny"));
    }

    #[test]
    fn type_mismatch_is_a_miss() {
        let (mut cache, _) = cache_with(CacheConfig::default());
        cache.set("k", "text").unwrap();
        assert_eq!(cache.get::<Vec<i32>>("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn clears_expired_entries() {
        let (mut cache, clock) = cache_with(CacheConfig::default());
        cache.set("old", &1).unwrap();
        clock.advance(TimeDelta::minutes(45));
        cache.set("new", &2).unwrap();

        assert_eq!(cache.clear_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key("new"));

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn removes_single_entries() {
        let (mut cache, _) = cache_with(CacheConfig::default());
        cache.set("k", &1).unwrap();
        assert!(cache.remove("k"));
        assert!(!cache.remove("k"));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: CacheConfig = serde_json::from_value(json!({ "max_entries": 10 })).unwrap();
        assert_eq!(config.max_entries, 10);
        assert_eq!(config.ttl_secs, DEFAULT_TTL_SECS);
        assert_eq!(config.ttl(), TimeDelta::minutes(30));
    }
}
