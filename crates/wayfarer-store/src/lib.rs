//! # Wayfarer Store
//!
//! Named durable caches for the Wayfarer offline worker.
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage
//!     ├── Cache "wayfarer-precache-v1.1.0"
//!     │       └── url → CacheEntry
//!     └── Cache "wayfarer-runtime-v1.1.0"
//!             └── url → CacheEntry
//! ```
//!
//! Entries are immutable response snapshots stamped with an explicit store
//! time. Retention pruning reads that stamp, never response headers, so an
//! entry produced without a usable `date` header is still prunable.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;
use wayfarer_net::Response;

// ==================== Errors ====================

/// Errors that can occur in cache storage operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Invalid cache entry: {0}")]
    InvalidEntry(String),
}

// ==================== Entry ====================

/// A cached request/response pair.
///
/// The store time is written explicitly at `put` time; pruning never parses
/// response metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (the cache key).
    pub url: Url,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Bytes,

    /// Store time (ms since epoch).
    pub stored_at_ms: u64,
}

impl CacheEntry {
    /// Snapshot a response into an entry stamped with the current time.
    pub fn from_response(response: &Response) -> Self {
        Self::from_response_at(response, now_ms())
    }

    /// Snapshot a response into an entry with an explicit store time.
    pub fn from_response_at(response: &Response, stored_at_ms: u64) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: response.url.clone(),
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            stored_at_ms,
        }
    }

    /// Rebuild a response snapshot from this entry.
    pub fn to_response(&self) -> Result<Response, StoreError> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|_| StoreError::InvalidEntry(format!("status {}", self.status)))?;

        let mut headers = http::HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        Ok(Response {
            url: self.url.clone(),
            status,
            headers,
            body: self.body.clone(),
        })
    }

    /// Age of this entry relative to `now_ms`, zero if the stamp is in the
    /// future (clock skew).
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.stored_at_ms))
    }
}

// ==================== Cache ====================

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,

    /// Number of cache misses.
    pub misses: u64,

    /// Current number of entries.
    pub count: usize,
}

impl CacheStats {
    /// Get the hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// A named cache of response snapshots.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries, keyed by URL.
    entries: HashMap<String, CacheEntry>,

    /// Lookup statistics.
    stats: CacheStats,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Match a URL without recording statistics.
    pub fn match_url(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Look up a URL, recording a hit or miss and returning a snapshot.
    pub fn lookup(&mut self, url: &str) -> Option<CacheEntry> {
        match self.entries.get(url) {
            Some(entry) => {
                self.stats.hits += 1;
                Some(entry.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Store a response snapshot. Refuses non-2xx responses; error and
    /// opaque-redirect responses never enter a cache through this path.
    /// Returns whether the response was stored. Same-key puts are
    /// last-write-wins.
    pub fn put(&mut self, response: &Response) -> bool {
        if !response.ok() {
            trace!(cache = %self.name, url = %response.url, status = %response.status,
                "Refusing to cache non-success response");
            return false;
        }
        self.insert(CacheEntry::from_response(response));
        true
    }

    /// Insert an entry directly (snapshot already built).
    pub fn insert(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.as_str().to_string(), entry);
        self.stats.count = self.entries.len();
    }

    /// Delete an entry.
    pub fn delete(&mut self, url: &str) -> bool {
        let removed = self.entries.remove(url).is_some();
        self.stats.count = self.entries.len();
        removed
    }

    /// Remove entries stored longer ago than `max_age`. Entries stamped in
    /// the future are retained (never evict on ambiguous data). Returns the
    /// number of removed entries.
    pub fn prune(&mut self, max_age: Duration, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|url, entry| {
            let keep = entry.stored_at_ms > now_ms || entry.age(now_ms) <= max_age;
            if !keep {
                debug!(cache = %self.name, url = %url, "Removing expired cache entry");
            }
            keep
        });
        self.stats.count = self.entries.len();
        before - self.entries.len()
    }

    /// Get all keys (URLs).
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get lookup statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }
}

// ==================== Cache Storage ====================

/// The set of named caches owned by one worker process.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if it doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if a cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache wholesale.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Get all cache names.
    pub fn keys(&self) -> Vec<&str> {
        self.caches.keys().map(|s| s.as_str()).collect()
    }
}

// ==================== Helpers ====================

/// Current wall-clock time in ms since epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    fn response(url: &str, status: u16, body: &'static [u8]) -> Response {
        Response {
            url: Url::parse(url).unwrap(),
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn test_put_and_match() {
        let mut cache = Cache::new("wayfarer-precache-v1");
        assert!(cache.put(&response("https://example.com/app.css", 200, b"body{}")));

        let entry = cache.match_url("https://example.com/app.css").unwrap();
        assert_eq!(entry.status, 200);
        assert_eq!(entry.body, Bytes::from_static(b"body{}"));
        assert!(cache.match_url("https://example.com/other.css").is_none());
    }

    #[test]
    fn test_put_refuses_non_success() {
        let mut cache = Cache::new("test");
        assert!(!cache.put(&response("https://example.com/missing.css", 404, b"")));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lookup_records_stats() {
        let mut cache = Cache::new("test");
        cache.put(&response("https://example.com/a.js", 200, b"x"));

        assert!(cache.lookup("https://example.com/a.js").is_some());
        assert!(cache.lookup("https://example.com/b.js").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.count, 1);
        assert!((stats.hit_rate() - 50.0).abs() < 0.001);
    }

    #[test]
    fn test_last_write_wins() {
        let mut cache = Cache::new("test");
        cache.put(&response("https://example.com/a.js", 200, b"old"));
        cache.put(&response("https://example.com/a.js", 200, b"new"));

        assert_eq!(cache.len(), 1);
        let entry = cache.match_url("https://example.com/a.js").unwrap();
        assert_eq!(entry.body, Bytes::from_static(b"new"));
    }

    #[test]
    fn test_prune_removes_expired() {
        let max_age = Duration::from_secs(7 * 24 * 60 * 60);
        let now = now_ms();

        let mut cache = Cache::new("wayfarer-runtime-v1");
        let old = CacheEntry::from_response_at(
            &response("https://example.com/old.png", 200, b"old"),
            now - (max_age.as_millis() as u64 + 1000),
        );
        let fresh = CacheEntry::from_response_at(
            &response("https://example.com/fresh.png", 200, b"fresh"),
            now - 1000,
        );
        cache.insert(old);
        cache.insert(fresh);

        let removed = cache.prune(max_age, now);
        assert_eq!(removed, 1);
        assert!(cache.match_url("https://example.com/old.png").is_none());
        assert!(cache.match_url("https://example.com/fresh.png").is_some());
    }

    #[test]
    fn test_prune_retains_future_stamp() {
        // Clock skew: a stamp ahead of now is ambiguous, never evicted.
        let now = now_ms();
        let mut cache = Cache::new("test");
        cache.insert(CacheEntry::from_response_at(
            &response("https://example.com/skew.js", 200, b"x"),
            now + 60_000,
        ));

        let removed = cache.prune(Duration::from_secs(1), now);
        assert_eq!(removed, 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entry_roundtrip() {
        let mut original = response("https://example.com/data.json", 200, b"{\"days\":5}");
        original.headers.insert(
            "content-type",
            HeaderValue::from_static("application/json"),
        );

        let entry = CacheEntry::from_response(&original);
        let rebuilt = entry.to_response().unwrap();

        assert_eq!(rebuilt.status, StatusCode::OK);
        assert_eq!(rebuilt.body, original.body);
        assert_eq!(rebuilt.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_entry_invalid_status() {
        let mut entry =
            CacheEntry::from_response(&response("https://example.com/a.js", 200, b"x"));
        entry.status = 42;
        assert!(matches!(
            entry.to_response(),
            Err(StoreError::InvalidEntry(_))
        ));
    }

    #[test]
    fn test_entry_serde() {
        let entry = CacheEntry::from_response(&response("https://example.com/a.js", 200, b"x"));
        let json = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.url, entry.url);
        assert_eq!(back.body, entry.body);
    }

    #[test]
    fn test_storage_lifecycle() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("v1"));

        storage.open("v1").put(&response("https://example.com/a.js", 200, b"x"));
        assert!(storage.has("v1"));
        assert_eq!(storage.get("v1").unwrap().len(), 1);

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
    }

    #[test]
    fn test_storage_keys() {
        let mut storage = CacheStorage::new();
        storage.open("wayfarer-precache-v1");
        storage.open("wayfarer-runtime-v1");

        let mut keys = storage.keys();
        keys.sort();
        assert_eq!(keys, vec!["wayfarer-precache-v1", "wayfarer-runtime-v1"]);
    }
}
