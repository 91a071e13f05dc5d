//! TTL + recency cache for resolution outcomes.
//!
//! One entry per (title, year, doi) cache key. The value is the serialized
//! BibTeX record; the empty string marks a negative result so known-failing
//! lookups are not retried. Entries expire lazily on [`get`](BibCache::get)
//! and eagerly via [`cleanup_expired`](BibCache::cleanup_expired); a bounded
//! size is enforced by evicting the least-recently-used key.
//!
//! Persistence goes through an injected [`CacheStore`] so tests can swap in
//! an in-memory backend. The shipped [`JsonFileStore`] writes the whole
//! non-expired entry set as a single JSON object on every mutating call; a
//! corrupt or missing file loads as an empty cache, and write failures are
//! logged and swallowed (the in-memory map stays authoritative).

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Default time-to-live for cache entries: 24 hours.
pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

/// Default maximum number of entries.
pub const DEFAULT_MAX_SIZE: usize = 1000;

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A stored value with its expiry bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: String,
    /// Seconds to live; `None` never expires.
    pub ttl: Option<u64>,
    /// Unix timestamp of insertion.
    pub created_at: u64,
}

impl CacheEntry {
    pub fn new(value: String, ttl: Option<u64>) -> Self {
        Self {
            value,
            ttl,
            created_at: now_epoch(),
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => now_epoch().saturating_sub(self.created_at) > ttl,
            None => false,
        }
    }
}

/// Storage backend behind the cache: load once at construction, persist the
/// full non-expired entry set after mutations.
pub trait CacheStore: Send + Sync {
    fn load(&self) -> HashMap<String, CacheEntry>;
    fn persist(&self, entries: &HashMap<&str, &CacheEntry>) -> std::io::Result<()>;
}

/// Durable backend: one JSON object mapping cache key to entry.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CacheStore for JsonFileStore {
    fn load(&self) -> HashMap<String, CacheEntry> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return HashMap::new(),
        };
        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "corrupt cache file, starting empty");
                HashMap::new()
            }
        }
    }

    fn persist(&self, entries: &HashMap<&str, &CacheEntry>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.path, json)
    }
}

/// In-memory backend for tests.
#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HashMap<String, CacheEntry> {
        self.saved.lock().unwrap().clone()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self) -> HashMap<String, CacheEntry> {
        self.saved.lock().unwrap().clone()
    }

    fn persist(&self, entries: &HashMap<&str, &CacheEntry>) -> std::io::Result<()> {
        let mut saved = self.saved.lock().unwrap();
        *saved = entries
            .iter()
            .map(|(k, v)| (k.to_string(), (*v).clone()))
            .collect();
        Ok(())
    }
}

impl<T: CacheStore + ?Sized> CacheStore for std::sync::Arc<T> {
    fn load(&self) -> HashMap<String, CacheEntry> {
        (**self).load()
    }

    fn persist(&self, entries: &HashMap<&str, &CacheEntry>) -> std::io::Result<()> {
        (**self).persist(entries)
    }
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Recency order: front = least recently used, back = most recent.
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
    expired: u64,
}

impl CacheInner {
    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.to_string());
    }

    fn remove(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.order.retain(|k| k != key);
        }
        removed
    }
}

/// Snapshot of cache effectiveness counters.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub total_entries: usize,
    pub expired_entries: u64,
    pub total_requests: u64,
    pub max_size: usize,
    pub default_ttl: u64,
}

/// Thread-safe TTL+LRU cache. Concurrent writers serialize on the inner
/// mutex; last-writer-wins per key is acceptable because cached outcomes are
/// idempotent per stable key.
pub struct BibCache {
    inner: Mutex<CacheInner>,
    store: Option<Box<dyn CacheStore>>,
    max_size: usize,
    default_ttl: u64,
}

impl BibCache {
    /// In-memory-only cache (no persistence).
    pub fn new(max_size: usize, default_ttl: u64) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
                expired: 0,
            }),
            store: None,
            max_size,
            default_ttl,
        }
    }

    /// Cache backed by an injected store. Entries that are already expired
    /// or failed to deserialize are dropped at load time.
    pub fn with_store(store: Box<dyn CacheStore>, max_size: usize, default_ttl: u64) -> Self {
        let loaded = store.load();
        let mut entries = HashMap::new();
        let mut order = VecDeque::new();
        for (key, entry) in loaded {
            if !entry.is_expired() {
                order.push_back(key.clone());
                entries.insert(key, entry);
            }
        }
        Self {
            inner: Mutex::new(CacheInner {
                entries,
                order,
                hits: 0,
                misses: 0,
                expired: 0,
            }),
            store: Some(store),
            max_size,
            default_ttl,
        }
    }

    /// Cache persisted to a JSON file at `path`.
    pub fn open(path: &Path, max_size: usize, default_ttl: u64) -> Self {
        Self::with_store(Box::new(JsonFileStore::new(path)), max_size, default_ttl)
    }

    fn persist_locked(&self, inner: &CacheInner) {
        let Some(store) = &self.store else { return };
        let live: HashMap<&str, &CacheEntry> = inner
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired())
            .map(|(k, e)| (k.as_str(), e))
            .collect();
        if let Err(e) = store.persist(&live) {
            tracing::warn!(error = %e, "failed to persist cache, continuing in memory");
        }
    }

    /// Fetch a value. An expired entry is deleted and counted as a miss.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                None
            }
            Some(entry) if entry.is_expired() => {
                inner.remove(key);
                inner.expired += 1;
                inner.misses += 1;
                None
            }
            Some(entry) => {
                let value = entry.value.clone();
                inner.touch(key);
                inner.hits += 1;
                Some(value)
            }
        }
    }

    /// Insert with the default TTL.
    pub fn set(&self, key: &str, value: &str) {
        self.set_with_ttl(key, value, Some(self.default_ttl));
    }

    /// Insert with an explicit TTL (`None` never expires). The key becomes
    /// most-recently-used; the LRU entry is evicted past `max_size`.
    pub fn set_with_ttl(&self, key: &str, value: &str, ttl: Option<u64>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .entries
            .insert(key.to_string(), CacheEntry::new(value.to_string(), ttl));
        inner.touch(key);

        while inner.entries.len() > self.max_size {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            } else {
                break;
            }
        }

        self.persist_locked(&inner);
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.remove(key);
        if removed {
            self.persist_locked(&inner);
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.order.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.expired = 0;
        self.persist_locked(&inner);
    }

    /// Eagerly drop every expired entry, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let expired_keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired_keys {
            inner.remove(key);
        }
        inner.expired += expired_keys.len() as u64;
        if !expired_keys.is_empty() {
            self.persist_locked(&inner);
        }
        expired_keys.len()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Keys in recency order, least recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().order.iter().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        let total = inner.hits + inner.misses;
        let (hit_rate, miss_rate) = if total > 0 {
            (
                inner.hits as f64 / total as f64,
                inner.misses as f64 / total as f64,
            )
        } else {
            (0.0, 0.0)
        };
        CacheStats {
            hit_rate,
            miss_rate,
            total_entries: inner.entries.len(),
            expired_entries: inner.expired,
            total_requests: total,
            max_size: self.max_size,
            default_ttl: self.default_ttl,
        }
    }

    /// Test hook: shift an entry's creation time into the past.
    #[cfg(test)]
    fn backdate(&self, key: &str, secs: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.created_at = entry.created_at.saturating_sub(secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_miss_then_hit() {
        let cache = BibCache::new(10, 60);
        assert_eq!(cache.get("k"), None);
        cache.set("k", "v");
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }

    #[test]
    fn test_ttl_invariant() {
        let cache = BibCache::new(10, 60);
        cache.set_with_ttl("k", "v", Some(100));

        // Within TTL (age == ttl is not expired).
        cache.backdate("k", 100);
        assert_eq!(cache.get("k"), Some("v".to_string()));

        // Past TTL: entry is removed and reads as a miss.
        cache.backdate("k", 1);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let cache = BibCache::new(10, 60);
        cache.set_with_ttl("k", "v", None);
        cache.backdate("k", 1_000_000);
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }

    #[test]
    fn test_bounded_size_keeps_most_recent() {
        let cache = BibCache::new(3, 60);
        for i in 1..=5 {
            cache.set(&format!("k{i}"), "v");
        }
        assert_eq!(cache.size(), 3);
        assert_eq!(cache.get("k1"), None);
        assert_eq!(cache.get("k2"), None);
        for i in 3..=5 {
            assert!(cache.get(&format!("k{i}")).is_some(), "k{i} evicted");
        }
    }

    #[test]
    fn test_lru_get_refreshes_recency() {
        let cache = BibCache::new(3, 60);
        cache.set("a", "v");
        cache.set("b", "v");
        cache.set("c", "v");
        // "a" becomes most recently used; "b" is now the eviction victim.
        assert!(cache.get("a").is_some());
        assert_eq!(cache.keys(), vec!["b", "c", "a"]);
        cache.set("d", "v");
        assert_eq!(cache.get("b"), None);
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn test_negative_value_is_a_hit() {
        let cache = BibCache::new(10, 60);
        cache.set("k", "");
        assert_eq!(cache.get("k"), Some(String::new()));
    }

    #[test]
    fn test_delete() {
        let cache = BibCache::new(10, 60);
        cache.set("k", "v");
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_cleanup_expired_counts() {
        let cache = BibCache::new(10, 60);
        cache.set_with_ttl("a", "v", Some(10));
        cache.set_with_ttl("b", "v", Some(10));
        cache.set_with_ttl("c", "v", None);
        cache.backdate("a", 11);
        cache.backdate("b", 11);
        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.cleanup_expired(), 0);
    }

    #[test]
    fn test_stats() {
        let cache = BibCache::new(10, 60);
        cache.set("k", "v");
        cache.get("k");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.total_requests, 2);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
        assert!((stats.miss_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.max_size, 10);
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = std::sync::Arc::new(MemoryStore::new());
        {
            let cache = BibCache::with_store(Box::new(std::sync::Arc::clone(&store)), 10, 60);
            cache.set("k", "v");
        }
        assert_eq!(store.snapshot().len(), 1);

        let cache = BibCache::with_store(Box::new(store), 10, 60);
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }

    #[test]
    fn test_json_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        {
            let cache = BibCache::open(&path, 10, 60);
            cache.set("title::2022::", "@article{x,\n  title = {X}\n}");
            cache.set("neg::::", "");
        }

        let cache = BibCache::open(&path, 10, 60);
        assert_eq!(cache.size(), 2);
        assert!(cache
            .get("title::2022::")
            .is_some_and(|v| v.contains("@article")));
        assert_eq!(cache.get("neg::::"), Some(String::new()));
    }

    #[test]
    fn test_json_store_corrupt_file_is_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = BibCache::open(&path, 10, 60);
        assert_eq!(cache.size(), 0);
        // And the cache stays usable.
        cache.set("k", "v");
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }

    #[test]
    fn test_json_store_drops_expired_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let json = r#"{
            "stale::::": {"value": "old", "ttl": 10, "created_at": 1},
            "fresh::::": {"value": "new", "ttl": null, "created_at": 1}
        }"#;
        std::fs::write(&path, json).unwrap();

        let cache = BibCache::open(&path, 10, 60);
        assert_eq!(cache.get("stale::::"), None);
        assert_eq!(cache.get("fresh::::"), Some("new".to_string()));
    }
}
