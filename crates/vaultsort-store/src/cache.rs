//! Bounded LRU cache of classification results.
//!
//! Entries are keyed by content [`Fingerprint`] and bounded both by entry
//! count and by total serialized size. Before every insert, least-recently
//! used entries are evicted one at a time until
//! `entries < max_entries && size_bytes + new_size <= max_size_bytes`, or the
//! cache is empty. An entry larger than the byte bound on its own is still
//! inserted (never silently dropped) and is the first eviction victim on the
//! next put.
//!
//! Recency lives in the `lru` list, so entries touched at the same instant
//! are evicted in insertion order.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use vaultsort_core::{CacheConfig, ClassificationResult, Fingerprint, Result};

use crate::persist::{lock, read_json_or_default, write_json_atomic};

/// Snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

/// One cached result. Never leaves the cache's lock boundary.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: ClassificationResult,
    size_bytes: usize,
    last_access: DateTime<Utc>,
}

struct CacheInner {
    entries: LruCache<Fingerprint, CacheEntry>,
    size_bytes: usize,
    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
    puts_since_flush: usize,
}

/// Read-only cache statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub max_entries: usize,
    pub max_size_bytes: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
}

impl CacheStats {
    /// Hits over lookups, or 0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Persisted cache file, entries ordered least- to most-recently used.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheSnapshot {
    version: u32,
    #[serde(default)]
    entries: Vec<CachedItem>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedItem {
    key: Fingerprint,
    value: ClassificationResult,
}

/// Thread-safe bounded LRU result cache.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    max_entries: usize,
    max_size_bytes: usize,
    path: Option<PathBuf>,
    flush_every: usize,
    persist_lock: Mutex<()>,
}

impl ResultCache {
    /// Create an in-memory cache with the given bounds.
    pub fn new(max_entries: usize, max_size_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                size_bytes: 0,
                hit_count: 0,
                miss_count: 0,
                eviction_count: 0,
                puts_since_flush: 0,
            }),
            max_entries: max_entries.max(1),
            max_size_bytes,
            path: None,
            flush_every: 0,
            persist_lock: Mutex::new(()),
        }
    }

    /// Create an in-memory cache from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.max_size_bytes)
    }

    /// Attach a backing file; `flush_every > 0` saves every N puts.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>, flush_every: usize) -> Self {
        self.path = Some(path.into());
        self.flush_every = flush_every;
        self
    }

    /// Open a persisted cache, re-inserting saved entries through the
    /// normal eviction loop. A corrupted file starts the cache empty.
    pub fn load(path: &Path, config: &CacheConfig) -> Result<Self> {
        let snapshot: CacheSnapshot = read_json_or_default(path, "cache")?;
        if snapshot.version > SNAPSHOT_VERSION {
            warn!(
                version = snapshot.version,
                "Cache file written by a newer version, ignoring"
            );
        }
        let cache = Self::from_config(config).with_persistence(path, config.flush_every);
        if snapshot.version <= SNAPSHOT_VERSION {
            cache.import(snapshot.entries.into_iter().map(|i| (i.key, i.value)));
        }
        let stats = cache.stats();
        info!(
            cache_entries = stats.entries,
            cache_bytes = stats.size_bytes,
            path = %path.display(),
            "Result cache loaded"
        );
        Ok(cache)
    }

    /// Look up a result, marking it most-recently used on a hit.
    pub fn get(&self, key: &Fingerprint) -> Option<ClassificationResult> {
        self.get_if(key, |_| true)
    }

    /// Look up a result that satisfies `accept`.
    ///
    /// An entry `accept` rejects counts as a miss and keeps its recency, so
    /// the hit rate only reflects results the caller could use.
    pub fn get_if<F>(&self, key: &Fingerprint, accept: F) -> Option<ClassificationResult>
    where
        F: FnOnce(&ClassificationResult) -> bool,
    {
        let mut inner = lock(&self.inner);
        let usable = inner.entries.peek(key).is_some_and(|e| accept(&e.value));
        let hit = if usable {
            inner.entries.get_mut(key).map(|entry| {
                entry.last_access = Utc::now();
                entry.value.clone()
            })
        } else {
            None
        };
        if hit.is_some() {
            inner.hit_count += 1;
            trace!(fingerprint = key.short(), "Cache hit");
        } else {
            inner.miss_count += 1;
            trace!(fingerprint = key.short(), "Cache miss");
        }
        hit
    }

    /// When `key` was last read or written, without touching recency.
    pub fn last_access(&self, key: &Fingerprint) -> Option<DateTime<Utc>> {
        lock(&self.inner).entries.peek(key).map(|e| e.last_access)
    }

    /// Whether `key` is cached, without touching recency or counters.
    pub fn contains(&self, key: &Fingerprint) -> bool {
        lock(&self.inner).entries.peek(key).is_some()
    }

    /// Insert or overwrite the entry for `key`, evicting LRU entries first.
    pub fn put(&self, key: Fingerprint, value: ClassificationResult) {
        let flush_due = self.insert(key, value);
        if flush_due {
            if let Err(e) = self.save() {
                warn!(error = %e, "Periodic cache save failed");
            }
        }
    }

    /// Insert without triggering a periodic save; returns whether one is due.
    fn insert(&self, key: Fingerprint, value: ClassificationResult) -> bool {
        let size = entry_size(&value);
        let mut inner = lock(&self.inner);

        if let Some(old) = inner.entries.pop(&key) {
            inner.size_bytes -= old.size_bytes;
        }

        while !inner.entries.is_empty()
            && (inner.entries.len() >= self.max_entries
                || inner.size_bytes + size > self.max_size_bytes)
        {
            if let Some((evicted, entry)) = inner.entries.pop_lru() {
                inner.size_bytes -= entry.size_bytes;
                inner.eviction_count += 1;
                trace!(fingerprint = evicted.short(), size_bytes = entry.size_bytes, "Evicted");
            }
        }

        if size > self.max_size_bytes {
            warn!(
                fingerprint = key.short(),
                size_bytes = size,
                max_size_bytes = self.max_size_bytes,
                "Cache entry exceeds byte bound on its own, keeping it until the next put"
            );
        }

        inner.entries.put(
            key,
            CacheEntry {
                value,
                size_bytes: size,
                last_access: Utc::now(),
            },
        );
        inner.size_bytes += size;
        inner.puts_since_flush += 1;

        self.path.is_some() && self.flush_every > 0 && inner.puts_since_flush >= self.flush_every
    }

    /// Remove one entry.
    pub fn remove(&self, key: &Fingerprint) -> Option<ClassificationResult> {
        let mut inner = lock(&self.inner);
        let entry = inner.entries.pop(key)?;
        inner.size_bytes -= entry.size_bytes;
        Some(entry.value)
    }

    /// Drop every entry, keeping counters.
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.entries.clear();
        inner.size_bytes = 0;
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        let inner = lock(&self.inner);
        CacheStats {
            entries: inner.entries.len(),
            size_bytes: inner.size_bytes,
            max_entries: self.max_entries,
            max_size_bytes: self.max_size_bytes,
            hit_count: inner.hit_count,
            miss_count: inner.miss_count,
            eviction_count: inner.eviction_count,
        }
    }

    /// All entries, ordered from least- to most-recently used.
    pub fn export(&self) -> Vec<(Fingerprint, ClassificationResult)> {
        let inner = lock(&self.inner);
        inner
            .entries
            .iter()
            .rev()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Re-insert entries one by one through the normal eviction loop.
    ///
    /// Importing an [`export`](Self::export) restores recency order as well.
    pub fn import<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (Fingerprint, ClassificationResult)>,
    {
        for (key, value) in entries {
            self.insert(key, value);
        }
        lock(&self.inner).puts_since_flush = 0;
    }

    /// Save to the backing file, if one is attached.
    pub fn save(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        self.save_to(path)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let _guard = lock(&self.persist_lock);
        let entries = {
            let mut inner = lock(&self.inner);
            inner.puts_since_flush = 0;
            inner
                .entries
                .iter()
                .rev()
                .map(|(k, e)| CachedItem {
                    key: k.clone(),
                    value: e.value.clone(),
                })
                .collect::<Vec<_>>()
        };
        let count = entries.len();
        write_json_atomic(
            path,
            &CacheSnapshot {
                version: SNAPSHOT_VERSION,
                entries,
            },
        )?;
        debug!(cache_entries = count, path = %path.display(), "Result cache saved");
        Ok(())
    }
}

/// Approximate entry size: serialized JSON length of the value.
fn entry_size(value: &ClassificationResult) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::of(s.as_bytes())
    }

    fn result(category: &str) -> ClassificationResult {
        ClassificationResult::new(category, 0.9)
    }

    #[test]
    fn test_get_miss_then_hit() {
        let cache = ResultCache::new(10, 1 << 20);
        assert!(cache.get(&fp("a")).is_none());
        cache.put(fp("a"), result("A"));
        assert_eq!(cache.get(&fp("a")).unwrap().category, "A");

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejected_entry_counts_as_miss_and_keeps_recency() {
        let cache = ResultCache::new(2, 1 << 20);
        cache.put(fp("a"), result("A"));
        cache.put(fp("b"), result("B"));
        let before = cache.last_access(&fp("a")).unwrap();

        assert!(cache.get_if(&fp("a"), |r| r.category == "other").is_none());
        let stats = cache.stats();
        assert_eq!((stats.hit_count, stats.miss_count), (0, 1));
        assert_eq!(cache.last_access(&fp("a")).unwrap(), before);

        // "a" is still least recent, so the next put evicts it.
        cache.put(fp("c"), result("C"));
        assert!(!cache.contains(&fp("a")));
    }

    #[test]
    fn test_hit_refreshes_last_access() {
        let cache = ResultCache::new(2, 1 << 20);
        cache.put(fp("a"), result("A"));
        let before = cache.last_access(&fp("a")).unwrap();
        assert!(cache.get_if(&fp("a"), |r| r.category == "A").is_some());
        assert!(cache.last_access(&fp("a")).unwrap() >= before);
        assert!(cache.last_access(&fp("missing")).is_none());
        assert_eq!(cache.stats().hit_count, 1);
    }

    #[test]
    fn test_get_after_put_a_b_get_a_put_c_evicts_b() {
        let cache = ResultCache::new(2, 1 << 20);
        cache.put(fp("a"), result("A"));
        cache.put(fp("b"), result("B"));
        assert!(cache.get(&fp("a")).is_some());
        cache.put(fp("c"), result("C"));

        assert!(cache.contains(&fp("a")));
        assert!(!cache.contains(&fp("b")));
        assert!(cache.contains(&fp("c")));
        assert_eq!(cache.stats().eviction_count, 1);
    }

    #[test]
    fn test_n_plus_one_inserts_evict_first_inserted() {
        let n = 5;
        let cache = ResultCache::new(n, 1 << 20);
        for i in 0..=n {
            cache.put(fp(&i.to_string()), result(&format!("C{}", i)));
        }
        assert_eq!(cache.len(), n);
        assert!(!cache.contains(&fp("0")));
        for i in 1..=n {
            assert!(cache.contains(&fp(&i.to_string())));
        }
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let cache = ResultCache::new(2, 1 << 20);
        cache.put(fp("a"), result("A"));
        cache.put(fp("a"), result("A2"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&fp("a")).unwrap().category, "A2");
        assert_eq!(cache.stats().size_bytes, entry_size(&result("A2")));
    }

    #[test]
    fn test_byte_bound_holds_after_every_put() {
        let one = entry_size(&result("C00"));
        let cache = ResultCache::new(100, one * 3);
        for i in 0..20 {
            cache.put(fp(&i.to_string()), result(&format!("C{:02}", i)));
            let stats = cache.stats();
            assert!(stats.size_bytes <= stats.max_size_bytes);
            assert!(stats.entries <= stats.max_entries);
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_oversized_entry_is_kept_then_evicted_next() {
        let small = entry_size(&result("S"));
        let cache = ResultCache::new(10, small * 2);
        let big = result("B").with_rationale("x".repeat(small * 4));

        cache.put(fp("big"), big.clone());
        assert!(cache.contains(&fp("big")));
        assert!(cache.stats().size_bytes > cache.stats().max_size_bytes);

        cache.put(fp("small"), result("S"));
        assert!(!cache.contains(&fp("big")));
        assert!(cache.contains(&fp("small")));
        assert!(cache.stats().size_bytes <= cache.stats().max_size_bytes);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = ResultCache::new(10, 1 << 20);
        cache.put(fp("a"), result("A"));
        cache.put(fp("b"), result("B"));
        assert_eq!(cache.remove(&fp("a")).unwrap().category, "A");
        assert!(cache.remove(&fp("a")).is_none());
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().size_bytes, 0);
    }

    #[test]
    fn test_export_orders_least_recent_first() {
        let cache = ResultCache::new(10, 1 << 20);
        cache.put(fp("a"), result("A"));
        cache.put(fp("b"), result("B"));
        cache.get(&fp("a"));
        let keys: Vec<_> = cache.export().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![fp("b"), fp("a")]);
    }

    #[test]
    fn test_import_export_round_trip() {
        let cache = ResultCache::new(10, 1 << 20);
        cache.put(fp("a"), result("A").with_tags(vec!["rust".into()]));
        cache.put(fp("b"), result("B").with_related(vec!["Ownership".into()]));
        cache.get(&fp("a"));

        let restored = ResultCache::new(10, 1 << 20);
        restored.import(cache.export());
        assert_eq!(restored.export(), cache.export());
    }

    #[test]
    fn test_import_runs_eviction() {
        let source = ResultCache::new(10, 1 << 20);
        for i in 0..6 {
            source.put(fp(&i.to_string()), result("X"));
        }
        let small = ResultCache::new(4, 1 << 20);
        small.import(source.export());
        assert_eq!(small.len(), 4);
        assert!(!small.contains(&fp("0")));
        assert!(small.contains(&fp("5")));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let config = CacheConfig::default();

        let cache = ResultCache::from_config(&config).with_persistence(&path, 0);
        cache.put(fp("a"), result("A"));
        cache.put(fp("b"), result("B"));
        cache.save().unwrap();

        let loaded = ResultCache::load(&path, &config).unwrap();
        assert_eq!(loaded.export(), cache.export());
    }

    #[test]
    fn test_periodic_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = ResultCache::new(10, 1 << 20).with_persistence(&path, 2);

        cache.put(fp("a"), result("A"));
        assert!(!path.exists());
        cache.put(fp("b"), result("B"));
        assert!(path.exists());
    }

    #[test]
    fn test_load_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "[[[").unwrap();
        let cache = ResultCache::load(&path, &CacheConfig::default()).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_puts_respect_bounds() {
        use std::sync::Arc;

        let cache = Arc::new(ResultCache::new(8, 1 << 20));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let key = fp(&format!("{}-{}", t, i));
                        cache.put(key.clone(), result("X"));
                        cache.get(&key);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = cache.stats();
        assert_eq!(stats.entries, 8);
        assert_eq!(stats.eviction_count, 200 - 8);
    }
}
