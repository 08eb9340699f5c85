use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::store::SessionStore;
use crate::types::SessionRecord;
use crate::error::Result;

struct CacheEntry {
    record: SessionRecord,
    inserted_at: Instant,
    last_access: Instant,
    access_count: u64,
}

/// Read-through LRU+TTL cache fronting a [`SessionStore`].
///
/// `get` loads from disk on a miss and caches the result; entries older
/// than `ttl` are treated as expired on next access rather than evicted
/// proactively (a background task calls [`SessionCache::sweep_expired`] on
/// a tick to reclaim them eagerly).
pub struct SessionCache {
    store: SessionStore,
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entry_count: usize,
}

impl SessionCache {
    pub fn new(store: SessionStore, ttl: Duration, max_entries: usize) -> Self {
        Self {
            store,
            ttl,
            max_entries,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn get(&self, key: &str) -> Result<Option<SessionRecord>> {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(key) {
                if entry.inserted_at.elapsed() <= self.ttl {
                    entry.last_access = Instant::now();
                    entry.access_count += 1;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.record.clone()));
                }
                entries.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let loaded = self.store.load(key)?;
        if let Some(record) = &loaded {
            self.insert(key.to_string(), record.clone());
        }
        Ok(loaded)
    }

    /// Save through to disk and refresh the cached copy.
    pub fn put(&self, key: &str, record: SessionRecord) -> Result<()> {
        self.store.save(key, &record.messages)?;
        self.insert(key.to_string(), record);
        Ok(())
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    fn insert(&self, key: String, record: SessionRecord) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            CacheEntry {
                record,
                inserted_at: Instant::now(),
                last_access: Instant::now(),
                access_count: 0,
            },
        );
        if entries.len() > self.max_entries {
            Self::prune_by_size_locked(&mut entries, self.max_entries, &self.evictions);
        }
    }

    /// Evict least-recently-used entries until at most `max` remain.
    pub fn prune_by_size(&self, max: usize) {
        let mut entries = self.entries.lock().unwrap();
        Self::prune_by_size_locked(&mut entries, max, &self.evictions);
    }

    fn prune_by_size_locked(
        entries: &mut HashMap<String, CacheEntry>,
        max: usize,
        evictions: &AtomicU64,
    ) {
        while entries.len() > max {
            let oldest_key = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest_key {
                Some(k) => {
                    entries.remove(&k);
                    evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    /// Evict every entry accessed fewer than `min_access_count` times,
    /// reclaiming cache space occupied by cold one-off reads.
    pub fn prune_by_access_count(&self, min_access_count: u64) {
        let mut entries = self.entries.lock().unwrap();
        let cold: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.access_count < min_access_count)
            .map(|(k, _)| k.clone())
            .collect();
        for key in cold {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove entries whose TTL has elapsed. Intended to be called
    /// periodically by a background cleanup task.
    pub fn sweep_expired(&self) {
        let mut entries = self.entries.lock().unwrap();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() > self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "swept expired session cache entries");
            self.expirations
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entry_count: self.entries.lock().unwrap().len(),
        }
    }

    /// Run `sweep_expired` on a fixed interval until `shutdown` fires.
    pub async fn run_cleanup_loop(
        self: std::sync::Arc<Self>,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_expired(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skynet_core::types::Message;

    fn cache(ttl: Duration, max_entries: usize) -> (SessionCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        (SessionCache::new(store, ttl, max_entries), dir)
    }

    #[test]
    fn miss_then_hit_updates_counters() {
        let (cache, _dir) = cache(Duration::from_secs(60), 10);
        cache
            .put("k", SessionRecord {
                header: crate::types::SessionHeader {
                    key: "k".into(),
                    created_at: chrono::Utc::now(),
                    updated_at: chrono::Utc::now(),
                },
                messages: vec![Message::user("hi")],
            })
            .unwrap();
        cache.invalidate("k");

        assert!(cache.get("k").unwrap().is_some());
        let stats_after_miss = cache.stats();
        assert_eq!(stats_after_miss.misses, 1);

        assert!(cache.get("k").unwrap().is_some());
        let stats_after_hit = cache.stats();
        assert_eq!(stats_after_hit.hits, 1);
    }

    #[test]
    fn prune_by_size_evicts_least_recently_used() {
        let (cache, _dir) = cache(Duration::from_secs(60), 100);
        for i in 0..5 {
            cache
                .put(
                    &format!("k{i}"),
                    SessionRecord::new(format!("k{i}")),
                )
                .unwrap();
        }
        cache.prune_by_size(2);
        assert_eq!(cache.stats().entry_count, 2);
        assert_eq!(cache.stats().evictions, 3);
    }

    #[test]
    fn expired_entry_triggers_miss_again() {
        let (cache, _dir) = cache(Duration::from_millis(10), 10);
        cache.put("k", SessionRecord::new("k")).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        cache.get("k").unwrap();
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn capacity_overflow_evicts_lru_not_most_recently_touched() {
        // Capacity 2; Set a; Set b; Get a; Set c -> b evicted, a and c
        // retained, exactly one eviction recorded.
        let (cache, _dir) = cache(Duration::from_secs(60), 2);
        cache.put("a", SessionRecord::new("a")).unwrap();
        cache.put("b", SessionRecord::new("b")).unwrap();
        cache.get("a").unwrap();
        cache.put("c", SessionRecord::new("c")).unwrap();

        let entries = cache.entries.lock().unwrap();
        assert!(entries.contains_key("a"));
        assert!(entries.contains_key("c"));
        assert!(!entries.contains_key("b"));
        drop(entries);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn sweep_expired_removes_stale_entries() {
        let (cache, _dir) = cache(Duration::from_millis(10), 10);
        cache.put("k", SessionRecord::new("k")).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        cache.sweep_expired();
        assert_eq!(cache.stats().entry_count, 0);
    }
}
