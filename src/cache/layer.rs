// Bounded cache layer over a backing store
// Author: kelexine (https://github.com/kelexine)

use super::analytics::CacheAnalytics;
use super::models::{EntryMeta, LayerStats, StoredEntry};
use super::store::BackingStore;
use crate::auth::tiers::{MAX_CACHE_PRIORITY, MIN_CACHE_PRIORITY};
use crate::error::{GuardError, Result};
use crate::metrics;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const LANES: usize = MAX_CACHE_PRIORITY as usize;

/// Tracks resident keys for eviction: one LRU list per origin priority.
/// Victims come from the lowest non-empty priority, least recently used
/// first.
struct EvictionIndex {
    lanes: Vec<LruCache<String, u64>>,
    bytes: u64,
}

impl EvictionIndex {
    fn new() -> Self {
        Self {
            lanes: (0..LANES).map(|_| LruCache::unbounded()).collect(),
            bytes: 0,
        }
    }

    fn lane(priority: u8) -> usize {
        (priority.clamp(MIN_CACHE_PRIORITY, MAX_CACHE_PRIORITY) - MIN_CACHE_PRIORITY) as usize
    }

    fn len(&self) -> usize {
        self.lanes.iter().map(LruCache::len).sum()
    }

    fn touch(&mut self, key: &str) {
        for lane in &mut self.lanes {
            if lane.get(key).is_some() {
                return;
            }
        }
    }

    fn insert(&mut self, key: String, priority: u8, size: u64) {
        self.remove(&key);
        self.lanes[Self::lane(priority)].put(key, size);
        self.bytes += size;
    }

    fn remove(&mut self, key: &str) -> bool {
        for lane in &mut self.lanes {
            if let Some(size) = lane.pop(key) {
                self.bytes = self.bytes.saturating_sub(size);
                return true;
            }
        }
        false
    }

    /// Pops entries until both bounds hold again.
    fn evict_over(&mut self, max_entries: usize, max_bytes: u64) -> Vec<String> {
        let mut victims = Vec::new();
        while self.len() > max_entries || self.bytes > max_bytes {
            let popped = self
                .lanes
                .iter_mut()
                .find(|lane| !lane.is_empty())
                .and_then(|lane| lane.pop_lru());
            match popped {
                Some((key, size)) => {
                    self.bytes = self.bytes.saturating_sub(size);
                    victims.push(key);
                }
                None => break,
            }
        }
        victims
    }
}

/// One named cache tier (e.g. `hot`, `durable`).
///
/// Every store call is bounded by the layer's operation timeout; a timeout
/// is reported like any other backend failure and leaves the index alone.
pub struct CacheLayer {
    name: String,
    store: Arc<dyn BackingStore>,
    analytics: Arc<CacheAnalytics>,
    index: Mutex<EvictionIndex>,
    max_entries: usize,
    max_bytes: u64,
    op_timeout: Duration,
}

impl CacheLayer {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn BackingStore>,
        analytics: Arc<CacheAnalytics>,
        max_entries: usize,
        max_bytes: u64,
        op_timeout: Duration,
    ) -> Self {
        let name = name.into();
        analytics.register(&name);
        Self {
            name,
            store,
            analytics,
            index: Mutex::new(EvictionIndex::new()),
            max_entries,
            max_bytes,
            op_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rebuilds the eviction index from what the store already holds.
    /// Needed for stores that outlive the process.
    pub async fn load_index(&self) -> Result<usize> {
        let metas = self.bounded(self.store.scan_prefix("")).await?;
        let count = metas.len();
        {
            let mut index = self.index.lock();
            for meta in metas {
                index.insert(meta.key, meta.origin_priority, meta.size_bytes);
            }
        }
        self.enforce_capacity().await;
        debug!("{} layer indexed {} existing entries", self.name, count);
        Ok(count)
    }

    /// Reads one entry. Expired entries are misses and are removed.
    /// Backend failures are recorded and returned; callers treat them as
    /// misses.
    pub async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<StoredEntry>> {
        let start = Instant::now();
        let found = match self.bounded(self.store.get(key)).await {
            Ok(found) => found,
            Err(e) => {
                self.report_error(&e);
                return Err(e);
            }
        };

        match found {
            Some(entry) if !entry.is_expired(now) => {
                self.index.lock().touch(key);
                let elapsed = start.elapsed();
                self.analytics.record_hit(&self.name, elapsed);
                metrics::record_cache_operation(&self.name, "hit", Some(elapsed.as_secs_f64()));
                Ok(Some(entry))
            }
            expired_or_absent => {
                if expired_or_absent.is_some() {
                    self.discard(key).await;
                } else {
                    // The store lost it (or never had it); keep the index honest.
                    self.index.lock().remove(key);
                }
                let elapsed = start.elapsed();
                self.analytics.record_miss(&self.name, elapsed);
                metrics::record_cache_operation(&self.name, "miss", Some(elapsed.as_secs_f64()));
                Ok(None)
            }
        }
    }

    /// Whether a live entry exists, without touching recency or analytics.
    pub async fn contains(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .bounded(self.store.get(key))
            .await?
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    /// Writes one entry, then evicts until the layer is within bounds.
    pub async fn set(&self, entry: StoredEntry) -> Result<()> {
        let meta = entry.meta();
        if let Err(e) = self.bounded(self.store.set(entry)).await {
            self.report_error(&e);
            return Err(e);
        }

        self.index
            .lock()
            .insert(meta.key, meta.origin_priority, meta.size_bytes);
        metrics::record_cache_operation(&self.name, "write", None);
        self.enforce_capacity().await;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.index.lock().remove(key);
        self.bounded(self.store.delete(key)).await.inspect_err(|e| {
            self.report_error(e);
        })
    }

    /// Deletes every entry under `prefix`; returns how many were removed.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let metas = self
            .bounded(self.store.scan_prefix(prefix))
            .await
            .inspect_err(|e| self.report_error(e))?;
        self.delete_all(metas).await
    }

    /// Deletes every entry that has expired by `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let metas = self
            .bounded(self.store.scan_prefix(""))
            .await
            .inspect_err(|e| self.report_error(e))?;
        let expired = metas
            .into_iter()
            .filter(|m| now >= m.expires_at)
            .collect();
        let removed = self.delete_all(expired).await?;

        match self.bounded(self.store.sweep()).await {
            Ok(0) => {}
            Ok(n) => debug!("{} layer swept {} leftover items", self.name, n),
            Err(e) => warn!("{} layer housekeeping failed: {}", self.name, e),
        }
        Ok(removed)
    }

    pub fn stats(&self) -> LayerStats {
        let index = self.index.lock();
        LayerStats {
            name: self.name.clone(),
            entries: index.len(),
            bytes: index.bytes,
            max_entries: self.max_entries,
            max_bytes: self.max_bytes,
        }
    }

    async fn delete_all(&self, metas: Vec<EntryMeta>) -> Result<usize> {
        let mut removed = 0;
        for meta in metas {
            self.index.lock().remove(&meta.key);
            if self
                .bounded(self.store.delete(&meta.key))
                .await
                .inspect_err(|e| self.report_error(e))?
            {
                removed += 1;
            }
        }
        self.publish_size();
        Ok(removed)
    }

    async fn enforce_capacity(&self) {
        let victims = self
            .index
            .lock()
            .evict_over(self.max_entries, self.max_bytes);

        for key in victims {
            match self.bounded(self.store.delete(&key)).await {
                Ok(_) => {
                    debug!("{} layer evicted {}", self.name, key);
                    metrics::record_cache_operation(&self.name, "eviction", None);
                }
                Err(e) => self.report_error(&e),
            }
        }
        self.publish_size();
    }

    /// Best-effort removal of a dead entry.
    async fn discard(&self, key: &str) {
        self.index.lock().remove(key);
        if let Err(e) = self.bounded(self.store.delete(key)).await {
            debug!("{} layer could not drop expired {}: {}", self.name, key, e);
        }
    }

    fn publish_size(&self) {
        let stats = self.stats();
        self.analytics
            .update_cache_size(&self.name, stats.entries as u64, stats.bytes);
        metrics::update_cache_size(&self.name, stats.entries, stats.bytes);
    }

    fn report_error(&self, error: &GuardError) {
        warn!("{} layer error: {}", self.name, error);
        self.analytics.record_error(&self.name);
        metrics::record_cache_operation(&self.name, "error", None);
    }

    async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.op_timeout, op)
            .await
            .map_err(|_| {
                GuardError::CacheBackend(format!(
                    "{} layer operation timed out after {:?}",
                    self.name, self.op_timeout
                ))
            })?
    }
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("name", &self.name)
            .field("store", &self.store)
            .field("max_entries", &self.max_entries)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use chrono::Duration as ChronoDuration;

    fn entry(key: &str, priority: u8, now: DateTime<Utc>) -> StoredEntry {
        StoredEntry {
            key: key.to_string(),
            payload: vec![b'x'; 10],
            compressed: false,
            expires_at: now + ChronoDuration::hours(1),
            origin_priority: priority,
        }
    }

    fn layer(max_entries: usize, max_bytes: u64) -> (CacheLayer, Arc<MemoryStore>, Arc<CacheAnalytics>) {
        let store = Arc::new(MemoryStore::new());
        let analytics = Arc::new(CacheAnalytics::default());
        let layer = CacheLayer::new(
            "hot",
            store.clone(),
            analytics.clone(),
            max_entries,
            max_bytes,
            Duration::from_millis(200),
        );
        (layer, store, analytics)
    }

    #[test]
    fn test_index_evicts_lowest_priority_first() {
        let mut index = EvictionIndex::new();
        index.insert("enterprise".to_string(), 4, 1);
        index.insert("free".to_string(), 1, 1);
        index.insert("pro".to_string(), 2, 1);

        assert_eq!(index.evict_over(2, u64::MAX), vec!["free".to_string()]);
        assert_eq!(index.evict_over(1, u64::MAX), vec!["pro".to_string()]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_index_lru_within_priority() {
        let mut index = EvictionIndex::new();
        index.insert("a".to_string(), 2, 1);
        index.insert("b".to_string(), 2, 1);
        index.touch("a");

        assert_eq!(index.evict_over(1, u64::MAX), vec!["b".to_string()]);
    }

    #[test]
    fn test_index_tracks_bytes() {
        let mut index = EvictionIndex::new();
        index.insert("a".to_string(), 3, 40);
        index.insert("b".to_string(), 3, 40);
        index.insert("a".to_string(), 3, 10);
        assert_eq!(index.bytes, 50);

        assert_eq!(index.evict_over(10, 45), vec!["b".to_string()]);
        assert_eq!(index.bytes, 10);
        assert!(index.remove("a"));
        assert_eq!(index.bytes, 0);
    }

    #[tokio::test]
    async fn test_layer_get_set() {
        let (layer, _, analytics) = layer(10, u64::MAX);
        let now = Utc::now();

        assert!(layer.get("k", now).await.unwrap().is_none());
        layer.set(entry("k", 2, now)).await.unwrap();
        assert!(layer.get("k", now).await.unwrap().is_some());

        let stats = analytics.component_analytics("hot").unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_layer_expired_entry_is_a_miss_and_removed() {
        let (layer, store, _) = layer(10, u64::MAX);
        let now = Utc::now();
        layer.set(entry("k", 2, now)).await.unwrap();

        let later = now + ChronoDuration::hours(2);
        assert!(layer.get("k", later).await.unwrap().is_none());
        assert!(store.is_empty());
        assert_eq!(layer.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_layer_capacity_eviction() {
        let (layer, store, _) = layer(2, u64::MAX);
        let now = Utc::now();
        layer.set(entry("enterprise", 4, now)).await.unwrap();
        layer.set(entry("free", 1, now)).await.unwrap();
        layer.set(entry("premium", 3, now)).await.unwrap();

        assert_eq!(store.len(), 2);
        assert!(layer.get("free", now).await.unwrap().is_none());
        assert!(layer.get("enterprise", now).await.unwrap().is_some());
        assert!(layer.get("premium", now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_layer_purge_and_prefix_delete() {
        let (layer, _, _) = layer(10, u64::MAX);
        let now = Utc::now();
        layer.set(entry("ns:nba:1", 2, now)).await.unwrap();
        layer.set(entry("ns:nba:2", 2, now)).await.unwrap();
        let mut stale = entry("ns:nfl:1", 2, now);
        stale.expires_at = now - ChronoDuration::seconds(1);
        layer.set(stale).await.unwrap();

        assert_eq!(layer.purge_expired(now).await.unwrap(), 1);
        assert_eq!(layer.delete_prefix("ns:nba:").await.unwrap(), 2);
        assert_eq!(layer.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_load_index_from_existing_store() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for i in 0..3 {
            store.set(entry(&format!("k{}", i), 2, now)).await.unwrap();
        }

        let layer = CacheLayer::new(
            "durable",
            store.clone(),
            Arc::new(CacheAnalytics::default()),
            2,
            u64::MAX,
            Duration::from_millis(200),
        );
        assert_eq!(layer.load_index().await.unwrap(), 3);
        assert_eq!(layer.stats().entries, 2);
        assert_eq!(store.len(), 2);
    }
}
