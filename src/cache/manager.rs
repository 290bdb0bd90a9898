// Cache orchestrator - one get/set/invalidate surface over ordered layers
// Author: kelexine (https://github.com/kelexine)

use super::analytics::{CacheAnalytics, ComprehensiveAnalytics, HealthReport};
use super::key::{CacheKeyBuilder, Params};
use super::layer::CacheLayer;
use super::models::{CachedValue, LayerStats, LayerWrite, SetOutcome, Sport, StoredEntry, TierCacheStats};
use super::policy::{decode_payload, encode_payload, probe_order, ttl_for};
use super::popularity::{PopularQuery, PopularityTracker};
use super::store::{FileStore, MemoryStore};
use crate::auth::{Tier, TierTable};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::metrics;
use crate::utils::Clock;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const HOT_LAYER: &str = "hot";
pub const DURABLE_LAYER: &str = "durable";

/// Multi-layer cache with tier-aware TTLs, probe order and eviction.
///
/// Layers are held fast to slow. Cache failures never escape this type:
/// a failing layer behaves like an empty one.
pub struct CacheOrchestrator {
    layers: Vec<CacheLayer>,
    keys: CacheKeyBuilder,
    tiers: Arc<TierTable>,
    analytics: Arc<CacheAnalytics>,
    clock: Arc<dyn Clock>,
    compression_threshold: usize,
    popularity: PopularityTracker,
    tier_stats: Mutex<HashMap<Tier, TierCacheStats>>,
    /// Bumped by every invalidation. Invalidations hold the write side for
    /// their whole run; promotions hold the read side across their writes.
    generation: RwLock<u64>,
}

/// Runs `fut` to completion, or until `deadline` when one is given.
async fn within<T>(deadline: Option<Instant>, fut: impl Future<Output = T>) -> Option<T> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

impl CacheOrchestrator {
    pub fn new(
        layers: Vec<CacheLayer>,
        config: &CacheConfig,
        tiers: Arc<TierTable>,
        analytics: Arc<CacheAnalytics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            layers,
            keys: CacheKeyBuilder::new(&config.namespace, &config.version),
            tiers,
            analytics,
            clock,
            compression_threshold: config.compression_threshold_bytes,
            popularity: PopularityTracker::new(config.popularity.clone()),
            tier_stats: Mutex::new(HashMap::new()),
            generation: RwLock::new(0),
        }
    }

    /// Builds the `hot` (memory) and `durable` (file) layers described by
    /// `config`. A durable directory that cannot be opened is logged and
    /// the layer skipped.
    pub async fn from_config(
        config: &CacheConfig,
        tiers: Arc<TierTable>,
        analytics: Arc<CacheAnalytics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let timeout = Duration::from_millis(config.operation_timeout_ms);
        let mut layers = Vec::new();

        if config.hot.enabled {
            layers.push(CacheLayer::new(
                HOT_LAYER,
                Arc::new(MemoryStore::new()),
                analytics.clone(),
                config.hot.max_entries,
                config.hot.max_bytes,
                timeout,
            ));
        }

        if config.durable.enabled {
            match FileStore::open(&config.durable.directory).await {
                Ok(store) => {
                    let layer = CacheLayer::new(
                        DURABLE_LAYER,
                        Arc::new(store),
                        analytics.clone(),
                        config.durable.max_entries,
                        config.durable.max_bytes,
                        timeout,
                    );
                    if let Err(e) = layer.load_index().await {
                        warn!("Durable cache index not loaded: {}", e);
                    }
                    layers.push(layer);
                }
                Err(e) => warn!("Durable cache layer disabled: {}", e),
            }
        }

        info!(
            "Cache orchestrator ready with layers: [{}]",
            layers
                .iter()
                .map(CacheLayer::name)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self::new(layers, config, tiers, analytics, clock)
    }

    pub fn cache_key(&self, sport: Sport, endpoint: &str, params: &Params) -> Result<String> {
        self.keys.build(sport, endpoint, params)
    }

    /// Looks a query up, probing layers in the order the tier's cache
    /// priority dictates. Only malformed input is an error.
    pub async fn get(
        &self,
        sport: Sport,
        endpoint: &str,
        params: &Params,
        tier: Tier,
    ) -> Result<Option<CachedValue>> {
        self.lookup(sport, endpoint, params, tier, None).await
    }

    /// `get` bounded by a caller deadline. Layers not reached in time count
    /// as misses; cache state is left consistent.
    pub async fn get_within(
        &self,
        sport: Sport,
        endpoint: &str,
        params: &Params,
        tier: Tier,
        timeout: Duration,
    ) -> Result<Option<CachedValue>> {
        self.lookup(sport, endpoint, params, tier, Some(Instant::now() + timeout))
            .await
    }

    async fn lookup(
        &self,
        sport: Sport,
        endpoint: &str,
        params: &Params,
        tier: Tier,
        deadline: Option<Instant>,
    ) -> Result<Option<CachedValue>> {
        let key = self.keys.build(sport, endpoint, params)?;
        let now = self.clock.now();
        let seen = *self.generation.read().await;
        self.popularity
            .record(&key, sport, endpoint, params, tier, now);

        let priority = self.tiers.cache_priority(tier);
        let mut missed = Vec::with_capacity(self.layers.len());

        for idx in probe_order(self.layers.len(), priority) {
            let layer = &self.layers[idx];
            let Some(found) = within(deadline, layer.get(&key, now)).await else {
                debug!("Deadline reached probing {} layer for {}", layer.name(), key);
                break;
            };
            let entry = match found {
                Ok(Some(entry)) => entry,
                // Errors were already recorded by the layer.
                Ok(None) | Err(_) => {
                    missed.push(idx);
                    continue;
                }
            };

            match decode_payload(&entry.payload, entry.compressed) {
                Ok(value) => {
                    if within(deadline, self.promote(&entry, idx, &missed, seen))
                        .await
                        .is_none()
                    {
                        debug!("Deadline reached promoting {}", key);
                    }
                    self.count_request(tier, true);
                    debug!("Cache hit for {} in {} layer", key, layer.name());
                    return Ok(Some(CachedValue {
                        value,
                        layer: layer.name().to_string(),
                        expires_at: entry.expires_at,
                        origin_priority: entry.origin_priority,
                    }));
                }
                Err(e) => {
                    warn!("Dropping undecodable entry {} from {}: {}", key, layer.name(), e);
                    self.analytics.record_error(layer.name());
                    let _ = layer.delete(&key).await;
                    missed.push(idx);
                }
            }
        }

        self.count_request(tier, false);
        Ok(None)
    }

    /// Stores a fetched value in every layer. Individual layer failures are
    /// reported in the outcome, never as an error.
    pub async fn set(
        &self,
        sport: Sport,
        endpoint: &str,
        params: &Params,
        value: &serde_json::Value,
        tier: Tier,
    ) -> Result<SetOutcome> {
        self.store(sport, endpoint, params, value, tier, None).await
    }

    /// `set` bounded by a caller deadline. Layers not written in time are
    /// reported as failed writes in the outcome.
    pub async fn set_within(
        &self,
        sport: Sport,
        endpoint: &str,
        params: &Params,
        value: &serde_json::Value,
        tier: Tier,
        timeout: Duration,
    ) -> Result<SetOutcome> {
        self.store(sport, endpoint, params, value, tier, Some(Instant::now() + timeout))
            .await
    }

    async fn store(
        &self,
        sport: Sport,
        endpoint: &str,
        params: &Params,
        value: &serde_json::Value,
        tier: Tier,
        deadline: Option<Instant>,
    ) -> Result<SetOutcome> {
        let key = self.keys.build(sport, endpoint, params)?;
        let ttl = ttl_for(sport, endpoint, tier);
        let (payload, compressed) = encode_payload(value, self.compression_threshold)?;

        let entry = StoredEntry {
            key: key.clone(),
            payload,
            compressed,
            expires_at: self.clock.now() + ttl,
            origin_priority: self.tiers.cache_priority(tier),
        };
        let size_bytes = entry.size_bytes();

        let writes = join_all(self.layers.iter().map(|layer| {
            let entry = entry.clone();
            async move {
                let (stored, error) = match within(deadline, layer.set(entry)).await {
                    Some(Ok(())) => (true, None),
                    Some(Err(e)) => (false, Some(e.to_string())),
                    None => (false, Some("deadline elapsed".to_string())),
                };
                LayerWrite {
                    layer: layer.name().to_string(),
                    stored,
                    error,
                }
            }
        }))
        .await;

        debug!(
            "Cached {} for {}s ({} bytes, compressed: {})",
            key,
            ttl.num_seconds(),
            size_bytes,
            compressed
        );

        Ok(SetOutcome {
            key,
            ttl_seconds: ttl.num_seconds(),
            compressed,
            size_bytes,
            layers: writes,
        })
    }

    /// Removes one query (`params` given) or every query under the sport and
    /// endpoint. Returns the number of entries removed across layers.
    pub async fn invalidate(
        &self,
        sport: Sport,
        endpoint: &str,
        params: Option<&Params>,
    ) -> Result<usize> {
        let prefix = self.keys.endpoint_prefix(sport, endpoint)?;
        let key = params
            .map(|params| self.keys.build(sport, endpoint, params))
            .transpose()?;

        let mut generation = self.generation.write().await;
        *generation += 1;
        let removed = match key {
            Some(key) => {
                let mut removed = 0;
                for layer in &self.layers {
                    if let Ok(true) = layer.delete(&key).await {
                        removed += 1;
                    }
                }
                removed
            }
            None => self.delete_prefix(&prefix).await,
        };
        drop(generation);

        info!("Invalidated {} cache entries for {}/{}", removed, sport, endpoint);
        Ok(removed)
    }

    /// Removes every cached query for a sport.
    pub async fn invalidate_sport(&self, sport: Sport) -> usize {
        let mut generation = self.generation.write().await;
        *generation += 1;
        let removed = self.delete_prefix(&self.keys.sport_prefix(sport)).await;
        drop(generation);
        info!("Invalidated {} cache entries for {}", removed, sport);
        removed
    }

    /// Cleanup pass: drops expired entries from every layer and forgets
    /// stale popular queries.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        for layer in &self.layers {
            match layer.purge_expired(now).await {
                Ok(n) => removed += n,
                Err(e) => warn!("Cleanup of {} layer failed: {}", layer.name(), e),
            }
        }
        self.popularity.prune(now);
        debug!("Purged {} expired cache entries", removed);
        removed
    }

    /// Whether any layer holds a live entry for the query. Does not count as
    /// a lookup.
    pub async fn is_cached(&self, sport: Sport, endpoint: &str, params: &Params) -> Result<bool> {
        let key = self.keys.build(sport, endpoint, params)?;
        let now = self.clock.now();
        for layer in &self.layers {
            if let Ok(true) = layer.contains(&key, now).await {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Warming candidates for a tier; `limit` defaults to the configured one.
    pub fn popular_queries(&self, tier: Tier, limit: Option<usize>) -> Vec<PopularQuery> {
        self.popularity
            .popular(tier, limit)
            .into_iter()
            .map(|(_, q)| q)
            .collect()
    }

    pub fn analytics(&self) -> ComprehensiveAnalytics {
        self.analytics.comprehensive()
    }

    pub fn health(&self) -> HealthReport {
        self.analytics.health()
    }

    pub fn layer_stats(&self) -> Vec<LayerStats> {
        self.layers.iter().map(CacheLayer::stats).collect()
    }

    pub fn tier_stats(&self) -> BTreeMap<Tier, TierCacheStats> {
        self.tier_stats
            .lock()
            .iter()
            .map(|(tier, stats)| (*tier, *stats))
            .collect()
    }

    /// Copies a hit into the faster layers that just missed it, keeping its
    /// expiry and priority. Skipped when an invalidation ran since `seen`
    /// was read.
    async fn promote(&self, entry: &StoredEntry, hit_idx: usize, missed: &[usize], seen: u64) {
        let generation = self.generation.read().await;
        if *generation != seen {
            debug!("Skipping promotion of {}: invalidated during lookup", entry.key);
            return;
        }
        for &idx in missed.iter().filter(|&&idx| idx < hit_idx) {
            let layer = &self.layers[idx];
            match layer.set(entry.clone()).await {
                Ok(()) => metrics::record_cache_operation(layer.name(), "promotion", None),
                Err(e) => debug!("Promotion of {} into {} failed: {}", entry.key, layer.name(), e),
            }
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        for layer in &self.layers {
            match layer.delete_prefix(prefix).await {
                Ok(n) => removed += n,
                Err(e) => warn!("Invalidation in {} layer failed: {}", layer.name(), e),
            }
        }
        removed
    }

    fn count_request(&self, tier: Tier, hit: bool) {
        let mut stats = self.tier_stats.lock();
        let entry = stats.entry(tier).or_default();
        entry.requests += 1;
        if hit {
            entry.hits += 1;
        }
    }
}

impl std::fmt::Debug for CacheOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOrchestrator")
            .field("layers", &self.layers)
            .field("keys", &self.keys)
            .field("compression_threshold", &self.compression_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::models::EntryMeta;
    use crate::cache::store::BackingStore;
    use crate::error::GuardError;
    use crate::utils::ManualClock;
    use async_trait::async_trait;
    use serde_json::json;

    /// A store that fails every call.
    #[derive(Debug)]
    struct BrokenStore;

    #[async_trait]
    impl BackingStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<StoredEntry>> {
            Err(GuardError::CacheBackend("connection refused".to_string()))
        }
        async fn set(&self, _entry: StoredEntry) -> Result<()> {
            Err(GuardError::CacheBackend("connection refused".to_string()))
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(GuardError::CacheBackend("connection refused".to_string()))
        }
        async fn scan_prefix(&self, _prefix: &str) -> Result<Vec<EntryMeta>> {
            Err(GuardError::CacheBackend("connection refused".to_string()))
        }
    }

    struct Fixture {
        cache: CacheOrchestrator,
        clock: ManualClock,
        hot: Arc<MemoryStore>,
        durable: Arc<MemoryStore>,
    }

    fn layer(name: &str, store: Arc<dyn BackingStore>, analytics: &Arc<CacheAnalytics>) -> CacheLayer {
        CacheLayer::new(name, store, analytics.clone(), 100, u64::MAX, Duration::from_millis(200))
    }

    fn fixture() -> Fixture {
        let analytics = Arc::new(CacheAnalytics::default());
        let hot = Arc::new(MemoryStore::new());
        let durable = Arc::new(MemoryStore::new());
        let clock = ManualClock::default();
        let cache = CacheOrchestrator::new(
            vec![
                layer(HOT_LAYER, hot.clone(), &analytics),
                layer(DURABLE_LAYER, durable.clone(), &analytics),
            ],
            &CacheConfig::default(),
            Arc::new(TierTable::default()),
            analytics,
            Arc::new(clock.clone()),
        );
        Fixture {
            cache,
            clock,
            hot,
            durable,
        }
    }

    fn season(year: i64) -> Params {
        let mut params = Params::new();
        params.insert("season".to_string(), json!(year));
        params
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let f = fixture();
        let value = json!({"data": [{"id": 1, "full_name": "Atlanta Hawks"}]});

        let outcome = f
            .cache
            .set(Sport::Nba, "teams", &season(2024), &value, Tier::Pro)
            .await
            .unwrap();
        assert!(outcome.layers.iter().all(|l| l.stored));
        assert_eq!(outcome.ttl_seconds, 103_680);

        let hit = f
            .cache
            .get(Sport::Nba, "teams", &season(2024), Tier::Pro)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.value, value);
        assert_eq!(hit.layer, HOT_LAYER);
        assert_eq!(hit.origin_priority, 2);
    }

    #[tokio::test]
    async fn test_free_tier_probes_durable_first() {
        let f = fixture();
        f.cache
            .set(Sport::Nba, "players", &Params::new(), &json!([1]), Tier::Free)
            .await
            .unwrap();

        let hit = f
            .cache
            .get(Sport::Nba, "players", &Params::new(), Tier::Free)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.layer, DURABLE_LAYER);

        let analytics = f.cache.analytics();
        assert_eq!(analytics.components[DURABLE_LAYER].hits, 1);
        assert_eq!(analytics.components[HOT_LAYER].hits, 0);
        assert_eq!(analytics.components[HOT_LAYER].misses, 0);
    }

    #[tokio::test]
    async fn test_miss_recorded_on_every_probed_layer() {
        let f = fixture();
        let found = f
            .cache
            .get(Sport::Mlb, "games", &season(2023), Tier::Premium)
            .await
            .unwrap();
        assert!(found.is_none());

        let analytics = f.cache.analytics();
        assert_eq!(analytics.components[HOT_LAYER].misses, 1);
        assert_eq!(analytics.components[DURABLE_LAYER].misses, 1);
        assert_eq!(analytics.overall_hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_durable_hit_promoted_to_hot() {
        let f = fixture();
        f.cache
            .set(Sport::Nfl, "teams", &Params::new(), &json!({"id": 7}), Tier::Enterprise)
            .await
            .unwrap();
        let key = f.cache.cache_key(Sport::Nfl, "teams", &Params::new()).unwrap();
        f.hot.delete(&key).await.unwrap();

        let hit = f
            .cache
            .get(Sport::Nfl, "teams", &Params::new(), Tier::Enterprise)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.layer, DURABLE_LAYER);

        let promoted = f.hot.get(&key).await.unwrap().unwrap();
        assert_eq!(promoted.expires_at, hit.expires_at);
        assert_eq!(promoted.origin_priority, 4);

        let again = f
            .cache
            .get(Sport::Nfl, "teams", &Params::new(), Tier::Enterprise)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.layer, HOT_LAYER);
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_returned() {
        let f = fixture();
        f.cache
            .set(Sport::Nba, "box_scores", &Params::new(), &json!([]), Tier::Free)
            .await
            .unwrap();

        f.clock.advance(chrono::Duration::seconds(1_799));
        assert!(f
            .cache
            .get(Sport::Nba, "box_scores", &Params::new(), Tier::Free)
            .await
            .unwrap()
            .is_some());

        f.clock.advance(chrono::Duration::seconds(1));
        assert!(f
            .cache
            .get(Sport::Nba, "box_scores", &Params::new(), Tier::Free)
            .await
            .unwrap()
            .is_none());
        assert!(f.hot.is_empty());
        assert!(f.durable.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_single_and_prefix() {
        let f = fixture();
        for year in [2022, 2023, 2024] {
            f.cache
                .set(Sport::Nba, "games", &season(year), &json!(year), Tier::Pro)
                .await
                .unwrap();
        }
        f.cache
            .set(Sport::Nba, "games/live", &Params::new(), &json!([]), Tier::Pro)
            .await
            .unwrap();

        assert_eq!(
            f.cache
                .invalidate(Sport::Nba, "games", Some(&season(2022)))
                .await
                .unwrap(),
            2
        );
        assert!(f
            .cache
            .get(Sport::Nba, "games", &season(2022), Tier::Pro)
            .await
            .unwrap()
            .is_none());

        assert_eq!(f.cache.invalidate(Sport::Nba, "games", None).await.unwrap(), 4);
        assert!(f
            .cache
            .is_cached(Sport::Nba, "games/live", &Params::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_sport() {
        let f = fixture();
        f.cache
            .set(Sport::Epl, "teams", &Params::new(), &json!(1), Tier::Pro)
            .await
            .unwrap();
        f.cache
            .set(Sport::Nhl, "teams", &Params::new(), &json!(1), Tier::Pro)
            .await
            .unwrap();

        assert_eq!(f.cache.invalidate_sport(Sport::Epl).await, 2);
        assert!(f
            .cache
            .is_cached(Sport::Nhl, "teams", &Params::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_invalid_input_rejected() {
        let f = fixture();
        let err = f
            .cache
            .get(Sport::Nba, "Teams!", &Params::new(), Tier::Free)
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_failing_layer_does_not_fail_operations() {
        let analytics = Arc::new(CacheAnalytics::default());
        let hot = Arc::new(MemoryStore::new());
        let cache = CacheOrchestrator::new(
            vec![
                layer(HOT_LAYER, hot.clone(), &analytics),
                layer(DURABLE_LAYER, Arc::new(BrokenStore), &analytics),
            ],
            &CacheConfig::default(),
            Arc::new(TierTable::default()),
            analytics.clone(),
            Arc::new(ManualClock::default()),
        );

        let outcome = cache
            .set(Sport::Nba, "teams", &Params::new(), &json!(1), Tier::Free)
            .await
            .unwrap();
        assert!(outcome.stored_anywhere());
        let durable = outcome
            .layers
            .iter()
            .find(|l| l.layer == DURABLE_LAYER)
            .unwrap();
        assert!(!durable.stored);
        assert!(durable.error.is_some());

        // Free probes the broken durable layer first, then finds it in hot.
        let hit = cache
            .get(Sport::Nba, "teams", &Params::new(), Tier::Free)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.layer, HOT_LAYER);
        assert_eq!(
            analytics.component_analytics(DURABLE_LAYER).unwrap().errors,
            2
        );
        assert_eq!(cache.invalidate(Sport::Nba, "teams", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tier_stats_and_popular_queries() {
        let f = fixture();
        f.cache
            .set(Sport::Nba, "teams", &Params::new(), &json!(1), Tier::Premium)
            .await
            .unwrap();
        for _ in 0..5 {
            f.cache
                .get(Sport::Nba, "teams", &Params::new(), Tier::Premium)
                .await
                .unwrap();
        }
        f.cache
            .get(Sport::Nba, "players", &Params::new(), Tier::Premium)
            .await
            .unwrap();

        let stats = f.cache.tier_stats();
        assert_eq!(stats[&Tier::Premium].requests, 6);
        assert_eq!(stats[&Tier::Premium].hits, 5);

        let popular = f.cache.popular_queries(Tier::Premium, None);
        assert_eq!(popular.len(), 1);
        assert_eq!(popular[0].endpoint, "teams");
        assert!(f.cache.popular_queries(Tier::Free, None).is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let f = fixture();
        f.cache
            .set(Sport::Nba, "games", &Params::new(), &json!(1), Tier::Free)
            .await
            .unwrap();
        f.cache
            .set(Sport::Nba, "teams", &Params::new(), &json!(1), Tier::Free)
            .await
            .unwrap();

        f.clock.advance(chrono::Duration::hours(2));
        assert_eq!(f.cache.purge_expired().await, 2);
        assert_eq!(f.hot.len(), 1);
        assert_eq!(f.durable.len(), 1);
    }

    /// Memory store whose reads and writes take a while.
    #[derive(Debug, Default)]
    struct SlowStore {
        inner: MemoryStore,
        get_delay: Duration,
        set_delay: Duration,
    }

    #[async_trait]
    impl BackingStore for SlowStore {
        async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
            tokio::time::sleep(self.get_delay).await;
            self.inner.get(key).await
        }
        async fn set(&self, entry: StoredEntry) -> Result<()> {
            tokio::time::sleep(self.set_delay).await;
            self.inner.set(entry).await
        }
        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }
        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<EntryMeta>> {
            self.inner.scan_prefix(prefix).await
        }
    }

    fn slow_cache(hot: Arc<SlowStore>, durable: Arc<MemoryStore>) -> CacheOrchestrator {
        let analytics = Arc::new(CacheAnalytics::default());
        CacheOrchestrator::new(
            vec![
                layer(HOT_LAYER, hot, &analytics),
                layer(DURABLE_LAYER, durable, &analytics),
            ],
            &CacheConfig::default(),
            Arc::new(TierTable::default()),
            analytics,
            Arc::new(ManualClock::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_wins_over_in_flight_promotion() {
        let hot = Arc::new(SlowStore {
            set_delay: Duration::from_millis(100),
            ..Default::default()
        });
        let durable = Arc::new(MemoryStore::new());
        let cache = Arc::new(slow_cache(hot.clone(), durable.clone()));

        let key = cache.cache_key(Sport::Nba, "teams", &season(2024)).unwrap();
        let (payload, compressed) = encode_payload(&json!({"v": 1}), 1024).unwrap();
        durable
            .set(StoredEntry {
                key,
                payload,
                compressed,
                expires_at: cache.clock.now() + chrono::Duration::hours(1),
                origin_priority: 4,
            })
            .await
            .unwrap();

        // Finds the entry in durable and starts a slow copy into hot.
        let reader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get(Sport::Nba, "teams", &season(2024), Tier::Enterprise)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let removed = cache
            .invalidate(Sport::Nba, "teams", Some(&season(2024)))
            .await
            .unwrap();
        assert!(removed >= 1);

        let raced = reader.await.unwrap().unwrap();
        assert_eq!(raced.map(|hit| hit.value), Some(json!({"v": 1})));

        assert!(cache
            .get(Sport::Nba, "teams", &season(2024), Tier::Enterprise)
            .await
            .unwrap()
            .is_none());
        assert!(hot.inner.is_empty());
        assert!(durable.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_skipped_after_invalidation() {
        let cache = slow_cache(Arc::new(SlowStore::default()), Arc::new(MemoryStore::new()));
        cache
            .set(Sport::Nba, "games", &season(2023), &json!([1]), Tier::Pro)
            .await
            .unwrap();
        let entry = cache.layers[1]
            .get(&cache.cache_key(Sport::Nba, "games", &season(2023)).unwrap(), cache.clock.now())
            .await
            .unwrap()
            .unwrap();
        cache.invalidate_sport(Sport::Nba).await;

        // A lookup that started before the invalidation must not write back.
        cache.promote(&entry, 1, &[0], 0).await;
        assert!(!cache
            .is_cached(Sport::Nba, "games", &season(2023))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_deadline_bounds_lookup() {
        let hot = Arc::new(SlowStore {
            get_delay: Duration::from_millis(150),
            ..Default::default()
        });
        let cache = slow_cache(hot, Arc::new(MemoryStore::new()));
        cache
            .set(Sport::Nba, "teams", &season(2024), &json!("roster"), Tier::Pro)
            .await
            .unwrap();

        let started = Instant::now();
        let hit = cache
            .get_within(Sport::Nba, "teams", &season(2024), Tier::Pro, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(hit.is_none());
        assert!(started.elapsed() < Duration::from_millis(150));

        // Without a deadline the same lookup completes.
        let hit = cache
            .get(Sport::Nba, "teams", &season(2024), Tier::Pro)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.value, json!("roster"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_deadline_bounds_write() {
        let hot = Arc::new(SlowStore {
            set_delay: Duration::from_millis(150),
            ..Default::default()
        });
        let cache = slow_cache(hot.clone(), Arc::new(MemoryStore::new()));

        let outcome = cache
            .set_within(
                Sport::Nba,
                "teams",
                &season(2024),
                &json!("roster"),
                Tier::Pro,
                Duration::from_millis(50),
            )
            .await
            .unwrap();

        let hot_write = outcome.layers.iter().find(|w| w.layer == HOT_LAYER).unwrap();
        assert!(!hot_write.stored);
        assert_eq!(hot_write.error.as_deref(), Some("deadline elapsed"));
        assert!(outcome.stored_anywhere());
        assert!(hot.inner.is_empty());
        assert_eq!(cache.layer_stats()[0].entries, 0);
    }
}
