// Popular-query tracking for cache warming
// Author: kelexine (https://github.com/kelexine)

use super::key::Params;
use super::models::Sport;
use crate::auth::Tier;
use crate::config::PopularityConfig;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// A query seen often enough to be worth refetching before it is asked for.
#[derive(Debug, Clone, Serialize)]
pub struct PopularQuery {
    pub sport: Sport,
    pub endpoint: String,
    pub params: Params,
    pub hits: u64,
    pub first_seen: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Tiers that have asked for it.
    pub tiers: BTreeSet<Tier>,
}

/// Access counts per canonical cache key.
#[derive(Debug)]
pub struct PopularityTracker {
    config: PopularityConfig,
    queries: Mutex<HashMap<String, PopularQuery>>,
}

impl PopularityTracker {
    pub fn new(config: PopularityConfig) -> Self {
        Self {
            config,
            queries: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(
        &self,
        key: &str,
        sport: Sport,
        endpoint: &str,
        params: &Params,
        tier: Tier,
        now: DateTime<Utc>,
    ) {
        let mut queries = self.queries.lock();

        if let Some(query) = queries.get_mut(key) {
            query.hits += 1;
            query.last_accessed = now;
            query.tiers.insert(tier);
            return;
        }

        if queries.len() >= self.config.max_tracked {
            Self::drop_stale(&mut queries, now, self.config.retention_days);
        }
        if queries.len() >= self.config.max_tracked {
            // Still full: forget the coldest query.
            let coldest = queries
                .iter()
                .min_by_key(|(_, q)| (q.hits, q.last_accessed))
                .map(|(k, _)| k.clone());
            if let Some(coldest) = coldest {
                queries.remove(&coldest);
            }
        }

        queries.insert(
            key.to_string(),
            PopularQuery {
                sport,
                endpoint: endpoint.to_string(),
                params: params.clone(),
                hits: 1,
                first_seen: now,
                last_accessed: now,
                tiers: BTreeSet::from([tier]),
            },
        );
    }

    /// Queries asked for by `tier` at least `min_hit_count` times, most
    /// requested first. `limit` falls back to the configured default.
    pub fn popular(&self, tier: Tier, limit: Option<usize>) -> Vec<(String, PopularQuery)> {
        let limit = limit.unwrap_or(self.config.limit);
        let mut found: Vec<(String, PopularQuery)> = self
            .queries
            .lock()
            .iter()
            .filter(|(_, q)| q.hits >= self.config.min_hit_count && q.tiers.contains(&tier))
            .map(|(k, q)| (k.clone(), q.clone()))
            .collect();

        found.sort_by(|(_, a), (_, b)| {
            b.hits
                .cmp(&a.hits)
                .then_with(|| b.last_accessed.cmp(&a.last_accessed))
        });
        found.truncate(limit);
        found
    }

    /// Forgets queries untouched for longer than the retention period.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let removed = Self::drop_stale(&mut self.queries.lock(), now, self.config.retention_days);
        if removed > 0 {
            debug!("Pruned {} stale popular queries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.lock().is_empty()
    }

    fn drop_stale(
        queries: &mut HashMap<String, PopularQuery>,
        now: DateTime<Utc>,
        retention_days: i64,
    ) -> usize {
        let cutoff = now - Duration::days(retention_days);
        let before = queries.len();
        queries.retain(|_, q| q.last_accessed >= cutoff);
        before - queries.len()
    }
}
