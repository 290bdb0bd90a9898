//! Per-component cache effectiveness ledger.
//!
//! Components only report events here; nothing in the cache path reads the
//! counters back to make a decision. Counters are plain atomics. The latency
//! ring and the recent-outcome window share one short-held lock per
//! component.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::config::AnalyticsConfig;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Percentiles are only reported once this many samples exist.
const MIN_PERCENTILE_SAMPLES: usize = 20;
/// Average latency above which a recommendation is emitted.
const SLOW_AVG_LATENCY_MS: f64 = 50.0;
/// Storage above which a recommendation is emitted.
const LARGE_STORAGE_BYTES: u64 = 500 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Hit,
    Miss,
    Error,
}

#[derive(Debug, Default)]
struct Samples {
    latencies: VecDeque<Duration>,
    recent: VecDeque<Outcome>,
}

#[derive(Debug, Default)]
struct ComponentRecord {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    entries: AtomicU64,
    bytes: AtomicU64,
    samples: Mutex<Samples>,
}

/// Health classification, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentAnalytics {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
    pub error_rate: f64,
    pub entries: u64,
    pub bytes: u64,
    pub latency: LatencySummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveAnalytics {
    pub components: BTreeMap<String, ComponentAnalytics>,
    pub overall_hit_rate: f64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_errors: u64,
    pub total_requests: u64,
    pub uptime_seconds: u64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: Health,
    /// Error rate over the recent-outcome window.
    pub window_error_rate: f64,
    /// Hit rate over the recent-outcome window.
    pub window_hit_rate: f64,
    pub window_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: Health,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Hit/miss/error/latency bookkeeping for every cache component.
#[derive(Debug)]
pub struct CacheAnalytics {
    config: AnalyticsConfig,
    components: RwLock<HashMap<String, Arc<ComponentRecord>>>,
    started_at: Instant,
}

impl CacheAnalytics {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            components: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    /// Idempotent.
    pub fn register(&self, component: &str) {
        self.component(component);
    }

    pub fn record_hit(&self, component: &str, latency: Duration) {
        let record = self.component(component);
        record.hits.fetch_add(1, Ordering::Relaxed);
        self.push_sample(&record, Outcome::Hit, Some(latency));
    }

    pub fn record_miss(&self, component: &str, latency: Duration) {
        let record = self.component(component);
        record.misses.fetch_add(1, Ordering::Relaxed);
        self.push_sample(&record, Outcome::Miss, Some(latency));
    }

    pub fn record_error(&self, component: &str) {
        let record = self.component(component);
        record.errors.fetch_add(1, Ordering::Relaxed);
        self.push_sample(&record, Outcome::Error, None);
    }

    /// Latest occupancy reported by a layer.
    pub fn update_cache_size(&self, component: &str, entries: u64, bytes: u64) {
        let record = self.component(component);
        record.entries.store(entries, Ordering::Relaxed);
        record.bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn component_analytics(&self, component: &str) -> Option<ComponentAnalytics> {
        let record = self.components.read().get(component).cloned()?;
        Some(Self::summarize(&record))
    }

    pub fn comprehensive(&self) -> ComprehensiveAnalytics {
        let components: BTreeMap<String, ComponentAnalytics> = self
            .snapshot()
            .into_iter()
            .map(|(name, record)| (name, Self::summarize(&record)))
            .collect();

        let total_hits: u64 = components.values().map(|c| c.hits).sum();
        let total_misses: u64 = components.values().map(|c| c.misses).sum();
        let total_errors: u64 = components.values().map(|c| c.errors).sum();
        let recommendations = self.recommendations(&components);

        ComprehensiveAnalytics {
            overall_hit_rate: ratio(total_hits, total_hits + total_misses),
            total_hits,
            total_misses,
            total_errors,
            total_requests: total_hits + total_misses + total_errors,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            recommendations,
            components,
        }
    }

    pub fn health(&self) -> HealthReport {
        let components: BTreeMap<String, ComponentHealth> = self
            .snapshot()
            .into_iter()
            .map(|(name, record)| (name, self.component_health(&record)))
            .collect();

        let overall = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(Health::Healthy);

        HealthReport {
            overall,
            components,
        }
    }

    pub fn reset_component(&self, component: &str) {
        if let Some(record) = self.components.read().get(component) {
            Self::clear(record);
        }
    }

    pub fn reset_all(&self) {
        for record in self.components.read().values() {
            Self::clear(record);
        }
    }

    fn component(&self, name: &str) -> Arc<ComponentRecord> {
        if let Some(record) = self.components.read().get(name) {
            return record.clone();
        }
        self.components
            .write()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn snapshot(&self) -> Vec<(String, Arc<ComponentRecord>)> {
        self.components
            .read()
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect()
    }

    fn push_sample(&self, record: &ComponentRecord, outcome: Outcome, latency: Option<Duration>) {
        let mut samples = record.samples.lock();
        if let Some(latency) = latency {
            if samples.latencies.len() >= self.config.latency_samples.max(1) {
                samples.latencies.pop_front();
            }
            samples.latencies.push_back(latency);
        }
        if samples.recent.len() >= self.config.health_window.max(1) {
            samples.recent.pop_front();
        }
        samples.recent.push_back(outcome);
    }

    fn clear(record: &ComponentRecord) {
        record.hits.store(0, Ordering::Relaxed);
        record.misses.store(0, Ordering::Relaxed);
        record.errors.store(0, Ordering::Relaxed);
        let mut samples = record.samples.lock();
        samples.latencies.clear();
        samples.recent.clear();
    }

    fn summarize(record: &ComponentRecord) -> ComponentAnalytics {
        let hits = record.hits.load(Ordering::Relaxed);
        let misses = record.misses.load(Ordering::Relaxed);
        let errors = record.errors.load(Ordering::Relaxed);
        let latencies: Vec<Duration> = record.samples.lock().latencies.iter().copied().collect();

        ComponentAnalytics {
            hits,
            misses,
            errors,
            total_requests: hits + misses + errors,
            hit_rate: ratio(hits, hits + misses),
            error_rate: ratio(errors, hits + misses + errors),
            entries: record.entries.load(Ordering::Relaxed),
            bytes: record.bytes.load(Ordering::Relaxed),
            latency: latency_summary(latencies),
        }
    }

    fn component_health(&self, record: &ComponentRecord) -> ComponentHealth {
        let samples = record.samples.lock();
        let window_size = samples.recent.len();
        let mut hits = 0u64;
        let mut misses = 0u64;
        let mut errors = 0u64;
        for outcome in &samples.recent {
            match outcome {
                Outcome::Hit => hits += 1,
                Outcome::Miss => misses += 1,
                Outcome::Error => errors += 1,
            }
        }
        drop(samples);

        let window_error_rate = ratio(errors, window_size as u64);
        let window_hit_rate = ratio(hits, hits + misses);

        // A component with no lookups in the window has nothing to be degraded about.
        let status = if window_error_rate > self.config.error_rate_threshold {
            Health::Unhealthy
        } else if hits + misses > 0 && window_hit_rate < self.config.hit_rate_floor {
            Health::Degraded
        } else {
            Health::Healthy
        };

        ComponentHealth {
            status,
            window_error_rate,
            window_hit_rate,
            window_size,
        }
    }

    fn recommendations(&self, components: &BTreeMap<String, ComponentAnalytics>) -> Vec<String> {
        let mut out = Vec::new();
        for (name, c) in components {
            if c.hits + c.misses > 0 && c.hit_rate < self.config.hit_rate_floor {
                out.push(format!(
                    "{}: hit rate {:.1}% is low; consider longer TTLs or warming popular queries",
                    name,
                    c.hit_rate * 100.0
                ));
            }
            if c.error_rate > self.config.error_rate_threshold {
                out.push(format!(
                    "{}: error rate {:.1}% is high; check the backing store",
                    name,
                    c.error_rate * 100.0
                ));
            }
            if c.latency.samples > 0 && c.latency.avg_ms > SLOW_AVG_LATENCY_MS {
                out.push(format!(
                    "{}: average latency {:.1}ms is high; consider a faster backing store",
                    name, c.latency.avg_ms
                ));
            }
            if c.bytes > LARGE_STORAGE_BYTES {
                out.push(format!(
                    "{}: storing {} MiB; consider lowering its capacity",
                    name,
                    c.bytes / (1024 * 1024)
                ));
            }
        }
        out
    }
}

impl Default for CacheAnalytics {
    fn default() -> Self {
        Self::new(AnalyticsConfig::default())
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn latency_summary(mut latencies: Vec<Duration>) -> LatencySummary {
    if latencies.is_empty() {
        return LatencySummary::default();
    }
    latencies.sort_unstable();

    let as_ms = |d: &Duration| d.as_nanos() as f64 / 1_000_000.0;
    let n = latencies.len();
    let total: f64 = latencies.iter().map(as_ms).sum();
    let percentile = |p: f64| {
        let idx = ((n as f64 * p).ceil() as usize).clamp(1, n) - 1;
        as_ms(&latencies[idx])
    };
    let (p95_ms, p99_ms) = if n >= MIN_PERCENTILE_SAMPLES {
        (Some(percentile(0.95)), Some(percentile(0.99)))
    } else {
        (None, None)
    };

    LatencySummary {
        samples: n,
        avg_ms: total / n as f64,
        min_ms: as_ms(&latencies[0]),
        max_ms: as_ms(&latencies[n - 1]),
        p95_ms,
        p99_ms,
    }
}
