//! Configuration data structures for hoopguard.
//!
//! This module defines the schema for the application settings: startup
//! credentials, tier overrides, cache layer sizing, analytics thresholds,
//! gateway retry policy, and logging.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::auth::{Tier, TierOverride};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The root configuration object for the application.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Primary upstream credential (`HOOPGUARD_API_KEY`).
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base64 vault secret (`HOOPGUARD_ENCRYPTION_KEY`).
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// JSON array of `{key, tier, label}` (`HOOPGUARD_API_KEYS`).
    #[serde(default)]
    pub api_keys: Option<String>,

    /// Per-tier overrides of the built-in quota table.
    #[serde(default)]
    pub tiers: HashMap<Tier, TierOverride>,

    /// Cache layers and key layout.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Cache health thresholds and sample sizes.
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Upstream call policy.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Credentials never appear in debug output.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("encryption_key", &redact(&self.encryption_key))
            .field("api_keys", &redact(&self.api_keys))
            .field("tiers", &self.tiers)
            .field("cache", &self.cache)
            .field("analytics", &self.analytics)
            .field("gateway", &self.gateway)
            .field("logging", &self.logging)
            .finish()
    }
}

/// One entry of the `HOOPGUARD_API_KEYS` array.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyBootstrap {
    pub key: String,
    #[serde(default = "default_bootstrap_tier")]
    pub tier: Tier,
    #[serde(default = "default_bootstrap_label")]
    pub label: String,
}

impl std::fmt::Debug for KeyBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBootstrap")
            .field("key", &"[REDACTED]")
            .field("tier", &self.tier)
            .field("label", &self.label)
            .finish()
    }
}

/// Settings for the cache orchestrator and its layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// First segment of every cache key.
    /// Default: `hoopguard`
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Key layout version; bump to orphan every existing entry.
    /// Default: `v1`
    #[serde(default = "default_key_version")]
    pub version: String,

    /// Payloads larger than this are gzip-compressed.
    /// Default: `1024`
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_bytes: usize,

    /// Upper bound for any single layer operation, in milliseconds.
    /// Default: `250`
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// In-memory layer.
    #[serde(default)]
    pub hot: HotLayerConfig,

    /// On-disk layer.
    #[serde(default)]
    pub durable: DurableLayerConfig,

    /// Popular-query tracking used for cache warming.
    #[serde(default)]
    pub popularity: PopularityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotLayerConfig {
    /// Default: `true`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Default: `10000`
    #[serde(default = "default_hot_entries")]
    pub max_entries: usize,

    /// Default: 256 MiB
    #[serde(default = "default_hot_bytes")]
    pub max_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableLayerConfig {
    /// Default: `true`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding one file per entry.
    /// Default: `~/.hoopguard/cache`
    #[serde(default = "default_durable_directory")]
    pub directory: String,

    /// Default: `100000`
    #[serde(default = "default_durable_entries")]
    pub max_entries: usize,

    /// Default: 5 GiB
    #[serde(default = "default_durable_bytes")]
    pub max_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularityConfig {
    /// Accesses before a query counts as popular.
    /// Default: `5`
    #[serde(default = "default_min_hits")]
    pub min_hit_count: u64,

    /// Maximum queries returned for one warming pass.
    /// Default: `100`
    #[serde(default = "default_popular_limit")]
    pub limit: usize,

    /// Upper bound on distinct queries tracked.
    /// Default: `10000`
    #[serde(default = "default_max_tracked")]
    pub max_tracked: usize,

    /// Queries untouched for this long are dropped on cleanup.
    /// Default: `30`
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

/// Thresholds for cache health classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Latency samples kept per component.
    /// Default: `1000`
    #[serde(default = "default_latency_samples")]
    pub latency_samples: usize,

    /// Number of most recent outcomes used for health decisions.
    /// Default: `100`
    #[serde(default = "default_health_window")]
    pub health_window: usize,

    /// Error rate above which a component is unhealthy.
    /// Default: `0.10`
    #[serde(default = "default_error_threshold")]
    pub error_rate_threshold: f64,

    /// Hit rate below which a component is degraded.
    /// Default: `0.50`
    #[serde(default = "default_hit_rate_floor")]
    pub hit_rate_floor: f64,
}

/// Settings for calls made through the request gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Attempts per upstream call, including the first.
    /// Default: `5`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Longest quota deferral the gateway waits out before giving the
    /// denial back to the caller.
    /// Default: `60`
    #[serde(default = "default_max_defer")]
    pub max_defer_seconds: u64,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`, `compact`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to mask credentials in logged error text.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub sanitize_credentials: bool,
}

// Default trait implementations linking to custom logic

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            version: default_key_version(),
            compression_threshold_bytes: default_compression_threshold(),
            operation_timeout_ms: default_operation_timeout(),
            hot: HotLayerConfig::default(),
            durable: DurableLayerConfig::default(),
            popularity: PopularityConfig::default(),
        }
    }
}

impl Default for HotLayerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_hot_entries(),
            max_bytes: default_hot_bytes(),
        }
    }
}

impl Default for DurableLayerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_durable_directory(),
            max_entries: default_durable_entries(),
            max_bytes: default_durable_bytes(),
        }
    }
}

impl Default for PopularityConfig {
    fn default() -> Self {
        Self {
            min_hit_count: default_min_hits(),
            limit: default_popular_limit(),
            max_tracked: default_max_tracked(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            latency_samples: default_latency_samples(),
            health_window: default_health_window(),
            error_rate_threshold: default_error_threshold(),
            hit_rate_floor: default_hit_rate_floor(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_defer_seconds: default_max_defer(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            sanitize_credentials: true,
        }
    }
}

// Helper functions for serde defaults and shared constants
fn default_true() -> bool {
    true
}

fn default_bootstrap_tier() -> Tier {
    Tier::Free
}

fn default_bootstrap_label() -> String {
    "Additional".to_string()
}

fn default_namespace() -> String {
    "hoopguard".to_string()
}

fn default_key_version() -> String {
    "v1".to_string()
}

fn default_compression_threshold() -> usize {
    1024 // 1KB
}

fn default_operation_timeout() -> u64 {
    250
}

fn default_hot_entries() -> usize {
    10_000
}

fn default_hot_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_durable_directory() -> String {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".hoopguard")
        .join("cache")
        .to_string_lossy()
        .to_string()
}

fn default_durable_entries() -> usize {
    100_000
}

fn default_durable_bytes() -> u64 {
    5 * 1024 * 1024 * 1024
}

fn default_min_hits() -> u64 {
    5
}

fn default_popular_limit() -> usize {
    100
}

fn default_max_tracked() -> usize {
    10_000
}

fn default_retention_days() -> i64 {
    30
}

fn default_latency_samples() -> usize {
    1000
}

fn default_health_window() -> usize {
    100
}

fn default_error_threshold() -> f64 {
    0.10
}

fn default_hit_rate_floor() -> f64 {
    0.50
}

fn default_max_attempts() -> u32 {
    5
}

fn default_max_defer() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
