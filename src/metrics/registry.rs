// Prometheus metrics registry and collectors
// Author: kelexine (https://github.com/kelexine)

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry, CounterVec, Encoder, GaugeVec, HistogramVec, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // ADMISSION METRICS
    // ============================================================================

    /// Admission decisions per tier
    pub static ref ADMISSIONS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("hoopguard_admissions_total", "Total admission decisions"),
        &["tier", "outcome"], // outcome: admitted, rate_limited, inactive
        REGISTRY
    ).unwrap();

    /// Upstream calls currently holding a concurrency slot
    pub static ref REQUESTS_IN_FLIGHT: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("hoopguard_requests_in_flight", "Upstream calls holding a concurrency slot"),
        &["tier"],
        REGISTRY
    ).unwrap();

    /// Vault failures, labelled by operation
    pub static ref VAULT_FAILURES: CounterVec = register_counter_vec_with_registry!(
        Opts::new("hoopguard_vault_failures_total", "Credential vault failures"),
        &["operation"], // operation: encrypt, decrypt
        REGISTRY
    ).unwrap();

    // ============================================================================
    // CACHE METRICS
    // ============================================================================

    /// Cache operations per layer
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("hoopguard_cache_operations_total", "Total cache operations"),
        &["layer", "operation"], // operation: hit, miss, error, write, eviction, promotion
        REGISTRY
    ).unwrap();

    /// Cache operation latency per layer
    pub static ref CACHE_LATENCY: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("hoopguard_cache_latency_seconds", "Cache operation latency")
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25]),
        &["layer"],
        REGISTRY
    ).unwrap();

    /// Current entries and bytes per layer
    pub static ref CACHE_SIZE: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("hoopguard_cache_size", "Current cache size"),
        &["layer", "unit"], // unit: entries, bytes
        REGISTRY
    ).unwrap();

    // ============================================================================
    // UPSTREAM METRICS
    // ============================================================================

    /// Upstream fetches by outcome
    pub static ref UPSTREAM_CALLS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("hoopguard_upstream_calls_total", "Total upstream fetches"),
        &["sport", "outcome"], // outcome: success, failure
        REGISTRY
    ).unwrap();

    /// Upstream fetch duration
    pub static ref UPSTREAM_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("hoopguard_upstream_duration_seconds", "Upstream fetch duration")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["sport"],
        REGISTRY
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
