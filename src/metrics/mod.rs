// Metrics module for Prometheus observability
// Author: kelexine (https://github.com/kelexine)

mod registry;

pub use registry::{
    gather_metrics, ADMISSIONS_TOTAL, CACHE_LATENCY, CACHE_OPERATIONS, CACHE_SIZE,
    REQUESTS_IN_FLIGHT, UPSTREAM_CALLS, UPSTREAM_DURATION, VAULT_FAILURES,
};

/// Helper to record an admission decision
pub fn record_admission(tier: &str, outcome: &str) {
    ADMISSIONS_TOTAL.with_label_values(&[tier, outcome]).inc();
}

/// Helper to record a vault failure (`encrypt` or `decrypt`)
pub fn record_vault_failure(operation: &str) {
    VAULT_FAILURES.with_label_values(&[operation]).inc();
}

/// Counts one upstream call in the in-flight gauge until dropped, including
/// when the calling future is cancelled.
#[must_use = "the call stops being counted as soon as the guard is dropped"]
pub struct InFlight {
    gauge: prometheus::Gauge,
}

impl InFlight {
    pub fn track(tier: &str) -> Self {
        let gauge = REQUESTS_IN_FLIGHT.with_label_values(&[tier]);
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Helper to record cache operations per layer
pub fn record_cache_operation(layer: &str, operation: &str, duration_secs: Option<f64>) {
    CACHE_OPERATIONS.with_label_values(&[layer, operation]).inc();
    if let Some(secs) = duration_secs {
        CACHE_LATENCY.with_label_values(&[layer]).observe(secs);
    }
}

pub fn update_cache_size(layer: &str, entries: usize, bytes: u64) {
    CACHE_SIZE
        .with_label_values(&[layer, "entries"])
        .set(entries as f64);
    CACHE_SIZE.with_label_values(&[layer, "bytes"]).set(bytes as f64);
}

/// Helper to record upstream fetch metrics
pub fn record_upstream_call(sport: &str, success: bool, duration_secs: f64) {
    let outcome = if success { "success" } else { "failure" };
    UPSTREAM_CALLS.with_label_values(&[sport, outcome]).inc();
    UPSTREAM_DURATION
        .with_label_values(&[sport])
        .observe(duration_secs);
}
