//! Request gateway: the glue between callers, the quota manager, the cache
//! and whatever client actually talks to the sports-data API.
//!
//! Every upstream call goes through the same sequence: cache lookup,
//! admission, a per-key concurrency slot, the call itself (retried on
//! transient failures and on short quota deferrals), then a best-effort
//! cache write.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::auth::{AuthenticationManager, Tier};
use crate::cache::{CacheOrchestrator, Params, Sport};
use crate::config::GatewayConfig;
use crate::error::{GuardError, Result};
use crate::metrics;
use crate::utils::logging::sanitize;
use crate::utils::retry::{with_retry, Retryable};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One upstream query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamRequest {
    pub sport: Sport,
    pub endpoint: String,
    pub params: Params,
}

impl UpstreamRequest {
    pub fn new(sport: Sport, endpoint: impl Into<String>, params: Params) -> Self {
        Self {
            sport,
            endpoint: endpoint.into(),
            params,
        }
    }
}

/// The client that performs the actual network call.
///
/// Failures that carry an HTTP status should be reported as
/// `GuardError::Upstream` so 429/5xx responses are retried and any
/// `Retry-After` is honoured.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, api_key: &str, request: &UpstreamRequest) -> Result<serde_json::Value>;
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayResponse {
    pub value: serde_json::Value,
    pub key_id: String,
    pub tier: Tier,
    /// Layer that served the response, `None` when it came from upstream.
    pub cache_layer: Option<String>,
}

impl GatewayResponse {
    pub fn from_cache(&self) -> bool {
        self.cache_layer.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmReport {
    pub candidates: usize,
    pub already_cached: usize,
    pub warmed: usize,
    pub failed: usize,
    /// Set when the pass stopped early because the key ran out of quota.
    pub stopped_on_quota: bool,
}

/// Error wrapper for one attempt: quota deferrals longer than the gateway
/// is willing to wait are handed back to the caller instead of retried.
struct Attempt {
    error: GuardError,
    max_defer_seconds: u64,
}

impl Retryable for Attempt {
    fn is_retryable(&self) -> bool {
        match &self.error {
            GuardError::RateLimitExceeded {
                retry_after_seconds,
                ..
            } => *retry_after_seconds <= self.max_defer_seconds,
            other => other.is_retryable(),
        }
    }

    fn retry_hint(&self) -> Option<Duration> {
        self.error.retry_hint()
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

pub struct RequestGateway<U: Upstream> {
    auth: Arc<AuthenticationManager>,
    cache: Arc<CacheOrchestrator>,
    upstream: U,
    config: GatewayConfig,
    sanitize_logs: bool,
}

impl<U: Upstream> RequestGateway<U> {
    pub fn new(
        auth: Arc<AuthenticationManager>,
        cache: Arc<CacheOrchestrator>,
        upstream: U,
        config: GatewayConfig,
    ) -> Self {
        Self {
            auth,
            cache,
            upstream,
            config,
            sanitize_logs: true,
        }
    }

    /// Whether upstream error text is passed through `sanitize` before
    /// being logged.
    pub fn with_log_sanitizing(mut self, enabled: bool) -> Self {
        self.sanitize_logs = enabled;
        self
    }

    /// Serves `request` with `key_id`, or with the default key when `None`.
    pub async fn fetch(&self, key_id: Option<&str>, request: &UpstreamRequest) -> Result<GatewayResponse> {
        let key_id = self.resolve_key(key_id)?;
        let usage = self.auth.usage_stats(&key_id)?;
        if !usage.is_active {
            return Err(GuardError::KeyInactive(key_id));
        }
        let tier = usage.tier;

        if let Some(hit) = self
            .cache
            .get(request.sport, &request.endpoint, &request.params, tier)
            .await?
        {
            return Ok(GatewayResponse {
                value: hit.value,
                key_id,
                tier,
                cache_layer: Some(hit.layer),
            });
        }

        let value = self.fetch_and_store(&key_id, tier, request).await?;
        Ok(GatewayResponse {
            value,
            key_id,
            tier,
            cache_layer: None,
        })
    }

    /// Refetches popular queries of `tier` that are no longer cached, using
    /// the first active key of that tier.
    pub async fn warm(&self, tier: Tier) -> Result<WarmReport> {
        let key_id = self
            .auth
            .list_keys()
            .into_iter()
            .find(|k| k.tier == tier && k.is_active)
            .map(|k| k.key_id)
            .ok_or_else(|| GuardError::KeyNotFound(format!("no active {} key", tier)))?;

        let candidates = self.cache.popular_queries(tier, None);
        let mut report = WarmReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        for query in candidates {
            if self
                .cache
                .is_cached(query.sport, &query.endpoint, &query.params)
                .await?
            {
                report.already_cached += 1;
                continue;
            }

            let request = UpstreamRequest::new(query.sport, query.endpoint, query.params);
            match self.fetch_and_store(&key_id, tier, &request).await {
                Ok(_) => report.warmed += 1,
                Err(GuardError::RateLimitExceeded { .. }) => {
                    report.stopped_on_quota = true;
                    break;
                }
                Err(_) => report.failed += 1,
            }
        }

        info!(
            "Cache warming for {} tier: {} warmed, {} already cached, {} failed",
            tier, report.warmed, report.already_cached, report.failed
        );
        Ok(report)
    }

    fn resolve_key(&self, key_id: Option<&str>) -> Result<String> {
        match key_id {
            Some(id) => Ok(id.to_string()),
            None => self
                .auth
                .default_key_id()
                .ok_or_else(|| GuardError::KeyNotFound("no default key configured".to_string())),
        }
    }

    async fn fetch_and_store(
        &self,
        key_id: &str,
        tier: Tier,
        request: &UpstreamRequest,
    ) -> Result<serde_json::Value> {
        let name = format!("{}/{}", request.sport, request.endpoint);
        let max_defer_seconds = self.config.max_defer_seconds;

        let value = with_retry(&name, self.config.max_attempts, || async move {
            self.attempt(key_id, tier, request)
                .await
                .map_err(|error| Attempt {
                    error,
                    max_defer_seconds,
                })
        })
        .await
        .map_err(|attempt| {
            let message = attempt.error.to_string();
            let message = if self.sanitize_logs {
                sanitize(&message)
            } else {
                message
            };
            warn!("Upstream fetch of {} failed: {}", name, message);
            attempt.error
        })?;

        match self
            .cache
            .set(request.sport, &request.endpoint, &request.params, &value, tier)
            .await
        {
            Ok(outcome) if !outcome.stored_anywhere() => {
                debug!("{} fetched but not cached by any layer", name)
            }
            Ok(_) => {}
            Err(e) => debug!("{} fetched but not cacheable: {}", name, e),
        }
        Ok(value)
    }

    /// One admission-gated upstream call.
    async fn attempt(&self, key_id: &str, tier: Tier, request: &UpstreamRequest) -> Result<serde_json::Value> {
        self.auth.admit(key_id)?;
        let _permit = self.auth.acquire_slot(key_id).await?;
        let raw_key = self.auth.get_raw_key(key_id)?;

        let in_flight = metrics::InFlight::track(tier.as_str());
        let started = Instant::now();
        let result = self.upstream.fetch(&raw_key, request).await;
        drop(in_flight);
        metrics::record_upstream_call(
            request.sport.as_str(),
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        result
    }
}
