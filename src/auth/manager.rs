//! API key lifecycle and admission control.
//!
//! This module provides the `AuthenticationManager`, which owns every managed
//! credential: it seals raw keys through the `CredentialVault`, tracks fixed
//! hourly and per-minute quota windows, and answers the question "may this
//! request go upstream right now".
//!
//! Concurrency model: the key map sits behind a `RwLock` that is only held
//! long enough to find a key's slot. Each slot carries its own `Mutex` around
//! the usage record, so `check_and_record` is a single check-and-increment
//! per key while different keys never contend. Each slot also carries a
//! counting semaphore sized by the tier's `max_concurrent`, which callers use
//! to cap in-flight upstream calls.

// Author: kelexine (https://github.com/kelexine)

use super::models::{Admission, Denial, KeyRecord, KeyValidation, UsageStats};
use super::tiers::{Tier, TierLimits, TierTable};
use crate::config::KeyBootstrap;
use crate::error::{GuardError, Result};
use crate::utils::clock::Clock;
use crate::vault::CredentialVault;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// Minimum length of anything we accept as a raw API key.
const MIN_KEY_LEN: usize = 10;

/// Issuer prefixes recognised for keys we do not manage yet.
const KNOWN_PREFIXES: &[&str] = &["bdl_", "sk_", "pk_", "ent_", "pro_", "prem_"];

/// Per-key state: the usage record and the in-flight limiter.
struct KeySlot {
    record: Mutex<KeyRecord>,
    concurrency: Arc<Semaphore>,
}

/// Manages API keys with tiered quotas.
pub struct AuthenticationManager {
    vault: Arc<CredentialVault>,
    tiers: Arc<TierTable>,
    clock: Arc<dyn Clock>,
    keys: RwLock<HashMap<String, Arc<KeySlot>>>,
    /// Lock order: `keys` before `default_key`.
    default_key: RwLock<Option<String>>,
}

impl AuthenticationManager {
    pub fn new(vault: Arc<CredentialVault>, tiers: Arc<TierTable>, clock: Arc<dyn Clock>) -> Self {
        Self {
            vault,
            tiers,
            clock,
            keys: RwLock::new(HashMap::new()),
            default_key: RwLock::new(None),
        }
    }

    /// Adds the primary and additional keys supplied at startup.
    ///
    /// The primary key becomes the default and has its tier detected from
    /// its prefix. Returns the ids of every key added.
    pub fn bootstrap(&self, primary: Option<&str>, additional: &[KeyBootstrap]) -> Result<Vec<String>> {
        let mut added = Vec::with_capacity(additional.len() + 1);

        if let Some(raw) = primary.map(str::trim).filter(|k| !k.is_empty()) {
            let tier = Tier::detect_from_key(raw);
            added.push(self.add_key(raw, tier, "Primary", true)?);
        }

        for entry in additional {
            added.push(self.add_key(&entry.key, entry.tier, &entry.label, false)?);
        }

        info!("Bootstrapped {} API key(s)", added.len());
        Ok(added)
    }

    /// Starts managing a raw key and returns its id.
    ///
    /// Re-adding a key that is already managed returns the same id and leaves
    /// its usage, tier, label and active flag untouched; only `make_default`
    /// is honoured. The first key ever added becomes the default.
    pub fn add_key(&self, raw: &str, tier: Tier, label: &str, make_default: bool) -> Result<String> {
        if raw.trim().is_empty() {
            return Err(GuardError::InvalidParameter("API key must not be empty".to_string()));
        }

        let key_id = CredentialVault::derive_key_id(raw);
        let mut keys = self.keys.write();

        if keys.contains_key(&key_id) {
            debug!("API key {} is already managed", key_id);
        } else {
            let encrypted = self.vault.encrypt(raw).map_err(|e| {
                error!("Failed to seal API key {}: {}", key_id, e);
                crate::metrics::record_vault_failure("encrypt");
                GuardError::Vault {
                    key_id: key_id.clone(),
                }
            })?;

            let limits = self.tiers.get(tier);
            let record = KeyRecord::new(
                key_id.clone(),
                encrypted,
                tier,
                limits.clone(),
                label.to_string(),
                self.clock.now(),
            );
            keys.insert(
                key_id.clone(),
                Arc::new(KeySlot {
                    record: Mutex::new(record),
                    concurrency: Arc::new(Semaphore::new(limits.max_concurrent as usize)),
                }),
            );
            info!("Added API key {} with tier {}", key_id, tier);
        }

        let mut default_key = self.default_key.write();
        if make_default || default_key.is_none() {
            *default_key = Some(key_id.clone());
        }

        Ok(key_id)
    }

    /// Stops managing a key. If it was the default, the oldest remaining key
    /// takes over within the same critical section.
    pub fn remove_key(&self, key_id: &str) -> Result<()> {
        let mut keys = self.keys.write();
        if keys.remove(key_id).is_none() {
            return Err(GuardError::KeyNotFound(key_id.to_string()));
        }

        let mut default_key = self.default_key.write();
        if default_key.as_deref() == Some(key_id) {
            *default_key = keys
                .values()
                .map(|slot| {
                    let record = slot.record.lock();
                    (record.created_at, record.key_id.clone())
                })
                .min()
                .map(|(_, id)| id);
            debug!("Default key moved to {:?}", *default_key);
        }

        info!("Removed API key {}", key_id);
        Ok(())
    }

    pub fn activate(&self, key_id: &str) -> Result<()> {
        self.set_active(key_id, true)
    }

    pub fn deactivate(&self, key_id: &str) -> Result<()> {
        self.set_active(key_id, false)
    }

    fn set_active(&self, key_id: &str, active: bool) -> Result<()> {
        let slot = self.slot(key_id)?;
        slot.record.lock().active = active;
        info!(
            "{} API key {}",
            if active { "Activated" } else { "Deactivated" },
            key_id
        );
        Ok(())
    }

    /// Makes `key_id` the single default key.
    pub fn set_default(&self, key_id: &str) -> Result<()> {
        // Holding the map lock keeps the key from being removed mid-swap.
        let keys = self.keys.read();
        if !keys.contains_key(key_id) {
            return Err(GuardError::KeyNotFound(key_id.to_string()));
        }
        *self.default_key.write() = Some(key_id.to_string());
        info!("Set default API key to {}", key_id);
        Ok(())
    }

    pub fn default_key_id(&self) -> Option<String> {
        self.default_key.read().clone()
    }

    /// Decrypts a key for the duration of the caller's use.
    pub fn get_raw_key(&self, key_id: &str) -> Result<Zeroizing<String>> {
        let slot = self.slot(key_id)?;
        let sealed = {
            let record = slot.record.lock();
            if !record.active {
                return Err(GuardError::KeyInactive(key_id.to_string()));
            }
            record.encrypted_secret.clone()
        };

        self.vault.decrypt(&sealed).map_err(|e| {
            error!("API key {} could not be decrypted: {}", key_id, e);
            crate::metrics::record_vault_failure("decrypt");
            GuardError::Vault {
                key_id: key_id.to_string(),
            }
        })
    }

    /// Atomically decides whether one more request fits the key's quota and,
    /// if so, counts it.
    ///
    /// Quota exhaustion and deactivation are reported in the returned
    /// `Admission`, not as errors; only an unknown key is an error.
    pub fn check_and_record(&self, key_id: &str) -> Result<Admission> {
        let slot = self.slot(key_id)?;
        let now = self.clock.now();

        let mut record = slot.record.lock();
        record.hourly.roll(now);
        record.minute.roll(now);

        let limits = record.limits.clone();
        let base = |record: &KeyRecord| Admission {
            key_id: record.key_id.clone(),
            tier: record.tier,
            admitted: false,
            denial: None,
            hourly_remaining: 0,
            minute_remaining: 0,
            retry_after_seconds: 0,
            hourly_reset_at: record.hourly.reset_at,
            minute_reset_at: record.minute.reset_at,
            concurrent_limit: limits.max_concurrent,
        };

        if !record.active {
            crate::metrics::record_admission(record.tier.as_str(), "inactive");
            debug!("Denied request for inactive key {}", key_id);
            return Ok(Admission {
                denial: Some(Denial::Inactive),
                ..base(&*record)
            });
        }

        let hour_exhausted = record.hourly.used >= limits.requests_per_hour;
        let minute_exhausted = record.minute.used >= limits.requests_per_minute;

        if hour_exhausted || minute_exhausted {
            let (denial, retry_after) = match (hour_exhausted, minute_exhausted) {
                (true, true) => (
                    Denial::BothQuotas,
                    record
                        .hourly
                        .seconds_until_reset(now)
                        .min(record.minute.seconds_until_reset(now)),
                ),
                (true, false) => (Denial::HourlyQuota, record.hourly.seconds_until_reset(now)),
                _ => (Denial::MinuteQuota, record.minute.seconds_until_reset(now)),
            };

            crate::metrics::record_admission(record.tier.as_str(), "rate_limited");
            warn!(
                "Rate limit reached for key {} ({:?}); retry after {}s",
                key_id, denial, retry_after
            );
            return Ok(Admission {
                denial: Some(denial),
                hourly_remaining: limits.requests_per_hour.saturating_sub(record.hourly.used),
                minute_remaining: limits.requests_per_minute.saturating_sub(record.minute.used),
                retry_after_seconds: retry_after,
                ..base(&*record)
            });
        }

        record.hourly.used += 1;
        record.minute.used += 1;
        record.total_requests += 1;
        record.last_used_at = Some(now);

        crate::metrics::record_admission(record.tier.as_str(), "admitted");
        debug!(
            "Recorded request for key {}: hourly={}, minute={}",
            key_id, record.hourly.used, record.minute.used
        );

        Ok(Admission {
            admitted: true,
            hourly_remaining: limits.requests_per_hour - record.hourly.used,
            minute_remaining: limits.requests_per_minute - record.minute.used,
            ..base(&*record)
        })
    }

    /// Gateway-facing admission: like `check_and_record`, but a denial comes
    /// back as `KeyInactive` or `RateLimitExceeded`.
    pub fn admit(&self, key_id: &str) -> Result<Admission> {
        let admission = self.check_and_record(key_id)?;
        match admission.denial {
            None => Ok(admission),
            Some(Denial::Inactive) => Err(GuardError::KeyInactive(key_id.to_string())),
            Some(_) => Err(GuardError::RateLimitExceeded {
                tier: admission.tier,
                hourly_remaining: admission.hourly_remaining,
                minute_remaining: admission.minute_remaining,
                retry_after_seconds: admission.retry_after_seconds,
            }),
        }
    }

    /// Waits for one of the key's concurrent-request slots.
    ///
    /// Blocks while `max_concurrent` calls are already in flight; the slot is
    /// released when the permit is dropped.
    pub async fn acquire_slot(&self, key_id: &str) -> Result<OwnedSemaphorePermit> {
        let slot = self.slot(key_id)?;
        let permit = slot
            .concurrency
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GuardError::Internal(format!("Concurrency limiter closed for {}", key_id)))?;
        Ok(permit)
    }

    /// Snapshot of one key's usage. Never mutates counters: a window whose
    /// boundary has passed is reported as empty without being reset.
    pub fn usage_stats(&self, key_id: &str) -> Result<UsageStats> {
        let slot = self.slot(key_id)?;
        let default_key = self.default_key_id();
        Ok(self.snapshot(&slot, default_key.as_deref()))
    }

    /// Usage of every managed key, oldest first.
    pub fn list_keys(&self) -> Vec<UsageStats> {
        let slots: Vec<Arc<KeySlot>> = self.keys.read().values().cloned().collect();
        let default_key = self.default_key_id();

        let mut stats: Vec<UsageStats> = slots
            .iter()
            .map(|slot| self.snapshot(slot, default_key.as_deref()))
            .collect();
        stats.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.key_id.cmp(&b.key_id))
        });
        stats
    }

    fn snapshot(&self, slot: &KeySlot, default_key: Option<&str>) -> UsageStats {
        let now = self.clock.now();
        let record = slot.record.lock();
        let limits = &record.limits;

        UsageStats {
            key_id: record.key_id.clone(),
            label: record.label.clone(),
            tier: record.tier,
            is_default: default_key == Some(record.key_id.as_str()),
            is_active: record.active,
            total_requests: record.total_requests,
            hourly_requests: record.hourly.effective_used(now),
            minute_requests: record.minute.effective_used(now),
            hourly_limit: limits.requests_per_hour,
            minute_limit: limits.requests_per_minute,
            hourly_remaining: record.hourly.remaining(limits.requests_per_hour, now),
            minute_remaining: record.minute.remaining(limits.requests_per_minute, now),
            hourly_reset_at: record.hourly.reset_at,
            minute_reset_at: record.minute.reset_at,
            concurrent_limit: limits.max_concurrent,
            in_flight: limits
                .max_concurrent
                .saturating_sub(slot.concurrency.available_permits() as u32),
            created_at: record.created_at,
            last_used_at: record.last_used_at,
            features: limits.enabled_features.clone(),
        }
    }

    /// Checks a raw key's shape and whether it is already managed.
    pub fn validate_key(&self, raw: &str) -> KeyValidation {
        if raw.len() < MIN_KEY_LEN {
            return KeyValidation::invalid();
        }

        let key_id = CredentialVault::derive_key_id(raw);
        if let Ok(slot) = self.slot(&key_id) {
            let record = slot.record.lock();
            return KeyValidation {
                valid: record.active,
                key_id: Some(key_id),
                tier: Some(record.tier),
                active: Some(record.active),
            };
        }

        if KNOWN_PREFIXES.iter().any(|p| raw.starts_with(p)) {
            return KeyValidation {
                valid: true,
                key_id: None,
                tier: Some(Tier::detect_from_key(raw)),
                active: None,
            };
        }

        KeyValidation::invalid()
    }

    pub fn tier_of(&self, key_id: &str) -> Result<Tier> {
        Ok(self.slot(key_id)?.record.lock().tier)
    }

    pub fn tier_limits(&self, key_id: &str) -> Result<Arc<TierLimits>> {
        Ok(self.slot(key_id)?.record.lock().limits.clone())
    }

    pub fn tiers(&self) -> &Arc<TierTable> {
        &self.tiers
    }

    pub fn key_count(&self) -> usize {
        self.keys.read().len()
    }

    fn slot(&self, key_id: &str) -> Result<Arc<KeySlot>> {
        self.keys
            .read()
            .get(key_id)
            .cloned()
            .ok_or_else(|| GuardError::KeyNotFound(key_id.to_string()))
    }
}
