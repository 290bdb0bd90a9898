//! Key records, admission decisions, and usage snapshots.

// Author: kelexine (https://github.com/kelexine)

use super::tiers::{Tier, TierLimits};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Length of the hourly quota window.
pub const HOUR_WINDOW_SECS: i64 = 3600;
/// Length of the per-minute quota window.
pub const MINUTE_WINDOW_SECS: i64 = 60;

/// A fixed quota window: a counter that drops to zero once `reset_at` passes.
#[derive(Debug, Clone)]
pub(crate) struct Window {
    pub used: u32,
    pub reset_at: DateTime<Utc>,
    length: Duration,
}

impl Window {
    pub fn new(now: DateTime<Utc>, length_secs: i64) -> Self {
        let length = Duration::seconds(length_secs);
        Self {
            used: 0,
            reset_at: now + length,
            length,
        }
    }

    /// Resets the counter if the boundary has passed; the next boundary is
    /// measured from `now`, not from the stale one.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        if now >= self.reset_at {
            self.used = 0;
            self.reset_at = now + self.length;
        }
    }

    /// Counter value as it would read after `roll(now)`, without mutating.
    pub fn effective_used(&self, now: DateTime<Utc>) -> u32 {
        if now >= self.reset_at {
            0
        } else {
            self.used
        }
    }

    pub fn remaining(&self, limit: u32, now: DateTime<Utc>) -> u32 {
        limit.saturating_sub(self.effective_used(now))
    }

    /// Whole seconds until the boundary, rounded up, never below 1.
    pub fn seconds_until_reset(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Internal state of one managed credential. Never leaves the manager.
#[derive(Debug)]
pub(crate) struct KeyRecord {
    pub key_id: String,
    pub encrypted_secret: Vec<u8>,
    pub tier: Tier,
    pub limits: Arc<TierLimits>,
    pub label: String,
    pub active: bool,
    pub hourly: Window,
    pub minute: Window,
    pub total_requests: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl KeyRecord {
    pub fn new(
        key_id: String,
        encrypted_secret: Vec<u8>,
        tier: Tier,
        limits: Arc<TierLimits>,
        label: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key_id,
            encrypted_secret,
            tier,
            limits,
            label,
            active: true,
            hourly: Window::new(now, HOUR_WINDOW_SECS),
            minute: Window::new(now, MINUTE_WINDOW_SECS),
            total_requests: 0,
            created_at: now,
            last_used_at: None,
        }
    }
}

/// Why a request was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    /// The key is deactivated; no amount of waiting helps.
    Inactive,
    /// The hourly window is exhausted.
    HourlyQuota,
    /// The per-minute window is exhausted.
    MinuteQuota,
    /// Both windows are exhausted.
    BothQuotas,
}

/// Outcome of one `check_and_record` call.
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub key_id: String,
    pub tier: Tier,
    pub admitted: bool,
    pub denial: Option<Denial>,
    pub hourly_remaining: u32,
    pub minute_remaining: u32,
    /// Zero when admitted or when the key is inactive.
    pub retry_after_seconds: u64,
    pub hourly_reset_at: DateTime<Utc>,
    pub minute_reset_at: DateTime<Utc>,
    pub concurrent_limit: u32,
}

/// Read-only view of a key's usage.
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub key_id: String,
    pub label: String,
    pub tier: Tier,
    pub is_default: bool,
    pub is_active: bool,
    pub total_requests: u64,
    pub hourly_requests: u32,
    pub minute_requests: u32,
    pub hourly_limit: u32,
    pub minute_limit: u32,
    pub hourly_remaining: u32,
    pub minute_remaining: u32,
    pub hourly_reset_at: DateTime<Utc>,
    pub minute_reset_at: DateTime<Utc>,
    pub concurrent_limit: u32,
    pub in_flight: u32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub features: BTreeSet<String>,
}

/// Result of checking a raw key's format and whether it is managed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValidation {
    pub valid: bool,
    /// Present only for keys already managed.
    pub key_id: Option<String>,
    pub tier: Option<Tier>,
    pub active: Option<bool>,
}

impl KeyValidation {
    pub(crate) fn invalid() -> Self {
        Self {
            valid: false,
            key_id: None,
            tier: None,
            active: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_resets_from_now() {
        let start = Utc::now();
        let mut window = Window::new(start, MINUTE_WINDOW_SECS);
        window.used = 7;

        let later = start + Duration::seconds(150);
        assert_eq!(window.effective_used(later), 0);
        assert_eq!(window.used, 7);

        window.roll(later);
        assert_eq!(window.used, 0);
        assert_eq!(window.reset_at, later + Duration::seconds(MINUTE_WINDOW_SECS));
    }

    #[test]
    fn test_window_does_not_reset_early() {
        let start = Utc::now();
        let mut window = Window::new(start, HOUR_WINDOW_SECS);
        window.used = 3;
        window.roll(start + Duration::seconds(3599));
        assert_eq!(window.used, 3);
        assert_eq!(window.remaining(10, start), 7);
    }

    #[test]
    fn test_seconds_until_reset_rounds_up() {
        let start = Utc::now();
        let window = Window::new(start, MINUTE_WINDOW_SECS);
        assert_eq!(window.seconds_until_reset(start), 60);
        assert_eq!(
            window.seconds_until_reset(start + Duration::milliseconds(59_500)),
            1
        );
        assert_eq!(window.seconds_until_reset(start + Duration::seconds(90)), 1);
    }
}
