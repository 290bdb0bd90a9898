//! Access tiers and their quota tables.
//!
//! Tiers are a closed set. Each one maps to an immutable `TierLimits`
//! bundle; operators may override individual numbers from configuration, but
//! every resulting table is validated before anything is built on top of it.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Lowest and highest cache priority a tier may carry.
pub const MIN_CACHE_PRIORITY: u8 = 1;
pub const MAX_CACHE_PRIORITY: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Premium,
    Enterprise,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Pro, Tier::Premium, Tier::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Guesses the tier of a raw key from its issuer prefix.
    pub fn detect_from_key(raw: &str) -> Tier {
        if raw.starts_with("ent_") {
            Tier::Enterprise
        } else if raw.starts_with("prem_") {
            Tier::Premium
        } else if raw.starts_with("pro_") {
            Tier::Pro
        } else {
            Tier::Free
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "premium" => Ok(Tier::Premium),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(GuardError::InvalidParameter(format!(
                "Unknown tier: {}. Supported tiers: free, pro, premium, enterprise",
                other
            ))),
        }
    }
}

/// Quota and feature bundle for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierLimits {
    pub requests_per_hour: u32,
    pub requests_per_minute: u32,
    pub max_concurrent: u32,
    /// 1 (lowest) to 4 (highest); drives eviction order and layer probing.
    pub cache_priority: u8,
    pub enabled_features: BTreeSet<String>,
}

impl TierLimits {
    /// Built-in limits for a tier.
    pub fn defaults_for(tier: Tier) -> Self {
        const BASIC: &[&str] = &["basic_stats", "teams", "players"];
        const PRO: &[&str] = &["advanced_stats", "historical_data"];

        match tier {
            Tier::Free => Self::build(100, 10, 1, 1, &[BASIC]),
            Tier::Pro => Self::build(1_000, 50, 3, 2, &[BASIC, PRO]),
            Tier::Premium => Self::build(5_000, 200, 5, 3, &[BASIC, PRO, &["real_time"]]),
            Tier::Enterprise => Self::build(
                50_000,
                1_000,
                10,
                4,
                &[BASIC, PRO, &["real_time", "bulk_export"]],
            ),
        }
    }

    fn build(
        requests_per_hour: u32,
        requests_per_minute: u32,
        max_concurrent: u32,
        cache_priority: u8,
        feature_sets: &[&[&str]],
    ) -> Self {
        Self {
            requests_per_hour,
            requests_per_minute,
            max_concurrent,
            cache_priority,
            enabled_features: feature_sets
                .iter()
                .flat_map(|set| set.iter())
                .map(|f| f.to_string())
                .collect(),
        }
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.enabled_features.contains(feature)
    }

    fn validate(&self, tier: Tier) -> Result<()> {
        if self.requests_per_hour > 0 && self.requests_per_minute > self.requests_per_hour {
            return Err(GuardError::Config(format!(
                "Tier {}: requests_per_minute ({}) exceeds requests_per_hour ({})",
                tier, self.requests_per_minute, self.requests_per_hour
            )));
        }
        if self.max_concurrent == 0 {
            return Err(GuardError::Config(format!(
                "Tier {}: max_concurrent must be at least 1",
                tier
            )));
        }
        if !(MIN_CACHE_PRIORITY..=MAX_CACHE_PRIORITY).contains(&self.cache_priority) {
            return Err(GuardError::Config(format!(
                "Tier {}: cache_priority {} is outside {}..={}",
                tier, self.cache_priority, MIN_CACHE_PRIORITY, MAX_CACHE_PRIORITY
            )));
        }
        Ok(())
    }
}

/// Partial override of a tier's limits, as read from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierOverride {
    pub requests_per_hour: Option<u32>,
    pub requests_per_minute: Option<u32>,
    pub max_concurrent: Option<u32>,
    pub cache_priority: Option<u8>,
    pub enabled_features: Option<Vec<String>>,
}

/// The validated set of limits for every tier.
#[derive(Debug, Clone)]
pub struct TierTable {
    limits: HashMap<Tier, Arc<TierLimits>>,
}

impl TierTable {
    /// Applies configuration overrides on top of the built-in limits.
    pub fn from_overrides(overrides: &HashMap<Tier, TierOverride>) -> Result<Self> {
        let mut limits = HashMap::with_capacity(Tier::ALL.len());

        for tier in Tier::ALL {
            let mut tier_limits = TierLimits::defaults_for(tier);
            if let Some(o) = overrides.get(&tier) {
                if let Some(v) = o.requests_per_hour {
                    tier_limits.requests_per_hour = v;
                }
                if let Some(v) = o.requests_per_minute {
                    tier_limits.requests_per_minute = v;
                }
                if let Some(v) = o.max_concurrent {
                    tier_limits.max_concurrent = v;
                }
                if let Some(v) = o.cache_priority {
                    tier_limits.cache_priority = v;
                }
                if let Some(features) = &o.enabled_features {
                    tier_limits.enabled_features = features.iter().cloned().collect();
                }
            }
            tier_limits.validate(tier)?;
            limits.insert(tier, Arc::new(tier_limits));
        }

        Ok(Self { limits })
    }

    pub fn get(&self, tier: Tier) -> Arc<TierLimits> {
        // Every tier is inserted by construction.
        self.limits
            .get(&tier)
            .cloned()
            .unwrap_or_else(|| Arc::new(TierLimits::defaults_for(tier)))
    }

    pub fn cache_priority(&self, tier: Tier) -> u8 {
        self.get(tier).cache_priority
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            limits: Tier::ALL
                .into_iter()
                .map(|t| (t, Arc::new(TierLimits::defaults_for(t))))
                .collect(),
        }
    }
}
