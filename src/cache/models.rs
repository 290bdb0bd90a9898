//! Cache entry, sport, and result models.

// Author: kelexine (https://github.com/kelexine)

use crate::error::{GuardError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sports served by the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Nba,
    Mlb,
    Nfl,
    Nhl,
    Epl,
}

impl Sport {
    pub const ALL: [Sport; 5] = [Sport::Nba, Sport::Mlb, Sport::Nfl, Sport::Nhl, Sport::Epl];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::Nba => "nba",
            Sport::Mlb => "mlb",
            Sport::Nfl => "nfl",
            Sport::Nhl => "nhl",
            Sport::Epl => "epl",
        }
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sport {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nba" => Ok(Sport::Nba),
            "mlb" => Ok(Sport::Mlb),
            "nfl" => Ok(Sport::Nfl),
            "nhl" => Ok(Sport::Nhl),
            "epl" => Ok(Sport::Epl),
            other => Err(GuardError::InvalidParameter(format!(
                "Unknown sport: {}. Supported sports: nba, mlb, nfl, nhl, epl",
                other
            ))),
        }
    }
}

/// Coarse grouping of endpoints that share a freshness requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointClass {
    Teams,
    Players,
    Games,
    Stats,
    Default,
}

impl EndpointClass {
    pub fn classify(endpoint: &str) -> Self {
        let endpoint = endpoint.to_ascii_lowercase();
        // Live and statistical data wins over the resource prefix:
        // `games/live` is short-lived even though it starts with `games`.
        if ["stats", "statistics", "box_scores", "live"]
            .iter()
            .any(|marker| endpoint.contains(marker))
        {
            EndpointClass::Stats
        } else if endpoint.starts_with("teams") {
            EndpointClass::Teams
        } else if endpoint.starts_with("players") {
            EndpointClass::Players
        } else if endpoint.starts_with("games") {
            EndpointClass::Games
        } else {
            EndpointClass::Default
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Teams => "teams",
            EndpointClass::Players => "players",
            EndpointClass::Games => "games",
            EndpointClass::Stats => "stats",
            EndpointClass::Default => "default",
        }
    }
}

/// One entry as held by a backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    /// Serialized JSON, gzip-compressed when `compressed` is set.
    pub payload: Vec<u8>,
    pub compressed: bool,
    pub expires_at: DateTime<Utc>,
    /// Cache priority of the tier that caused the write.
    pub origin_priority: u8,
}

impl StoredEntry {
    pub fn size_bytes(&self) -> u64 {
        (self.payload.len() + self.key.len()) as u64
    }

    /// Entries are dead from their expiry instant onwards.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            key: self.key.clone(),
            size_bytes: self.size_bytes(),
            origin_priority: self.origin_priority,
            expires_at: self.expires_at,
        }
    }
}

/// Everything about an entry except its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub key: String,
    pub size_bytes: u64,
    pub origin_priority: u8,
    pub expires_at: DateTime<Utc>,
}

/// A decoded cache hit.
#[derive(Debug, Clone, Serialize)]
pub struct CachedValue {
    pub value: serde_json::Value,
    /// Name of the layer that served the hit.
    pub layer: String,
    pub expires_at: DateTime<Utc>,
    pub origin_priority: u8,
}

/// Outcome of writing one entry to one layer.
#[derive(Debug, Clone, Serialize)]
pub struct LayerWrite {
    pub layer: String,
    pub stored: bool,
    pub error: Option<String>,
}

/// Outcome of `CacheOrchestrator::set`. Never an error: a layer that failed
/// is reported here and in analytics.
#[derive(Debug, Clone, Serialize)]
pub struct SetOutcome {
    pub key: String,
    pub ttl_seconds: i64,
    pub compressed: bool,
    pub size_bytes: u64,
    pub layers: Vec<LayerWrite>,
}

impl SetOutcome {
    pub fn stored_anywhere(&self) -> bool {
        self.layers.iter().any(|l| l.stored)
    }
}

/// Point-in-time occupancy of one layer.
#[derive(Debug, Clone, Serialize)]
pub struct LayerStats {
    pub name: String,
    pub entries: usize,
    pub bytes: u64,
    pub max_entries: usize,
    pub max_bytes: u64,
}

/// Requests and hits seen per tier.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TierCacheStats {
    pub requests: u64,
    pub hits: u64,
}

impl TierCacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sport_parsing() {
        assert_eq!("NBA".parse::<Sport>().unwrap(), Sport::Nba);
        assert_eq!("epl".parse::<Sport>().unwrap(), Sport::Epl);
        assert!(matches!(
            "cricket".parse::<Sport>(),
            Err(GuardError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_endpoint_classification() {
        assert_eq!(EndpointClass::classify("teams"), EndpointClass::Teams);
        assert_eq!(EndpointClass::classify("teams/14"), EndpointClass::Teams);
        assert_eq!(EndpointClass::classify("players"), EndpointClass::Players);
        assert_eq!(EndpointClass::classify("games"), EndpointClass::Games);
        assert_eq!(EndpointClass::classify("games/live"), EndpointClass::Stats);
        assert_eq!(EndpointClass::classify("season_averages/stats"), EndpointClass::Stats);
        assert_eq!(EndpointClass::classify("box_scores"), EndpointClass::Stats);
        assert_eq!(EndpointClass::classify("standings"), EndpointClass::Default);
    }

    #[test]
    fn test_entry_expiry_boundary() {
        let now = Utc::now();
        let entry = StoredEntry {
            key: "k".to_string(),
            payload: b"{}".to_vec(),
            compressed: false,
            expires_at: now,
            origin_priority: 1,
        };
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - chrono::Duration::seconds(1)));
        assert_eq!(entry.size_bytes(), 3);
    }
}
