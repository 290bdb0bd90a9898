//! Tier-aware cache policy: base TTLs, tier multipliers, payload encoding
//! and the order in which layers are probed.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use super::models::{EndpointClass, Sport};
use crate::auth::Tier;
use crate::error::{GuardError, Result};
use chrono::Duration;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use phf::phf_map;
use std::io::{Read, Write};

/// Base TTL in seconds, keyed by `<sport>:<endpoint class>`.
static BASE_TTL_SECS: phf::Map<&'static str, i64> = phf_map! {
    "nba:teams" => 86_400,
    "nba:players" => 21_600,
    "nba:games" => 3_600,
    "nba:stats" => 1_800,
    "nba:default" => 3_600,

    "mlb:teams" => 86_400,
    "mlb:players" => 21_600,
    "mlb:games" => 3_600,
    "mlb:stats" => 1_800,
    "mlb:default" => 3_600,

    "nhl:teams" => 86_400,
    "nhl:players" => 21_600,
    "nhl:games" => 3_600,
    "nhl:stats" => 1_800,
    "nhl:default" => 3_600,

    // Weekly schedules: rosters and fixtures move slower.
    "nfl:teams" => 86_400,
    "nfl:players" => 43_200,
    "nfl:games" => 7_200,
    "nfl:stats" => 3_600,
    "nfl:default" => 7_200,

    "epl:teams" => 86_400,
    "epl:players" => 43_200,
    "epl:games" => 7_200,
    "epl:stats" => 3_600,
    "epl:default" => 7_200,
};

/// Fallback when a sport/class pair is missing from the table.
const FALLBACK_TTL_SECS: i64 = 3_600;

pub fn base_ttl(sport: Sport, endpoint: &str) -> Duration {
    let class = EndpointClass::classify(endpoint);
    let lookup = format!("{}:{}", sport.as_str(), class.as_str());
    Duration::seconds(
        BASE_TTL_SECS
            .get(lookup.as_str())
            .copied()
            .unwrap_or(FALLBACK_TTL_SECS),
    )
}

pub fn ttl_multiplier(tier: Tier) -> f64 {
    match tier {
        Tier::Free => 1.0,
        Tier::Pro => 1.2,
        Tier::Premium => 1.5,
        Tier::Enterprise => 2.0,
    }
}

/// `base_ttl * ttl_multiplier`, rounded to whole seconds.
pub fn ttl_for(sport: Sport, endpoint: &str, tier: Tier) -> Duration {
    let base = base_ttl(sport, endpoint).num_seconds() as f64;
    Duration::seconds((base * ttl_multiplier(tier)).round() as i64)
}

/// Indices into the fast-to-slow layer list, in the order a caller with
/// `cache_priority` should probe them. The lowest priority starts at the
/// slow end to keep the hot layer for paying traffic.
pub fn probe_order(layer_count: usize, cache_priority: u8) -> Vec<usize> {
    if cache_priority <= 1 {
        (0..layer_count).rev().collect()
    } else {
        (0..layer_count).collect()
    }
}

/// Serializes `value`, gzip-compressing when the JSON exceeds `threshold`
/// bytes. Returns the payload and whether it was compressed.
pub fn encode_payload(value: &serde_json::Value, threshold: usize) -> Result<(Vec<u8>, bool)> {
    let raw = serde_json::to_vec(value)?;
    if raw.len() <= threshold {
        return Ok((raw, false));
    }

    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 4), Compression::default());
    encoder.write_all(&raw)?;
    Ok((encoder.finish()?, true))
}

pub fn decode_payload(payload: &[u8], compressed: bool) -> Result<serde_json::Value> {
    if !compressed {
        return Ok(serde_json::from_slice(payload)?);
    }

    let mut raw = Vec::new();
    GzDecoder::new(payload)
        .read_to_end(&mut raw)
        .map_err(|e| GuardError::CacheBackend(format!("Corrupt compressed payload: {}", e)))?;
    Ok(serde_json::from_slice(&raw)?)
}
