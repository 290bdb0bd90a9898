// Canonical cache key construction
// Author: kelexine (https://github.com/kelexine)

use super::models::Sport;
use crate::error::{GuardError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Query parameters of one upstream call. The map keeps names sorted, so the
/// serialized form is already canonical.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Hex characters of the parameter digest kept in the key.
const PARAM_HASH_LEN: usize = 16;

static ENDPOINT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_/\-]*$").expect("valid regex"));

/// Builds `<namespace>:<version>:<sport>:<endpoint>:<hash>` keys.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: String,
    version: String,
}

impl CacheKeyBuilder {
    pub fn new(namespace: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            version: version.into(),
        }
    }

    pub fn build(&self, sport: Sport, endpoint: &str, params: &Params) -> Result<String> {
        validate_endpoint(endpoint)?;
        Ok(format!(
            "{}:{}",
            self.endpoint_prefix_unchecked(sport, endpoint),
            hash_params(params)?
        ))
    }

    /// Prefix shared by every key of one sport and endpoint, trailing
    /// separator included so `games` never matches `games/live`.
    pub fn endpoint_prefix(&self, sport: Sport, endpoint: &str) -> Result<String> {
        validate_endpoint(endpoint)?;
        Ok(format!("{}:", self.endpoint_prefix_unchecked(sport, endpoint)))
    }

    pub fn sport_prefix(&self, sport: Sport) -> String {
        format!("{}:{}:{}:", self.namespace, self.version, sport)
    }

    fn endpoint_prefix_unchecked(&self, sport: Sport, endpoint: &str) -> String {
        format!("{}:{}:{}:{}", self.namespace, self.version, sport, endpoint)
    }
}

pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    if ENDPOINT_PATTERN.is_match(endpoint) {
        Ok(())
    } else {
        Err(GuardError::InvalidParameter(format!(
            "Invalid endpoint '{}': expected lowercase letters, digits, '_', '-' or '/'",
            endpoint
        )))
    }
}

/// First 16 hex chars of SHA-256 over the sorted JSON encoding.
fn hash_params(params: &Params) -> Result<String> {
    if params.keys().any(|name| name.trim().is_empty()) {
        return Err(GuardError::InvalidParameter(
            "Parameter names must not be empty".to_string(),
        ));
    }

    let encoded = serde_json::to_vec(params)?;
    let digest = Sha256::digest(&encoded);
    let mut hex = hex::encode(digest);
    hex.truncate(PARAM_HASH_LEN);
    Ok(hex)
}
