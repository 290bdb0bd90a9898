// Error types for hoopguard
// Author: kelexine (https://github.com/kelexine)

use crate::auth::Tier;
use crate::vault::VaultError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    /// The encrypted secret of a specific key could not be used. The
    /// cryptographic cause is logged, never displayed.
    #[error("API key {key_id} is unusable")]
    Vault { key_id: String },

    #[error("Credential vault error: {0}")]
    VaultSetup(#[from] VaultError),

    #[error("API key not found: {0}")]
    KeyNotFound(String),

    #[error("API key is inactive: {0}")]
    KeyInactive(String),

    #[error(
        "Rate limit exceeded for {tier} tier (hourly remaining: {hourly_remaining}, \
         minute remaining: {minute_remaining}); retry after {retry_after_seconds}s"
    )]
    RateLimitExceeded {
        tier: Tier,
        hourly_remaining: u32,
        minute_remaining: u32,
        retry_after_seconds: u64,
    },

    #[error("Cache backend error: {0}")]
    CacheBackend(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream error ({status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuardError {
    /// Stable machine-readable category, used as a metrics label and in
    /// structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::Vault { .. } | GuardError::VaultSetup(_) => "vault_error",
            GuardError::KeyNotFound(_) => "key_not_found",
            GuardError::KeyInactive(_) => "key_inactive",
            GuardError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            GuardError::CacheBackend(_) => "cache_backend_error",
            GuardError::InvalidParameter(_) => "invalid_parameter",
            GuardError::Config(_) | GuardError::ConfigParsing(_) => "configuration_error",
            GuardError::Upstream { .. } => "upstream_error",
            _ => "internal_error",
        }
    }

    /// Seconds the caller should wait before trying again, when the error
    /// is a deferral rather than a failure.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GuardError::RateLimitExceeded {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            GuardError::Upstream {
                retry_after_seconds,
                ..
            } => *retry_after_seconds,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;
