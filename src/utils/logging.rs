//! Structured logging and security-focused trace utilities.
//!
//! This module configures the `tracing` ecosystem for the application,
//! supporting multiple output formats and providing utilities to prevent
//! sensitive data (API keys, the vault secret) from leaking into logs.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::config::LoggingConfig;
use crate::error::{GuardError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Raw API keys as issued upstream: a known prefix followed by the secret body.
static API_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:bdl|sk|pk|ent|prem|pro)_[A-Za-z0-9_\-]{6,}").expect("valid regex")
});

/// Assignments of the vault secret, e.g. `HOOPGUARD_ENCRYPTION_KEY=...`.
static SECRET_ASSIGNMENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(encryption_key["']?\s*[=:]\s*["']?)[A-Za-z0-9+/=_\-]{16,}"#)
        .expect("valid regex")
});

/// Initializes the global tracing subscriber for the application.
///
/// Supports three output formats:
/// - `json`: Structured JSON logs for production ingestion.
/// - `compact`: Single-line human-readable output.
/// - `pretty` (default): Human-readable, colorized output for development.
///
/// Log levels are controlled via the `RUST_LOG` environment variable or
/// the provided `LoggingConfig`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    // Configure filter from environment or config file
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| GuardError::Config(format!("Invalid log level '{}': {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };

    result.map_err(|e| GuardError::Internal(format!("Logging already initialized: {}", e)))
}

/// Sanitizes sensitive information from log messages.
///
/// Replaces anything shaped like an upstream API key with
/// `[REDACTED_API_KEY]` and the value of any vault-secret assignment with
/// `[REDACTED_SECRET]`.
pub fn sanitize(input: &str) -> String {
    let masked = API_KEY_PATTERN.replace_all(input, "[REDACTED_API_KEY]");
    SECRET_ASSIGNMENT_PATTERN
        .replace_all(&masked, "${1}[REDACTED_SECRET]")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_api_key() {
        let input = "failed to add key ent_9f8e7d6c5b4a3 for label Primary";
        let output = sanitize(input);
        assert!(output.contains("[REDACTED_API_KEY]"));
        assert!(!output.contains("9f8e7d6c5b4a3"));
        assert!(output.contains("label Primary"));
    }

    #[test]
    fn test_sanitize_multiple_keys() {
        let input = r#"[{"key":"pro_aaaaaaaaaa"},{"key":"bdl_bbbbbbbbbb"}]"#;
        let output = sanitize(input);
        assert_eq!(output.matches("[REDACTED_API_KEY]").count(), 2);
    }

    #[test]
    fn test_sanitize_secret_assignment() {
        let input = "HOOPGUARD_ENCRYPTION_KEY=q83vEjRWeJq83vEjRWeJq83vEjRWeJq83vEjRWeJq8=";
        let output = sanitize(input);
        assert_eq!(output, "HOOPGUARD_ENCRYPTION_KEY=[REDACTED_SECRET]");
    }

    #[test]
    fn test_sanitize_leaves_plain_text() {
        let input = "key 3f2a9c0d1e4b5a6c admitted";
        assert_eq!(sanitize(input), input);
    }
}
