// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::auth::TierTable;
use crate::error::{GuardError, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::PathBuf;

/// Prefix shared by every environment variable the crate reads.
pub const ENV_PREFIX: &str = "HOOPGUARD";

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Config file (explicit path, or `~/.hoopguard/config.toml`)
    /// 3. Defaults (lowest)
    ///
    /// Nested keys use a double underscore, e.g.
    /// `HOOPGUARD_TIERS__FREE__REQUESTS_PER_MINUTE=5`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(p) => File::with_name(p).required(true),
            None => File::with_name(&Self::default_config_path()).required(false),
        };

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| GuardError::Config(e.to_string()))?;

        let app: Self = config
            .try_deserialize()
            .map_err(|e| GuardError::Config(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    /// Builds a configuration from TOML text layered over the defaults.
    /// The environment is not consulted.
    pub fn from_toml(text: &str) -> Result<Self> {
        let app: Self = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()
            .map_err(|e| GuardError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| GuardError::Config(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    /// Rejects configurations that would only fail later: bad tier tables,
    /// malformed key lists, zero-sized caches.
    pub fn validate(&self) -> Result<()> {
        self.tier_table()?;
        self.additional_keys()?;

        if self.cache.namespace.is_empty() || self.cache.namespace.contains(':') {
            return Err(GuardError::Config(
                "cache.namespace must be non-empty and must not contain ':'".to_string(),
            ));
        }
        if self.cache.version.is_empty() || self.cache.version.contains(':') {
            return Err(GuardError::Config(
                "cache.version must be non-empty and must not contain ':'".to_string(),
            ));
        }
        if self.cache.operation_timeout_ms == 0 {
            return Err(GuardError::Config(
                "cache.operation_timeout_ms must be positive".to_string(),
            ));
        }
        if self.cache.hot.enabled && self.cache.hot.max_entries == 0 {
            return Err(GuardError::Config(
                "cache.hot.max_entries must be positive".to_string(),
            ));
        }
        if self.cache.durable.enabled && self.cache.durable.max_entries == 0 {
            return Err(GuardError::Config(
                "cache.durable.max_entries must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.analytics.error_rate_threshold)
            || !(0.0..=1.0).contains(&self.analytics.hit_rate_floor)
        {
            return Err(GuardError::Config(
                "analytics thresholds must lie within 0.0..=1.0".to_string(),
            ));
        }
        if self.gateway.max_attempts == 0 {
            return Err(GuardError::Config(
                "gateway.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The quota table after applying `tiers` overrides.
    pub fn tier_table(&self) -> Result<TierTable> {
        TierTable::from_overrides(&self.tiers)
    }

    /// Parses `api_keys`. An absent or blank value yields no keys; an
    /// unknown tier name is an error.
    pub fn additional_keys(&self) -> Result<Vec<KeyBootstrap>> {
        match self.api_keys.as_deref().map(str::trim) {
            None | Some("") => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                GuardError::Config(format!("HOOPGUARD_API_KEYS is not a valid key list: {}", e))
            }),
        }
    }

    fn default_config_path() -> String {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hoopguard")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Tier;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.namespace, "hoopguard");
        assert_eq!(config.cache.compression_threshold_bytes, 1024);
        assert_eq!(config.cache.popularity.min_hit_count, 5);
        assert!(config.additional_keys().unwrap().is_empty());
    }

    #[test]
    fn test_additional_keys_defaults() {
        let config = AppConfig {
            api_keys: Some(
                r#"[{"key": "pro_abcdef123456", "tier": "pro"}, {"key": "bdl_zyxwvu987654"}]"#
                    .to_string(),
            ),
            ..Default::default()
        };

        let keys = config.additional_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].tier, Tier::Pro);
        assert_eq!(keys[0].label, "Additional");
        assert_eq!(keys[1].tier, Tier::Free);
    }

    #[test]
    fn test_unknown_tier_in_key_list_is_rejected() {
        let config = AppConfig {
            api_keys: Some(r#"[{"key": "bdl_abcdef123456", "tier": "goat"}]"#.to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.additional_keys(),
            Err(GuardError::Config(_))
        ));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_overrides() {
        let config = AppConfig::from_toml(
            r#"
            [tiers.free]
            requests_per_minute = 5

            [cache]
            namespace = "test"

            [cache.hot]
            max_entries = 32
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.namespace, "test");
        assert_eq!(config.cache.hot.max_entries, 32);
        assert_eq!(config.cache.version, "v1");
        assert_eq!(
            config.tier_table().unwrap().get(Tier::Free).requests_per_minute,
            5
        );
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [cache]
            namespace = "a:b"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = AppConfig {
            api_key: Some("ent_supersecret123".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("supersecret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
