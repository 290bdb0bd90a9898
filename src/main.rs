// hoopguard - quota admission and multi-layer caching for a tiered sports-data API
// Author: kelexine (https://github.com/kelexine)

use anyhow::{Context, Result};
use clap::Parser;
use hoopguard::auth::AuthenticationManager;
use hoopguard::cache::{CacheAnalytics, CacheOrchestrator};
use hoopguard::cli::Args;
use hoopguard::config::AppConfig;
use hoopguard::metrics::gather_metrics;
use hoopguard::utils::{logging, SystemClock};
use hoopguard::vault::CredentialVault;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    if args.generate_secret {
        let secret = CredentialVault::generate_secret().context("Failed to generate a secret")?;
        println!("{}", secret.as_str());
        return Ok(());
    }

    // Phase 1: Load configuration
    let config = AppConfig::load(args.config.as_deref())?;

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting hoopguard v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Credential vault and key bootstrap
    let vault = Arc::new(CredentialVault::from_optional(
        config.encryption_key.as_deref(),
    )?);
    let tiers = Arc::new(config.tier_table()?);
    let clock = Arc::new(SystemClock);

    let auth = AuthenticationManager::new(vault, tiers.clone(), clock.clone());
    let added = auth.bootstrap(config.api_key.as_deref(), &config.additional_keys()?)?;
    if added.is_empty() {
        warn!("No API keys configured; set HOOPGUARD_API_KEY or HOOPGUARD_API_KEYS");
    }

    // Phase 4: Cache layers
    let analytics = Arc::new(CacheAnalytics::new(config.analytics.clone()));
    let cache =
        CacheOrchestrator::from_config(&config.cache, tiers, analytics, clock).await;

    // Phase 5: Maintenance loop or one-shot report
    if args.maintain {
        run_maintenance(&cache, args.cleanup_interval).await;
        return Ok(());
    }

    let purged = cache.purge_expired().await;
    let mut report = serde_json::Map::new();
    if args.keys || args.wants_all() {
        report.insert("default_key".into(), json!(auth.default_key_id()));
        report.insert("keys".into(), serde_json::to_value(auth.list_keys())?);
    }
    if args.health || args.wants_all() {
        report.insert("purged_expired".into(), json!(purged));
        report.insert("health".into(), serde_json::to_value(cache.health())?);
        report.insert("analytics".into(), serde_json::to_value(cache.analytics())?);
        report.insert("layers".into(), serde_json::to_value(cache.layer_stats())?);
    }
    if !report.is_empty() {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if args.metrics || args.wants_all() {
        print!("{}", gather_metrics());
    }

    Ok(())
}

async fn run_maintenance(cache: &CacheOrchestrator, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    info!("Maintenance mode: cleanup every {}s", interval_secs.max(1));

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let purged = cache.purge_expired().await;
                let health = cache.health();
                info!(purged, overall = ?health.overall, "Cache cleanup pass finished");
            }
            _ = &mut shutdown => break,
        }
    }

    info!("Maintenance stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
