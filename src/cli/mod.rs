// CLI module for hoopguard
// Author: kelexine (https://github.com/kelexine)

use clap::Parser;

/// hoopguard - quota admission and multi-layer caching for a tiered sports-data API
#[derive(Parser, Debug)]
#[command(name = "hoopguard", version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to ~/.hoopguard/config.toml when present)
    #[arg(long, env = "HOOPGUARD_CONFIG")]
    pub config: Option<String>,

    /// Print usage of every managed key
    #[arg(long)]
    pub keys: bool,

    /// Print cache health and analytics
    #[arg(long)]
    pub health: bool,

    /// Print Prometheus metrics
    #[arg(long)]
    pub metrics: bool,

    /// Print a fresh base64 vault secret and exit
    #[arg(long)]
    pub generate_secret: bool,

    /// Keep running, purging expired cache entries until interrupted
    #[arg(long)]
    pub maintain: bool,

    /// Seconds between cleanup passes in --maintain mode
    #[arg(long, default_value_t = 300)]
    pub cleanup_interval: u64,
}

impl Args {
    /// No report flag given: print everything.
    pub fn wants_all(&self) -> bool {
        !(self.keys || self.health || self.metrics)
    }
}
