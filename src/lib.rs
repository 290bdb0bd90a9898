// hoopguard - quota admission and multi-layer caching for a tiered sports-data API
// Author: kelexine (https://github.com/kelexine)

pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod utils;
pub mod vault;
