// API key management and admission control module
// Author: kelexine (https://github.com/kelexine)

mod manager;
pub mod models;
pub mod tiers;

pub use manager::AuthenticationManager;
pub use models::{Admission, Denial, KeyValidation, UsageStats};
pub use tiers::{Tier, TierLimits, TierOverride, TierTable};
