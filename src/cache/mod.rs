// Multi-layer cache module
// Author: kelexine (https://github.com/kelexine)

pub mod analytics;
pub mod key;
pub mod layer;
pub mod manager;
pub mod models;
pub mod policy;
pub mod popularity;
pub mod store;

pub use analytics::{CacheAnalytics, ComprehensiveAnalytics, Health, HealthReport};
pub use key::{CacheKeyBuilder, Params};
pub use layer::CacheLayer;
pub use manager::{CacheOrchestrator, DURABLE_LAYER, HOT_LAYER};
pub use models::{CachedValue, LayerStats, SetOutcome, Sport, TierCacheStats};
pub use popularity::PopularQuery;
pub use store::{BackingStore, FileStore, MemoryStore};
