//! Backing stores for cache layers.
//!
//! A layer owns its sizing and eviction policy; the store underneath only
//! has to persist entries and find them again. Any durable key-value engine
//! that can implement the four operations below can back a layer.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use super::models::{EntryMeta, StoredEntry};
use crate::error::Result;
use async_trait::async_trait;

/// Minimal key-value contract a cache layer is built on.
///
/// Implementations must be safe for concurrent use. Writes to the same key
/// are last-writer-wins; a `get` racing a `delete` returns either the old
/// entry or `None`, never a partial one.
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>>;

    async fn set(&self, entry: StoredEntry) -> Result<()>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Metadata of every entry whose key starts with `prefix`. An empty
    /// prefix lists the whole store.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<EntryMeta>>;

    /// Store-specific housekeeping run by the cleanup pass. Returns how many
    /// leftover items were removed.
    async fn sweep(&self) -> Result<usize> {
        Ok(0)
    }
}
