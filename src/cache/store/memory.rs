// In-process backing store
// Author: kelexine (https://github.com/kelexine)

use super::BackingStore;
use crate::cache::models::{EntryMeta, StoredEntry};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Hash map behind a read-write lock. Never fails.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, entry: StoredEntry) -> Result<()> {
        self.entries.write().insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<EntryMeta>> {
        Ok(self
            .entries
            .read()
            .values()
            .filter(|e| e.key.starts_with(prefix))
            .map(StoredEntry::meta)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(key: &str) -> StoredEntry {
        StoredEntry {
            key: key.to_string(),
            payload: b"[1,2,3]".to_vec(),
            compressed: false,
            expires_at: Utc::now() + chrono::Duration::hours(1),
            origin_priority: 2,
        }
    }

    #[tokio::test]
    async fn test_memory_store_operations() {
        let store = MemoryStore::new();
        store.set(entry("ns:v1:nba:teams:a")).await.unwrap();
        store.set(entry("ns:v1:nba:games:b")).await.unwrap();
        store.set(entry("ns:v1:nfl:teams:c")).await.unwrap();

        assert_eq!(store.len(), 3);
        assert!(store.get("ns:v1:nba:teams:a").await.unwrap().is_some());
        assert_eq!(store.scan_prefix("ns:v1:nba:").await.unwrap().len(), 2);
        assert_eq!(store.scan_prefix("").await.unwrap().len(), 3);

        assert!(store.delete("ns:v1:nba:teams:a").await.unwrap());
        assert!(!store.delete("ns:v1:nba:teams:a").await.unwrap());
        assert!(store.get("ns:v1:nba:teams:a").await.unwrap().is_none());
    }
}
