// On-disk backing store: one JSON document per entry
// Author: kelexine (https://github.com/kelexine)

use super::BackingStore;
use crate::cache::models::{EntryMeta, StoredEntry};
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Temporary files older than this belong to writes that never finished.
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(600);

/// Persisted form of a `StoredEntry`.
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    payload: String,
    compressed: bool,
    expires_at: DateTime<Utc>,
    origin_priority: u8,
}

impl From<&StoredEntry> for DiskRecord {
    fn from(entry: &StoredEntry) -> Self {
        Self {
            key: entry.key.clone(),
            payload: BASE64.encode(&entry.payload),
            compressed: entry.compressed,
            expires_at: entry.expires_at,
            origin_priority: entry.origin_priority,
        }
    }
}

impl DiskRecord {
    fn into_entry(self) -> Result<StoredEntry> {
        let payload = BASE64
            .decode(self.payload.as_bytes())
            .map_err(|e| GuardError::CacheBackend(format!("Corrupt entry {}: {}", self.key, e)))?;
        Ok(StoredEntry {
            key: self.key,
            payload,
            compressed: self.compressed,
            expires_at: self.expires_at,
            origin_priority: self.origin_priority,
        })
    }
}

/// Stores each entry in `<dir>/<sha256(key)>.json`. Writes go through a
/// temporary file and a rename, so readers see the old document or the new
/// one and nothing in between.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_seq: AtomicU64,
}

impl FileStore {
    /// Opens (creating if needed) the store directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            GuardError::CacheBackend(format!(
                "Failed to create cache directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        debug!("File store opened at {}", dir.display());
        let store = Self {
            dir,
            write_seq: AtomicU64::new(0),
        };
        if let Err(e) = store.sweep_temp_files(STALE_TEMP_AGE).await {
            warn!("Could not sweep temporary cache files: {}", e);
        }
        Ok(store)
    }

    /// Removes temporary files left behind by interrupted writes, if they
    /// were last modified at least `older_than` ago.
    pub async fn sweep_temp_files(&self, older_than: Duration) -> Result<usize> {
        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| backend_io(&self.dir, e))?;
        let mut removed = 0;

        while let Some(item) = dir.next_entry().await.map_err(|e| backend_io(&self.dir, e))? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TEMP_EXTENSION) {
                continue;
            }

            let stale = item
                .metadata()
                .await
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age >= older_than);
            if stale && fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Removed {} stale temporary files from {}", removed, self.dir.display());
        }
        Ok(removed)
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name = hex::encode(Sha256::digest(key.as_bytes()));
        self.dir.join(format!("{}.{}", name, ENTRY_EXTENSION))
    }

    async fn read_record(path: &Path) -> Result<Option<DiskRecord>> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                GuardError::CacheBackend(format!("Corrupt entry {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(backend_io(path, e)),
        }
    }
}

fn backend_io(path: &Path, e: std::io::Error) -> GuardError {
    GuardError::CacheBackend(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl BackingStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        match Self::read_record(&self.path_for(key)).await? {
            // A digest collision would surface as a different key; treat it as absent.
            Some(record) if record.key == key => record.into_entry().map(Some),
            _ => Ok(None),
        }
    }

    async fn set(&self, entry: StoredEntry) -> Result<()> {
        let path = self.path_for(&entry.key);
        let body = serde_json::to_vec(&DiskRecord::from(&entry))?;

        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let temp = path.with_extension(format!("{}.{}.{}", std::process::id(), seq, TEMP_EXTENSION));

        fs::write(&temp, &body)
            .await
            .map_err(|e| backend_io(&temp, e))?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(backend_io(&path, e));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(backend_io(&path, e)),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<EntryMeta>> {
        let mut found = Vec::new();
        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| backend_io(&self.dir, e))?;

        while let Some(item) = dir.next_entry().await.map_err(|e| backend_io(&self.dir, e))? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }

            let record = match Self::read_record(&path).await {
                Ok(Some(record)) => record,
                // Deleted between listing and reading.
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping unreadable cache file: {}", e);
                    continue;
                }
            };
            if !record.key.starts_with(prefix) {
                continue;
            }

            match record.into_entry() {
                Ok(entry) => found.push(entry.meta()),
                Err(e) => warn!("Skipping unreadable cache file: {}", e),
            }
        }

        Ok(found)
    }

    async fn sweep(&self) -> Result<usize> {
        self.sweep_temp_files(STALE_TEMP_AGE).await
    }
}
