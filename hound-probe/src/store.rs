//! Persistent (L2) cache stores
//!
//! The cache only needs get / put / delete by key. Schema beyond the serialized
//! [`CacheEntry`] belongs to whoever implements [`PersistentStore`].

use async_trait::async_trait;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use hound_core::{CacheEntry, CacheKey, ProbeError};

/// Errors from a persistent store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt entry {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl From<StoreError> for ProbeError {
    fn from(err: StoreError) -> Self {
        ProbeError::CacheIo(err.to_string())
    }
}

/// Key-value contract for the L2 tier
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError>;

    async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), StoreError>;

    async fn delete(&self, key: &CacheKey) -> Result<(), StoreError>;
}

/// One JSON file per key under a directory
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Open (creating if needed) a store rooted at `dir`. Temp files left by
    /// interrupted writes are removed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let store = Self { dir };
        store.sweep_temp_files()?;
        Ok(store)
    }

    fn sweep_temp_files(&self) -> Result<(), StoreError> {
        let mut swept = 0usize;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !is_temp_file(&path) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => swept += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove stale {}: {}", path.display(), e),
            }
        }
        if swept > 0 {
            debug!("Removed {} stale temp files from {}", swept, self.dir.display());
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // Keys are already SHA-256 hex, safe as file names
    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }
}

#[async_trait]
impl PersistentStore for DiskStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let path = self.path_for(key);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), StoreError> {
        let content = serde_json::to_vec(entry).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        // Write-then-rename so readers never see a partial file
        let mut tmp = TempFile::new(
            self.dir
                .join(format!(".{}.{}.tmp", key.as_str(), uuid::Uuid::new_v4().simple())),
        );
        tokio::fs::write(&tmp.path, &content).await?;
        tokio::fs::rename(&tmp.path, self.path_for(key)).await?;
        tmp.persisted = true;

        debug!("Persisted cache entry {}", key);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.') && name.ends_with(".tmp"))
}

/// Removes its file on drop unless the write was committed
struct TempFile {
    path: PathBuf,
    persisted: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            persisted: false,
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// In-process store, used when no cache directory is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), StoreError> {
        self.entries.insert(key.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound_core::{CachedValue, IdentifierKind, Platform, ProbeRequest, ProfileResult};

    fn sample() -> (CacheKey, CacheEntry) {
        let platform = Platform::new("GitHub", "https://github.com/{username}");
        let request = ProbeRequest::new(&platform, "alice123", IdentifierKind::Username);
        let result = ProfileResult::found(&request, "https://github.com/alice123");
        let entry = CacheEntry::new(CachedValue::from_result(&result).unwrap(), 86_400);
        (request.cache_key(), entry)
    }

    #[tokio::test]
    async fn test_disk_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let (key, entry) = sample();

        assert!(store.get(&key).await.unwrap().is_none());
        store.put(&key, &entry).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(entry));

        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
        // Deleting a missing key is fine
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_disk_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let (key, entry) = sample();
        store.put(&key, &entry).await.unwrap();
        store.put(&key, &entry).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![format!("{}.json", key.as_str())]);
    }

    #[test]
    fn test_open_sweeps_interrupted_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (key, _) = sample();
        let stale = dir.path().join(format!(".{}.0123abcd.tmp", key.as_str()));
        let kept = dir.path().join(format!("{}.json", key.as_str()));
        std::fs::write(&stale, b"{\"partial").unwrap();
        std::fs::write(&kept, b"{}").unwrap();

        DiskStore::open(dir.path()).unwrap();
        assert!(!stale.exists());
        assert!(kept.exists());
    }

    #[test]
    fn test_uncommitted_temp_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let abandoned = dir.path().join(".abandoned.tmp");
        let committed = dir.path().join(".committed.tmp");
        std::fs::write(&abandoned, b"x").unwrap();
        std::fs::write(&committed, b"x").unwrap();

        drop(TempFile::new(abandoned.clone()));
        let mut done = TempFile::new(committed.clone());
        done.persisted = true;
        drop(done);

        assert!(!abandoned.exists());
        assert!(committed.exists());
        // Already gone is not an error
        drop(TempFile::new(abandoned));
    }

    #[tokio::test]
    async fn test_disk_store_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let (key, _) = sample();
        std::fs::write(dir.path().join(format!("{}.json", key.as_str())), b"{not json").unwrap();

        let err = store.get(&key).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        let (key, entry) = sample();
        store.put(&key, &entry).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(&key).await.unwrap().is_some());
        store.delete(&key).await.unwrap();
        assert!(store.is_empty());
    }
}
