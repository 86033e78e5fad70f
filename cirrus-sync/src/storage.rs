//! Persistence collaborators.
//!
//! A [`Storage`] loads and saves one JSON document. [`KeyValueStore`] adds
//! serialized per-key access on top, which is how the singleton controllers
//! use it.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use cirrus_types::JsonMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};

/// An opaque, asynchronous document store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Loads the stored document. A store that was never written is empty.
    async fn load(&self) -> SyncResult<JsonMap>;

    /// Replaces the stored document.
    async fn save(&self, contents: &JsonMap) -> SyncResult<()>;
}

/// In-memory storage, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    contents: RwLock<JsonMap>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(&self) -> SyncResult<JsonMap> {
        Ok(self.contents.read().await.clone())
    }

    async fn save(&self, contents: &JsonMap) -> SyncResult<()> {
        *self.contents.write().await = contents.clone();
        Ok(())
    }
}

/// Storage backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn load(&self) -> SyncResult<JsonMap> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(JsonMap::new()),
            Err(e) => {
                return Err(SyncError::Storage(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        if text.trim().is_empty() {
            return Ok(JsonMap::new());
        }
        trace!(path = %self.path.display(), bytes = text.len(), "loaded storage");
        Ok(serde_json::from_str(&text)?)
    }

    async fn save(&self, contents: &JsonMap) -> SyncResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::Storage(format!("failed to create {}: {e}", parent.display())))?;
        }
        let bytes = serde_json::to_vec_pretty(contents)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| SyncError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SyncError::Storage(format!("failed to replace {}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), keys = contents.len(), "saved storage");
        Ok(())
    }
}

/// Per-key access to a [`Storage`], serializing read-modify-write cycles.
pub struct KeyValueStore {
    storage: Arc<dyn Storage>,
    write_lock: Mutex<()>,
}

impl KeyValueStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn get(&self, key: &str) -> SyncResult<Option<serde_json::Value>> {
        Ok(self.storage.load().await?.remove(key))
    }

    pub async fn contains_key(&self, key: &str) -> SyncResult<bool> {
        Ok(self.storage.load().await?.contains_key(key))
    }

    pub async fn set(&self, key: &str, value: serde_json::Value) -> SyncResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut contents = self.storage.load().await?;
        contents.insert(key.to_string(), value);
        self.storage.save(&contents).await
    }

    pub async fn remove(&self, key: &str) -> SyncResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut contents = self.storage.load().await?;
        if contents.remove(key).is_some() {
            self.storage.save(&contents).await?;
        }
        Ok(())
    }
}
