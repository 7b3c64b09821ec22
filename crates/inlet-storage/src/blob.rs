//! Blob storage contract and backends
//!
//! Raw sources and attachments can live outside the relational rows. The
//! core only relies on [`BlobStore::put`], [`BlobStore::get`] and
//! [`BlobStore::delete`]; once a key has been written the blob store owns
//! the bytes.

use crate::memory::MemoryBlobStore;
use async_trait::async_trait;
use inlet_common::config::StorageConfig;
use inlet_common::{Error, Result};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Blob store trait
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key`, replacing any previous value
    async fn put(&self, key: &str, content_type: &str, data: &[u8]) -> Result<()>;

    /// Read the bytes under `key`; a missing key is [`Error::NotFound`]
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove `key`; removing a missing key succeeds
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Local filesystem blob store
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    /// Create a new local blob store from config
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Self::from_path(&config.path)
    }

    /// Create a new local blob store rooted at `path`
    pub fn from_path(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized local blob storage");

        Ok(Self {
            base_path: path.to_path_buf(),
        })
    }

    /// Resolve a key below the base path. Only plain relative components are
    /// allowed, so a key can never escape the storage directory.
    fn full_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(Error::Storage("Empty blob key".to_string()));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(Error::Storage("Absolute paths are not allowed".to_string()));
        }

        let relative = Path::new(key);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(Error::Storage(format!(
                "Path traversal detected in blob key: {}",
                key
            )));
        }

        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, content_type: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(key)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        // Write beside the target and rename so readers never see a partial blob
        let tmp_path = full_path.with_extension("partial");
        if let Err(e) = write_and_rename(&tmp_path, &full_path, data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        debug!(key = %key, content_type = %content_type, size = data.len(), "Stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(key)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("blob {}", key)))
            }
            Err(e) => Err(Error::Storage(format!("Failed to read file: {}", e))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.full_path(key)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => {
                debug!(key = %key, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Failed to delete file: {}", e))),
        }
    }
}

async fn write_and_rename(tmp_path: &Path, full_path: &Path, data: &[u8]) -> Result<()> {
    let mut file = fs::File::create(tmp_path)
        .await
        .map_err(|e| Error::Storage(format!("Failed to create file: {}", e)))?;
    file.write_all(data)
        .await
        .map_err(|e| Error::Storage(format!("Failed to write file: {}", e)))?;
    file.sync_all()
        .await
        .map_err(|e| Error::Storage(format!("Failed to sync file: {}", e)))?;
    drop(file);
    fs::rename(tmp_path, full_path)
        .await
        .map_err(|e| Error::Storage(format!("Failed to finalize file: {}", e)))
}

/// Create the configured blob store. `inline` means no blob store: content is
/// kept in the relational rows instead.
pub fn create_blob_store(config: &StorageConfig) -> Result<Option<Arc<dyn BlobStore>>> {
    match config.backend.as_str() {
        "fs" => Ok(Some(Arc::new(LocalBlobStore::new(config)?))),
        "memory" => Ok(Some(Arc::new(MemoryBlobStore::new()))),
        "inline" => Ok(None),
        other => Err(Error::Config(format!(
            "Unsupported storage backend: {}",
            other
        ))),
    }
}
