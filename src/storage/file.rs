//! File storage backend.
//!
//! All keys live in one JSON object. Writes rewrite the whole document
//! through a temporary file and a rename, so readers never observe a
//! half-written file.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{ProxyError, Result, StorageErrorKind};

use super::KeyValueBackend;

type Document = BTreeMap<String, String>;

/// Backend persisting every key in a single JSON file.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    quota_bytes: Option<u64>,
    // Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl FileBackend {
    /// Create a backend over `path`. The file is created on first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            quota_bytes: None,
            lock: Mutex::new(()),
        }
    }

    /// Refuse writes that would grow the document past `bytes`.
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Document> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => return Err(io_error(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(Document::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            ProxyError::storage(
                StorageErrorKind::Serialization,
                format!("{} is not a storage document: {}", self.path.display(), e),
            )
        })
    }

    /// Current document for a read-modify-write cycle.
    ///
    /// An unreadable document is moved aside to `<path>.corrupt` and writing
    /// starts over from an empty one.
    async fn document_for_update(&self) -> Result<Document> {
        match self.read_document().await {
            Err(ProxyError::Storage {
                kind: StorageErrorKind::Serialization,
                message,
            }) => {
                let backup = self.corrupt_path();
                warn!(error = %message, backup = %backup.display(), "discarding corrupt storage document");
                if let Err(e) = fs::rename(&self.path, &backup).await {
                    warn!(error = %e, "failed to move corrupt storage document aside");
                }
                Ok(Document::new())
            }
            other => other,
        }
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".corrupt");
        PathBuf::from(name)
    }

    async fn write_document(&self, document: &Document) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(document).map_err(|e| {
            ProxyError::storage(StorageErrorKind::Serialization, e.to_string())
        })?;
        if let Some(quota) = self.quota_bytes {
            if bytes.len() as u64 > quota {
                return Err(ProxyError::storage(
                    StorageErrorKind::Quota,
                    format!(
                        "document of {} bytes exceeds quota of {} bytes",
                        bytes.len(),
                        quota
                    ),
                ));
            }
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        file.write_all(&bytes).await.map_err(|e| io_error(&tmp, e))?;
        file.sync_all().await.map_err(|e| io_error(&tmp, e))?;
        drop(file);
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;

        trace!(path = %self.path.display(), bytes = bytes.len(), "storage document written");
        Ok(())
    }
}

#[async_trait]
impl KeyValueBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        Ok(document.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.document_for_update().await?;
        document.insert(key.to_string(), value);
        self.write_document(&document).await?;
        debug!(key, "stored value");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.document_for_update().await?;
        if document.remove(key).is_some() {
            self.write_document(&document).await?;
        }
        Ok(())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> ProxyError {
    ProxyError::storage(
        StorageErrorKind::Io,
        format!("{}: {}", path.display(), e),
    )
}
