//! Persistent key-value storage.
//!
//! Values are stored as JSON text under string keys. The backend is chosen by
//! [`Environment`]:
//! - `Development`: [`MemoryBackend`], nothing survives the process
//! - `Extension`: [`FileBackend`], one JSON document on disk

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{Environment, StorageConfig, StorageKeys};
use crate::error::{ProxyError, Result, StorageErrorKind};
use crate::query::QueryNotes;
use crate::types::{ProxyCollection, ProxyMode, ProxySettings};

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

/// Trait for raw string storage
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Typed access to the persisted records.
///
/// Reads are forgiving: a missing or unreadable record is reported as absent
/// and logged. Writes return their errors.
#[derive(Clone)]
pub struct StorageBridge {
    backend: Arc<dyn KeyValueBackend>,
    keys: StorageKeys,
}

impl std::fmt::Debug for StorageBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBridge")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl StorageBridge {
    /// Create a bridge over an explicit backend.
    pub fn new(backend: Arc<dyn KeyValueBackend>, keys: StorageKeys) -> Self {
        Self { backend, keys }
    }

    /// Create a bridge over the backend `config` selects.
    pub fn from_config(config: &StorageConfig) -> Self {
        let environment = config.environment();
        debug!(?environment, "selecting storage backend");
        let backend: Arc<dyn KeyValueBackend> = match environment {
            Environment::Development => Arc::new(MemoryBackend::new()),
            Environment::Extension => {
                let mut file = FileBackend::new(&config.path);
                if let Some(quota) = config.quota_bytes {
                    file = file.with_quota(quota);
                }
                Arc::new(file)
            }
        };
        Self::new(backend, config.keys.clone())
    }

    /// Storage keys in use
    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Read and decode a value, `None` when missing or unreadable.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "failed to read from storage");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "ignoring malformed stored value");
                None
            }
        }
    }

    /// Encode and store a value.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value).map_err(|e| {
            ProxyError::storage(
                StorageErrorKind::Serialization,
                format!("cannot serialize value for {}: {}", key, e),
            )
        })?;
        self.backend.set(key, raw).await
    }

    /// Delete a value.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.backend.remove(key).await
    }

    /// Rule collection stored for `mode`
    pub async fn get_rule_collection(&self, mode: ProxyMode) -> Option<ProxyCollection> {
        self.get(self.keys.collection(mode)).await
    }

    /// Store the rule collection for `mode`.
    pub async fn set_rule_collection(
        &self,
        collection: &ProxyCollection,
        mode: ProxyMode,
    ) -> Result<()> {
        self.set(self.keys.collection(mode), collection).await
    }

    /// Global settings, defaulting to disabled table mode
    pub async fn proxy_settings(&self) -> ProxySettings {
        self.get(&self.keys.settings).await.unwrap_or_default()
    }

    /// Store the global settings.
    pub async fn set_proxy_settings(&self, settings: &ProxySettings) -> Result<()> {
        self.set(&self.keys.settings, settings).await
    }

    /// Saved query-parameter notes
    pub async fn query_notes(&self) -> QueryNotes {
        self.get(&self.keys.query_notes).await.unwrap_or_default()
    }

    /// Store query-parameter notes.
    pub async fn set_query_notes(&self, notes: &QueryNotes) -> Result<()> {
        self.set(&self.keys.query_notes, notes).await
    }
}
