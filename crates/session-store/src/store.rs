//! Namespaced key → JSON blob persistence.

use crate::error::StoreError;
use crate::types::{now_millis, Namespace, StoredSessions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default prefix of every storage key.
pub const DEFAULT_KEY_PREFIX: &str = "rektnow_pending_payments";

/// Sessions older than this are dropped on load.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
enum Backend {
    /// One JSON file per storage key.
    File { dir: PathBuf },
    Memory(Arc<RwLock<HashMap<String, Vec<u8>>>>),
}

/// Persists [`StoredSessions`] per namespace.
///
/// Loads never fail: a missing, unreadable, or undecodable blob is an
/// empty namespace. Concurrent saves are last-writer-wins.
#[derive(Clone)]
pub struct SessionStore {
    backend: Backend,
    key_prefix: String,
    retention: Duration,
}

impl SessionStore {
    /// Store backed by JSON files under `dir`.
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::with_backend(Backend::File { dir: dir.into() })
    }

    /// In-memory store; contents are lost when the process exits.
    pub fn memory() -> Self {
        Self::with_backend(Backend::Memory(Arc::new(RwLock::new(HashMap::new()))))
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, Backend::File { .. })
    }

    /// Storage key for a namespace, e.g. `rektnow_pending_payments_guest`.
    pub fn storage_key(&self, namespace: &Namespace) -> String {
        format!("{}_{}", self.key_prefix, namespace)
    }

    /// Load the sessions of `namespace`, dropping expired entries.
    pub async fn load(&self, namespace: &Namespace) -> StoredSessions {
        let key = self.storage_key(namespace);

        let bytes = match self.read(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return StoredSessions::default(),
            Err(e) => {
                warn!("Failed to read sessions for {}: {}", key, e);
                return StoredSessions::default();
            }
        };

        let mut stored: StoredSessions = match serde_json::from_slice(&bytes) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Discarding undecodable sessions for {}: {}", key, e);
                return StoredSessions::default();
            }
        };

        let purged = stored.purge_expired(now_millis(), self.retention);
        if purged > 0 {
            debug!("Purged {} expired sessions from {}", purged, key);
        }

        stored
    }

    /// Persist the sessions of `namespace`, replacing whatever was stored.
    pub async fn save(
        &self,
        namespace: &Namespace,
        sessions: &StoredSessions,
    ) -> Result<(), StoreError> {
        let key = self.storage_key(namespace);
        let bytes = serde_json::to_vec(sessions)?;
        self.write(&key, bytes).await
    }

    /// Remove everything stored for `namespace`.
    pub async fn clear(&self, namespace: &Namespace) -> Result<(), StoreError> {
        let key = self.storage_key(namespace);

        match &self.backend {
            Backend::File { dir } => match fs::remove_file(file_path(dir, &key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
            Backend::Memory(map) => {
                map.write().await.remove(&key);
            }
        }

        debug!("Cleared sessions for {}", key);
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match &self.backend {
            Backend::File { dir } => match fs::read(file_path(dir, key)).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            },
            Backend::Memory(map) => Ok(map.read().await.get(key).cloned()),
        }
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        match &self.backend {
            Backend::File { dir } => {
                fs::create_dir_all(dir).await?;

                // Atomic write
                let path = file_path(dir, key);
                let temp_path = path.with_extension("tmp");
                fs::write(&temp_path, &bytes).await?;
                fs::rename(&temp_path, &path).await?;

                debug!("Saved {} bytes to {:?}", bytes.len(), path);
            }
            Backend::Memory(map) => {
                map.write().await.insert(key.to_string(), bytes);
            }
        }
        Ok(())
    }
}

fn file_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.json", urlencoding::encode(key)))
}
