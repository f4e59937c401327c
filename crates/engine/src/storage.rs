//! Durable key-value storage and the offline download index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::api::BoxFuture;
use crate::error::EngineError;

/// Key prefix of offline index entries.
const OFFLINE_PREFIX: &str = "download:";

/// Key-value store for job-independent state.
pub trait DurableStorage: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, EngineError>>;

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), EngineError>>;

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), EngineError>>;

    /// All keys starting with `prefix`.
    fn keys<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>, EngineError>>;
}

/// A completed download recorded for offline access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineEntry {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub path: PathBuf,
    /// Seconds since the Unix epoch.
    pub completed_at: u64,
}

/// Storage key of the offline entry for `file_id`.
pub fn offline_key(file_id: &str) -> String {
    format!("{OFFLINE_PREFIX}{file_id}")
}

/// Records a completed download.
pub async fn record_offline(
    storage: &dyn DurableStorage,
    entry: &OfflineEntry,
) -> Result<(), EngineError> {
    let key = offline_key(&entry.id);
    storage.set(&key, serde_json::to_value(entry)?).await
}

/// Looks up the offline entry for `file_id`.
pub async fn offline_entry(
    storage: &dyn DurableStorage,
    file_id: &str,
) -> Result<Option<OfflineEntry>, EngineError> {
    let key = offline_key(file_id);
    match storage.get(&key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Every recorded offline entry.
pub async fn offline_entries(storage: &dyn DurableStorage) -> Result<Vec<OfflineEntry>, EngineError> {
    let mut entries = Vec::new();
    for key in storage.keys(OFFLINE_PREFIX).await? {
        if let Some(value) = storage.get(&key).await? {
            entries.push(serde_json::from_value(value)?);
        }
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// In-process storage; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStorage for MemoryStorage {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, EngineError>> {
        let value = self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        Box::pin(async move { Ok(value) })
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), EngineError>> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Box::pin(async { Ok(()) })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), EngineError>> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Box::pin(async { Ok(()) })
    }

    fn keys<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>, EngineError>> {
        let mut keys: Vec<String> = self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Box::pin(async move { Ok(keys) })
    }
}

// ---------------------------------------------------------------------------
// JsonFileStorage
// ---------------------------------------------------------------------------

/// Storage persisted as one JSON object on disk.
///
/// Writes go to a sibling temp file that is renamed over the original.
pub struct JsonFileStorage {
    path: PathBuf,
    values: tokio::sync::Mutex<HashMap<String, Value>>,
}

impl JsonFileStorage {
    /// Opens (or starts) the store at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let values = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = values.len(), "storage opened");
        Ok(Self {
            path,
            values: tokio::sync::Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, values: &HashMap<String, Value>) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(values)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

impl DurableStorage for JsonFileStorage {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, EngineError>> {
        Box::pin(async move { Ok(self.values.lock().await.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            let mut values = self.values.lock().await;
            values.insert(key.to_string(), value);
            self.persist(&values).await
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            let mut values = self.values.lock().await;
            if values.remove(key).is_some() {
                self.persist(&values).await?;
            }
            Ok(())
        })
    }

    fn keys<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>, EngineError>> {
        Box::pin(async move {
            let mut keys: Vec<String> = self
                .values
                .lock()
                .await
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        })
    }
}
