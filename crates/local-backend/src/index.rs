//! On-disk index of finalized files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cirrus_protocol::UploadCompletion;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BackendError;

/// A finalized file as the backend records it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    pub parent: String,
    pub name: String,
    pub size: u64,
    pub chunks: u64,
    pub chunk_size: u64,
    pub content_hash: String,
    /// Sealed metadata blob exactly as the client sent it.
    pub metadata: String,
    /// Seconds since the Unix epoch.
    pub uploaded_at: u64,
}

impl RemoteFile {
    pub(crate) fn from_completion(completion: &UploadCompletion, uploaded_at: u64) -> Self {
        Self {
            id: completion.id.clone(),
            parent: completion.parent.clone(),
            name: completion.name.clone(),
            size: completion.size,
            chunks: completion.chunks,
            chunk_size: completion.chunk_size,
            content_hash: completion.content_hash.clone(),
            metadata: completion.metadata.clone(),
            uploaded_at,
        }
    }
}

/// Files keyed by id, persisted as `index.json`.
#[derive(Debug, Default)]
pub(crate) struct Index {
    path: PathBuf,
    files: BTreeMap<String, RemoteFile>,
}

impl Index {
    pub(crate) async fn load(path: PathBuf) -> Result<Self, BackendError> {
        let files = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), files = files.len(), "index loaded");
        Ok(Self { path, files })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn get(&self, id: &str) -> Option<&RemoteFile> {
        self.files.get(id)
    }

    pub(crate) fn contains_id(&self, id: &str) -> bool {
        self.files.contains_key(id)
    }

    pub(crate) fn contains_name(&self, parent: &str, name: &str) -> bool {
        self.files
            .values()
            .any(|f| f.parent == parent && f.name == name)
    }

    pub(crate) fn files(&self) -> impl Iterator<Item = &RemoteFile> {
        self.files.values()
    }

    /// Inserts `file` and writes the index back to disk.
    ///
    /// The in-memory index only changes once the write succeeded.
    pub(crate) async fn insert(&mut self, file: RemoteFile) -> Result<(), BackendError> {
        let mut files = self.files.clone();
        files.insert(file.id.clone(), file);
        self.persist(&files).await?;
        self.files = files;
        Ok(())
    }

    async fn persist(&self, files: &BTreeMap<String, RemoteFile>) -> Result<(), BackendError> {
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(files)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
