//! Directory-backed metadata API and chunk store.
//!
//! Layout under the root directory:
//!
//! ```text
//! index.json              finalized files, keyed by id
//! chunks/<id>/<index>     sealed chunk bytes
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cirrus_engine::{BoxFuture, ChunkTransport, MetadataApi, TransportError, UploadTarget};
use cirrus_protocol::{ApiResponse, FileDescriptor, UploadCompletion};
use cirrus_transfer::validate_file_name;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::BackendError;
use crate::index::{Index, RemoteFile};
use crate::keys::open_metadata;

const INDEX_FILE: &str = "index.json";
const CHUNKS_DIR: &str = "chunks";

/// A metadata API and chunk store living in one local directory.
pub struct LocalBackend {
    root: PathBuf,
    index: Mutex<Index>,
}

impl LocalBackend {
    /// Opens (or initializes) the backend rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(CHUNKS_DIR)).await?;
        let index = Index::load(root.join(INDEX_FILE)).await?;
        info!(root = %root.display(), "local backend opened");
        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Finalized files, optionally restricted to one folder, sorted by name.
    pub async fn list(&self, parent: Option<&str>) -> Vec<RemoteFile> {
        let index = self.index.lock().await;
        let mut files: Vec<RemoteFile> = index
            .files()
            .filter(|f| parent.is_none_or(|p| f.parent == p))
            .cloned()
            .collect();
        files.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        files
    }

    /// Looks up a finalized file by id.
    pub async fn get(&self, id: &str) -> Option<RemoteFile> {
        self.index.lock().await.get(id).cloned()
    }

    /// Deletes chunk directories that belong to no finalized file and have
    /// not been written to for at least `min_age`.
    ///
    /// Cancelled and failed uploads leave their chunks behind. An upload in
    /// progress in another process looks the same until it finalizes, so
    /// `min_age` must exceed the longest expected upload.
    pub async fn prune_orphans(&self, min_age: Duration) -> Result<usize, BackendError> {
        let index = self.index.lock().await;
        let mut entries = tokio::fs::read_dir(self.root.join(CHUNKS_DIR)).await?;
        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if index.contains_id(&name) {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age < min_age {
                debug!(upload = %name, age_secs = age.as_secs(), "recent unfinalized upload kept");
                continue;
            }
            tokio::fs::remove_dir_all(entry.path()).await?;
            debug!(upload = %name, "orphaned chunks removed");
            removed += 1;
        }
        if removed > 0 {
            info!(removed, "pruned orphaned uploads");
        }
        Ok(removed)
    }

    fn chunk_path(&self, id: &str, index: u64) -> Result<PathBuf, BackendError> {
        validate_file_name(id).map_err(|_| BackendError::InvalidId(id.to_string()))?;
        Ok(self.root.join(CHUNKS_DIR).join(id).join(index.to_string()))
    }

    async fn store_chunk(&self, id: &str, index: u64, sealed: &[u8]) -> Result<(), BackendError> {
        let path = self.chunk_path(id, index)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, sealed).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(upload = %id, index, bytes = sealed.len(), "chunk stored");
        Ok(())
    }

    async fn load_chunk(&self, id: &str, index: u64) -> Result<Vec<u8>, BackendError> {
        let path = self.chunk_path(id, index)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackendError::ChunkNotFound {
                id: id.to_string(),
                index,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn finalize(&self, completion: &UploadCompletion) -> Result<ApiResponse, BackendError> {
        let mut index = self.index.lock().await;
        if index.contains_id(&completion.id) {
            return Ok(ApiResponse::error(format!(
                "upload {} is already finalized",
                completion.id
            )));
        }
        if index.contains_name(&completion.parent, &completion.name) {
            return Ok(ApiResponse::error(format!(
                "{} already exists in {}",
                completion.name, completion.parent
            )));
        }
        for i in 0..completion.chunks {
            if !tokio::fs::try_exists(self.chunk_path(&completion.id, i)?).await? {
                warn!(upload = %completion.id, index = i, "finalize with missing chunk");
                return Ok(ApiResponse::error(format!("chunk {i} was never stored")));
            }
        }

        let uploaded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        index
            .insert(RemoteFile::from_completion(completion, uploaded_at))
            .await?;
        info!(
            upload = %completion.id,
            name = %completion.name,
            parent = %completion.parent,
            index = %index.path().display(),
            "upload finalized"
        );
        Ok(ApiResponse::ok())
    }

    async fn descriptor(&self, file_id: &str) -> Result<ApiResponse, BackendError> {
        let Some(file) = self.get(file_id).await else {
            return Ok(ApiResponse::error("file not found"));
        };
        let metadata = match open_metadata(&file.metadata) {
            Ok(m) => m,
            Err(e) => {
                warn!(file = %file_id, error = %e, "unreadable metadata");
                return Ok(ApiResponse::error("metadata is not readable"));
            }
        };
        Ok(ApiResponse::with_data(&FileDescriptor {
            id: file.id,
            name: file.name,
            size: file.size,
            chunk_size: file.chunk_size,
            key: metadata.key,
            parent: file.parent,
        })?)
    }
}

impl MetadataApi for LocalBackend {
    fn exists<'a>(
        &'a self,
        parent: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            let exists = self.index.lock().await.contains_name(parent, name);
            ApiResponse::with_data(&serde_json::json!({ "exists": exists }))
                .map_err(|e| TransportError::Malformed(e.to_string()))
        })
    }

    fn mark_upload_done<'a>(
        &'a self,
        completion: &'a UploadCompletion,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        Box::pin(async move { Ok(self.finalize(completion).await?) })
    }

    fn download_descriptor<'a>(
        &'a self,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        Box::pin(async move { Ok(self.descriptor(file_id).await?) })
    }
}

impl ChunkTransport for LocalBackend {
    fn download_chunk<'a>(
        &'a self,
        file: &'a FileDescriptor,
        index: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransportError>> {
        Box::pin(async move { Ok(self.load_chunk(&file.id, index).await?) })
    }

    fn upload_chunk<'a>(
        &'a self,
        target: &'a UploadTarget,
        index: u64,
        sealed: &'a [u8],
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            self.store_chunk(&target.id, index, sealed).await?;
            Ok(ApiResponse::ok())
        })
    }
}
