//! Collaborator traits the engine consumes.
//!
//! The host application implements these on top of its HTTP client, key
//! hierarchy and storage. Using traits keeps the transfer logic decoupled
//! from the network and testable with mocks.

use std::future::Future;
use std::pin::Pin;

use cirrus_protocol::{ApiResponse, FileDescriptor, FileMetadata, UploadCompletion};
use cirrus_transfer::FileKey;

use crate::error::EngineError;

/// Boxed future returned by collaborator calls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single failed network exchange.
///
/// Every variant is transient; the retrying transport decides when to give up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("undersized payload: {len} bytes")]
    Undersized { len: usize },

    #[error("request timed out")]
    Timeout,
}

/// Where an upload's chunks go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Identifier allocated for the new file.
    pub id: String,
    /// Destination folder.
    pub parent: String,
    pub name: String,
}

/// REST metadata API.
///
/// Each call is one request/response exchange returning the service
/// envelope. Credentials are the implementation's concern.
pub trait MetadataApi: Send + Sync {
    /// Checks whether `name` already exists in folder `parent`.
    ///
    /// `data` carries `{"exists": bool}`.
    fn exists<'a>(
        &'a self,
        parent: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>>;

    /// Marks an upload as complete once every chunk is stored.
    fn mark_upload_done<'a>(
        &'a self,
        completion: &'a UploadCompletion,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>>;

    /// Resolves a file id into a [`FileDescriptor`] carried in `data`.
    fn download_descriptor<'a>(
        &'a self,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>>;
}

/// Raw single-attempt chunk exchange.
///
/// Implementations perform exactly one network call per invocation; retry,
/// gating and timeouts are layered on top by the engine.
pub trait ChunkTransport: Send + Sync {
    /// Fetches the sealed bytes of chunk `index`.
    fn download_chunk<'a>(
        &'a self,
        file: &'a FileDescriptor,
        index: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransportError>>;

    /// Stores the sealed bytes of chunk `index`. `status = false` in the
    /// reply is treated as a malformed response.
    fn upload_chunk<'a>(
        &'a self,
        target: &'a UploadTarget,
        index: u64,
        sealed: &'a [u8],
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>>;
}

/// Source of per-file keys.
///
/// The engine never derives or stores keys; it borrows them for one job.
pub trait KeyProvider: Send + Sync {
    /// Key for a new upload of `name`.
    fn file_key(&self, name: &str) -> Result<FileKey, EngineError>;

    /// Seals file metadata under the user's key hierarchy.
    fn seal_metadata(&self, metadata: &FileMetadata) -> Result<String, EngineError>;
}
