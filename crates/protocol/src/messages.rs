use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Download side
// ---------------------------------------------------------------------------

/// Everything needed to download one remote file.
///
/// Returned by the metadata API after the key collaborator has opened the
/// file's sealed metadata, so `key` is already the per-file key (hex).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub id: String,
    pub name: String,
    pub size: u64,
    /// Plaintext bytes per chunk, as declared by the server.
    pub chunk_size: u64,
    /// Hex-encoded 32-byte per-file key.
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent: String,
}

// ---------------------------------------------------------------------------
// Upload side
// ---------------------------------------------------------------------------

/// Plaintext file metadata handed to the key collaborator for sealing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    /// Hex-encoded 32-byte per-file key.
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_hash: String,
}

/// Payload of the "mark upload done" finalize call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCompletion {
    pub id: String,
    pub parent: String,
    pub name: String,
    pub size: u64,
    pub chunks: u64,
    pub chunk_size: u64,
    /// SHA-256 over the ordered per-chunk plaintext digests.
    pub content_hash: String,
    /// Metadata sealed by the key collaborator; opaque to the engine.
    pub metadata: String,
}
