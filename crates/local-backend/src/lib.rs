//! Local directory backend for Cirrus.
//!
//! Implements the engine's [`MetadataApi`](cirrus_engine::MetadataApi) and
//! [`ChunkTransport`](cirrus_engine::ChunkTransport) on top of a plain
//! directory, so the engine can run end to end without a server. Chunks are
//! stored exactly as the engine sealed them; the metadata blob is sealed by
//! [`PlainKeyProvider`], which does not protect the file key.

mod backend;
mod error;
mod index;
mod keys;

pub use backend::LocalBackend;
pub use error::BackendError;
pub use index::RemoteFile;
pub use keys::{PlainKeyProvider, open_metadata};
