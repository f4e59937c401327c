//! Chunked encrypted transfer engine.
//!
//! Splits files into fixed-size chunks, seals every chunk independently,
//! moves chunks over the network under bounded concurrency and reassembles
//! them strictly in index order. The engine is a library with no network or
//! UI dependencies: the host supplies a [`MetadataApi`], a
//! [`ChunkTransport`], a [`KeyProvider`], [`DurableStorage`] and a
//! [`FileSink`], and observes jobs through [`JobHandle`]s and
//! [`TransferEvent`]s.
//!
//! # Pipeline
//!
//! 1. **Admit** - validate, dedup in the registry, queue
//! 2. **Gate** - wait for a whole-file slot (uploads 3, downloads 5)
//! 3. **Chunks** - per chunk: read/seal/push or fetch/open, each network
//!    exchange gated (upload chunks 5, download chunks 30) and retried
//! 4. **Commit** - ordered side effect through the sequencer
//! 5. **Finish** - finalize call (uploads) or rename into place (downloads)

pub mod api;
pub mod config;
mod download;
mod engine;
pub mod error;
pub mod events;
pub mod sink;
pub mod storage;
pub mod transport;
mod upload;

// Re-export primary types for convenience.
pub use api::{BoxFuture, ChunkTransport, KeyProvider, MetadataApi, TransportError, UploadTarget};
pub use config::EngineConfig;
pub use engine::{Collaborators, JobHandle, TransferEngine};
pub use error::EngineError;
pub use events::TransferEvent;
pub use sink::{ChunkFile, FileSink, LocalFileSink};
pub use storage::{
    DurableStorage, JsonFileStorage, MemoryStorage, OfflineEntry, offline_entries, offline_entry,
};
pub use transport::GatedTransport;
pub use upload::UploadSource;

pub use cirrus_transfer::{FileKey, TransferOutcome};
