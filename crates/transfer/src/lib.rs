//! Building blocks of the chunked encrypted transfer engine.
//!
//! Everything here is independent of the network and of the metadata API:
//! counting gates, the per-chunk codec, the in-order commit sequencer, the
//! job model and the process-wide job registry.

mod chunked;
pub mod codec;
pub mod gate;
mod progress;
pub mod registry;
pub mod sequencer;
mod types;
mod validation;

pub use chunked::{
    ChunkReader, ChunkWriter, checksum_bytes, chunk_count, chunk_span, part_path_for,
};
pub use codec::{CodecError, FileKey};
pub use gate::{Gate, GateError, GatePermit};
pub use progress::{ProgressCallback, ProgressTracker, SpeedCalculator};
pub use registry::{DedupKey, RegistryError, TransferRegistry};
pub use sequencer::{CommitSink, Sequencer, SequencerError};
pub use types::{TerminalCallback, TransferJob, TransferOutcome};
pub use validation::validate_file_name;

/// Errors produced by the transfer crate's I/O helpers.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("chunk {index} is out of range ({total} chunks)")]
    ChunkOutOfRange { index: u64, total: u64 },

    #[error("short read on chunk {index}: expected {expected} bytes, got {actual}")]
    ShortRead {
        index: u64,
        expected: usize,
        actual: usize,
    },
}
