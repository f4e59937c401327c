//! Engine error types.

use cirrus_transfer::{CodecError, GateError, RegistryError, SequencerError, TransferError};

use crate::api::TransportError;

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("max retries reached for chunk {index} of file {file} ({attempts} attempts)")]
    MaxRetries {
        file: String,
        index: u64,
        attempts: u32,
    },

    #[error("a file named {name} already exists in {parent}")]
    NameCollision { parent: String, name: String },

    #[error("already downloading {0}")]
    AlreadyDownloading(String),

    #[error("duplicate transfer: {0}")]
    DuplicateTransfer(String),

    #[error("cancelled")]
    Cancelled,

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("finalize failed: {0}")]
    Finalize(String),

    #[error("integrity check failed: {0}")]
    Integrity(#[from] CodecError),

    #[error("metadata API error: {0}")]
    Api(String),

    #[error("key provider error: {0}")]
    Key(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("{0}")]
    Gate(#[from] GateError),

    #[error("sequencer error: {0}")]
    Sequencer(SequencerError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("transfer task panicked: {0}")]
    Panicked(String),
}

impl EngineError {
    /// Whether this error is the cancellation outcome rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Gate(GateError::Purged(_)))
    }
}

impl From<RegistryError> for EngineError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::AlreadyDownloading(name) => Self::AlreadyDownloading(name),
            other => Self::DuplicateTransfer(other.to_string()),
        }
    }
}

impl From<SequencerError> for EngineError {
    fn from(e: SequencerError) -> Self {
        // Surface the sink's own error when one side effect failed.
        match e {
            SequencerError::Sink { source, .. } => Self::Transfer(source),
            other => Self::Sequencer(other),
        }
    }
}
