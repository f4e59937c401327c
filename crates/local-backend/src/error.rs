use cirrus_engine::TransportError;

/// Errors raised by the local backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("chunk {index} of {id} not found")]
    ChunkNotFound { id: String, index: u64 },
}

impl From<BackendError> for TransportError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::ChunkNotFound { .. } | BackendError::InvalidId(_) => {
                TransportError::Malformed(e.to_string())
            }
            other => TransportError::Network(other.to_string()),
        }
    }
}
