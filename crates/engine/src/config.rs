//! Engine tuning.
//!
//! Every field defaults to the service's reference behavior, so an empty
//! TOML table is a valid configuration.

use std::path::Path;
use std::time::Duration;

use cirrus_protocol::constants;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Capacities, retry budgets and timings of a [`TransferEngine`](crate::TransferEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Plaintext bytes per upload chunk.
    #[serde(default = "default_upload_chunk_size")]
    pub upload_chunk_size: u64,

    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    #[serde(default = "default_max_upload_chunk_requests")]
    pub max_upload_chunk_requests: usize,

    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    #[serde(default = "default_max_download_chunk_requests")]
    pub max_download_chunk_requests: usize,

    #[serde(default = "default_upload_max_attempts")]
    pub upload_max_attempts: u32,

    #[serde(default = "default_download_max_attempts")]
    pub download_max_attempts: u32,

    #[serde(default = "default_preview_max_attempts")]
    pub preview_max_attempts: u32,

    /// Delay between two attempts of one chunk, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Timeout of a single chunk request, in milliseconds.
    #[serde(default = "default_chunk_request_timeout_ms")]
    pub chunk_request_timeout_ms: u64,

    /// Periodic progress event interval, in milliseconds.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Chunk tasks one job may have outstanding.
    #[serde(default = "default_commit_window")]
    pub commit_window: usize,

    /// Capacity of the event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_upload_chunk_size() -> u64 {
    constants::UPLOAD_CHUNK_SIZE
}

fn default_max_concurrent_uploads() -> usize {
    constants::MAX_CONCURRENT_UPLOADS
}

fn default_max_upload_chunk_requests() -> usize {
    constants::MAX_UPLOAD_CHUNK_REQUESTS
}

fn default_max_concurrent_downloads() -> usize {
    constants::MAX_CONCURRENT_DOWNLOADS
}

fn default_max_download_chunk_requests() -> usize {
    constants::MAX_DOWNLOAD_CHUNK_REQUESTS
}

fn default_upload_max_attempts() -> u32 {
    constants::UPLOAD_MAX_ATTEMPTS
}

fn default_download_max_attempts() -> u32 {
    constants::DOWNLOAD_MAX_ATTEMPTS
}

fn default_preview_max_attempts() -> u32 {
    constants::PREVIEW_MAX_ATTEMPTS
}

fn default_retry_backoff_ms() -> u64 {
    constants::RETRY_BACKOFF.as_millis() as u64
}

fn default_chunk_request_timeout_ms() -> u64 {
    constants::CHUNK_REQUEST_TIMEOUT.as_millis() as u64
}

fn default_progress_interval_ms() -> u64 {
    constants::PROGRESS_INTERVAL.as_millis() as u64
}

fn default_commit_window() -> usize {
    constants::COMMIT_WINDOW
}

fn default_event_buffer() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            upload_chunk_size: default_upload_chunk_size(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            max_upload_chunk_requests: default_max_upload_chunk_requests(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            max_download_chunk_requests: default_max_download_chunk_requests(),
            upload_max_attempts: default_upload_max_attempts(),
            download_max_attempts: default_download_max_attempts(),
            preview_max_attempts: default_preview_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            chunk_request_timeout_ms: default_chunk_request_timeout_ms(),
            progress_interval_ms: default_progress_interval_ms(),
            commit_window: default_commit_window(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl EngineConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        // Each field is compared in its own type; no narrowing casts.
        let zero = [
            ("upload_chunk_size", self.upload_chunk_size == 0),
            ("max_concurrent_uploads", self.max_concurrent_uploads == 0),
            ("max_upload_chunk_requests", self.max_upload_chunk_requests == 0),
            ("max_concurrent_downloads", self.max_concurrent_downloads == 0),
            ("max_download_chunk_requests", self.max_download_chunk_requests == 0),
            ("upload_max_attempts", self.upload_max_attempts == 0),
            ("download_max_attempts", self.download_max_attempts == 0),
            ("preview_max_attempts", self.preview_max_attempts == 0),
            ("chunk_request_timeout_ms", self.chunk_request_timeout_ms == 0),
            ("progress_interval_ms", self.progress_interval_ms == 0),
            ("commit_window", self.commit_window == 0),
            ("event_buffer", self.event_buffer == 0),
        ];
        if let Some((field, _)) = zero.into_iter().find(|(_, is_zero)| *is_zero) {
            return Err(EngineError::Config(format!("{field} must be greater than 0")));
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn chunk_request_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_request_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
