//! Gated, retrying chunk transport.
//!
//! Wraps a single-attempt [`ChunkTransport`] with the engine's per-chunk
//! gates, a request timeout, a fixed backoff and an attempt budget. Each
//! attempt holds a gate slot only for the network exchange itself; the slot
//! is released before the backoff sleep.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cirrus_protocol::FileDescriptor;
use cirrus_transfer::Gate;
use cirrus_transfer::codec::MIN_SEALED_LEN;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ChunkTransport, TransportError, UploadTarget};
use crate::error::EngineError;

/// Outcome of one attempt.
enum Attempt<T> {
    Done(T),
    Retry(TransportError),
}

/// [`ChunkTransport`] plus gating, timeout and retry.
pub struct GatedTransport {
    inner: Arc<dyn ChunkTransport>,
    upload_gate: Arc<Gate>,
    download_gate: Arc<Gate>,
    timeout: Duration,
    backoff: Duration,
}

impl GatedTransport {
    pub fn new(
        inner: Arc<dyn ChunkTransport>,
        upload_gate: Arc<Gate>,
        download_gate: Arc<Gate>,
        timeout: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            inner,
            upload_gate,
            download_gate,
            timeout,
            backoff,
        }
    }

    /// Fetches the sealed bytes of chunk `index`, retrying transient faults
    /// up to `max_attempts` times.
    ///
    /// A payload shorter than the smallest sealed chunk counts as a failed
    /// attempt.
    pub async fn fetch_chunk(
        &self,
        file: &FileDescriptor,
        index: u64,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, EngineError> {
        let exchange = move || async move {
            let sealed = self.inner.download_chunk(file, index).await?;
            if sealed.len() < MIN_SEALED_LEN {
                return Err(TransportError::Undersized { len: sealed.len() });
            }
            Ok(sealed)
        };
        self.with_retry(&self.download_gate, &file.name, index, max_attempts, cancel, exchange)
            .await
    }

    /// Pushes the sealed bytes of chunk `index`, retrying transient faults
    /// up to `max_attempts` times.
    pub async fn push_chunk(
        &self,
        target: &UploadTarget,
        index: u64,
        sealed: &[u8],
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let exchange = move || async move {
            let resp = self.inner.upload_chunk(target, index, sealed).await?;
            if !resp.status {
                return Err(TransportError::Malformed(resp.message_or_default().to_string()));
            }
            Ok(())
        };
        self.with_retry(&self.upload_gate, &target.name, index, max_attempts, cancel, exchange)
            .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        gate: &Gate,
        file: &str,
        index: u64,
        max_attempts: u32,
        cancel: &CancellationToken,
        mut exchange: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let max_attempts = max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.attempt(gate, cancel, &mut exchange).await? {
                Attempt::Done(value) => {
                    debug!(file, index, attempt, gate = gate.name(), "chunk exchange done");
                    return Ok(value);
                }
                Attempt::Retry(e) => {
                    warn!(file, index, attempt, max_attempts, error = %e, "chunk exchange failed");
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep(self.backoff) => {}
                }
            }
        }

        Err(EngineError::MaxRetries {
            file: file.to_string(),
            index,
            attempts: max_attempts,
        })
    }

    async fn attempt<T, F, Fut>(
        &self,
        gate: &Gate,
        cancel: &CancellationToken,
        exchange: &mut F,
    ) -> Result<Attempt<T>, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            permit = gate.acquire() => permit?,
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = tokio::time::timeout(self.timeout, exchange()) => result,
        };

        Ok(match result {
            Ok(Ok(value)) => Attempt::Done(value),
            Ok(Err(e)) => Attempt::Retry(e),
            Err(_) => Attempt::Retry(TransportError::Timeout),
        })
    }
}
