//! Upload controller.
//!
//! Reads, seals and pushes chunks concurrently, accounts for their
//! acknowledgments in index order, then makes the single "mark upload done"
//! call.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use cirrus_protocol::{FileMetadata, UploadCompletion};
use cirrus_transfer::{
    ChunkReader, CommitSink, FileKey, Sequencer, TransferError, TransferJob, checksum_bytes, codec,
};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::api::UploadTarget;
use crate::engine::EngineContext;
use crate::error::EngineError;

/// A local file to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSource {
    pub path: PathBuf,
    /// Remote name; defaults to the file name of `path`.
    pub name: String,
}

impl UploadSource {
    /// Uploads `path` under its own file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }

    /// Uploads under a different remote name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Everything an upload job needs once it is running.
pub(crate) struct UploadPlan {
    pub reader: ChunkReader,
    pub target: UploadTarget,
    pub key: FileKey,
}

/// One acknowledged chunk, handed to the ledger.
pub(crate) struct ChunkAck {
    plaintext_len: u64,
    digest: String,
}

/// Ordered acknowledgment accounting for one upload.
#[derive(Default)]
pub(crate) struct UploadLedger {
    hasher: Sha256,
    acknowledged: u64,
    bytes: u64,
}

impl UploadLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// SHA-256 over the per-chunk plaintext digests in index order.
    pub(crate) fn content_hash(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl CommitSink for UploadLedger {
    type Payload = ChunkAck;

    fn commit(
        &mut self,
        index: u64,
        ack: ChunkAck,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + '_>> {
        self.hasher.update(ack.digest.as_bytes());
        self.acknowledged += 1;
        self.bytes += ack.plaintext_len;
        debug!(index, acknowledged = self.acknowledged, "upload chunk acknowledged");
        Box::pin(async { Ok(()) })
    }
}

/// Runs an upload job to completion.
pub(crate) async fn run(
    ctx: Arc<EngineContext>,
    job: Arc<TransferJob>,
    plan: UploadPlan,
) -> Result<(), EngineError> {
    let total = job.total_chunks();
    let seq = Sequencer::new(total, UploadLedger::new()).tracking(Arc::clone(&job));

    push_all(&ctx, &job, &plan, &seq).await?;

    if job.is_cancel_requested() {
        return Err(EngineError::Cancelled);
    }

    let ledger = seq.into_sink();
    debug!(
        upload = %plan.target.id,
        chunks = ledger.acknowledged,
        bytes = ledger.bytes,
        "all chunks acknowledged"
    );
    finalize(&ctx, &job, &plan, ledger.content_hash()).await
}

async fn push_all(
    ctx: &EngineContext,
    job: &TransferJob,
    plan: &UploadPlan,
    seq: &Sequencer<UploadLedger>,
) -> Result<(), EngineError> {
    let token = job.cancel_token();
    let cancel = &token;
    let max_attempts = ctx.config.upload_max_attempts;

    let mut chunks = futures_util::stream::iter(0..job.total_chunks())
        .map(move |index| async move {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let plaintext = plan.reader.read_chunk(index).await?;
            let ack = ChunkAck {
                plaintext_len: plaintext.len() as u64,
                digest: checksum_bytes(&plaintext),
            };
            let sealed = codec::encrypt(index, &plan.key, &plaintext)?;
            drop(plaintext);

            ctx.transport
                .push_chunk(&plan.target, index, &sealed, max_attempts, cancel)
                .await?;
            job.record_chunk(ack.plaintext_len);
            seq.commit(index, ack).await?;
            Ok(())
        })
        .buffer_unordered(ctx.config.commit_window);

    while let Some(result) = chunks.next().await {
        result?;
    }
    Ok(())
}

async fn finalize(
    ctx: &EngineContext,
    job: &TransferJob,
    plan: &UploadPlan,
    content_hash: String,
) -> Result<(), EngineError> {
    let target = &plan.target;
    let metadata = ctx.keys.seal_metadata(&FileMetadata {
        name: target.name.clone(),
        size: job.bytes_total(),
        key: plan.key.to_hex(),
        content_hash: content_hash.clone(),
    })?;

    let completion = UploadCompletion {
        id: target.id.clone(),
        parent: target.parent.clone(),
        name: target.name.clone(),
        size: job.bytes_total(),
        chunks: job.total_chunks(),
        chunk_size: job.chunk_size(),
        content_hash,
        metadata,
    };

    let resp = ctx
        .api
        .mark_upload_done(&completion)
        .await
        .map_err(|e| EngineError::Finalize(e.to_string()))?;
    if !resp.status {
        return Err(EngineError::Finalize(resp.message_or_default().to_string()));
    }

    info!(upload = %target.id, name = %target.name, parent = %target.parent, "upload finalized");
    Ok(())
}
