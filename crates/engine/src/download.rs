//! Download controller.
//!
//! Fetches and opens chunks concurrently and appends their plaintext to the
//! output strictly in index order. The output only appears at its
//! destination once every chunk is written; on failure or cancellation the
//! partial output is deleted.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use cirrus_protocol::FileDescriptor;
use cirrus_transfer::{CommitSink, FileKey, Sequencer, TransferError, TransferJob, codec};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::EngineContext;
use crate::error::EngineError;
use crate::sink::ChunkFile;
use crate::storage::{OfflineEntry, record_offline};

/// Everything a download job needs once it is running.
pub(crate) struct DownloadPlan {
    pub descriptor: FileDescriptor,
    pub destination: PathBuf,
    pub key: FileKey,
}

/// Appends committed plaintext to the download output.
pub(crate) struct OutputSink {
    file: Box<dyn ChunkFile>,
}

impl CommitSink for OutputSink {
    type Payload = Vec<u8>;

    fn commit(
        &mut self,
        index: u64,
        plaintext: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + '_>> {
        Box::pin(async move {
            self.file.append(&plaintext).await?;
            debug!(index, bytes = plaintext.len(), "download chunk written");
            Ok(())
        })
    }
}

/// Runs a download job to completion.
pub(crate) async fn run(
    ctx: Arc<EngineContext>,
    job: Arc<TransferJob>,
    plan: DownloadPlan,
) -> Result<(), EngineError> {
    let file = ctx.sink.create(&plan.destination).await?;
    let seq = Sequencer::new(job.total_chunks(), OutputSink { file }).tracking(Arc::clone(&job));

    let mut result = fetch_all(&ctx, &job, &plan, &seq).await;
    if result.is_ok() && job.is_cancel_requested() {
        result = Err(EngineError::Cancelled);
    }

    let OutputSink { file } = seq.into_sink();
    if let Err(e) = result {
        if let Err(discard_err) = file.discard().await {
            warn!(
                download = %job.id(),
                error = %discard_err,
                "failed to remove partial download"
            );
        }
        return Err(e);
    }

    let path = file.finish().await?;
    info!(download = %job.id(), path = %path.display(), "download written");

    let entry = OfflineEntry {
        id: plan.descriptor.id.clone(),
        name: plan.descriptor.name.clone(),
        size: plan.descriptor.size,
        path,
        completed_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    };
    if let Err(e) = record_offline(ctx.storage.as_ref(), &entry).await {
        warn!(download = %job.id(), error = %e, "failed to record offline entry");
    }
    Ok(())
}

async fn fetch_all(
    ctx: &EngineContext,
    job: &TransferJob,
    plan: &DownloadPlan,
    seq: &Sequencer<OutputSink>,
) -> Result<(), EngineError> {
    let token = job.cancel_token();
    let cancel = &token;
    let max_attempts = ctx.config.download_max_attempts;

    let mut chunks = futures_util::stream::iter(0..job.total_chunks())
        .map(move |index| async move {
            let plaintext = fetch_plain(ctx, plan, index, max_attempts, cancel).await?;
            job.record_chunk(plaintext.len() as u64);
            seq.commit(index, plaintext).await?;
            Ok::<_, EngineError>(())
        })
        .buffer_unordered(ctx.config.commit_window);

    while let Some(result) = chunks.next().await {
        result?;
    }
    Ok(())
}

async fn fetch_plain(
    ctx: &EngineContext,
    plan: &DownloadPlan,
    index: u64,
    max_attempts: u32,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, EngineError> {
    let sealed = ctx
        .transport
        .fetch_chunk(&plan.descriptor, index, max_attempts, cancel)
        .await?;
    Ok(codec::decrypt(index, &plan.key, &sealed)?)
}

/// Fetches and opens the first chunk of a file in memory.
pub(crate) async fn preview(
    ctx: &EngineContext,
    descriptor: FileDescriptor,
    key: FileKey,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, EngineError> {
    if descriptor.size == 0 {
        return Ok(Vec::new());
    }
    let plan = DownloadPlan {
        descriptor,
        destination: PathBuf::new(),
        key,
    };
    let plaintext = fetch_plain(ctx, &plan, 0, ctx.config.preview_max_attempts, cancel).await?;
    debug!(file = %plan.descriptor.id, bytes = plaintext.len(), "preview fetched");
    Ok(plaintext)
}
