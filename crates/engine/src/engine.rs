//! The transfer engine: job admission, whole-file gating, lifecycle and
//! shutdown.

use std::any::Any;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use cirrus_protocol::{FileDescriptor, TransferDirection, TransferProgress};
use cirrus_transfer::{
    ChunkReader, DedupKey, FileKey, Gate, ProgressTracker, TerminalCallback, TransferJob,
    TransferOutcome, TransferRegistry, validate_file_name,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{ChunkTransport, KeyProvider, MetadataApi, UploadTarget};
use crate::config::EngineConfig;
use crate::download::{self, DownloadPlan};
use crate::error::EngineError;
use crate::events::{EventSink, TransferEvent};
use crate::sink::FileSink;
use crate::storage::DurableStorage;
use crate::transport::GatedTransport;
use crate::upload::{self, UploadPlan, UploadSource};

/// External collaborators the engine is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub api: Arc<dyn MetadataApi>,
    pub transport: Arc<dyn ChunkTransport>,
    pub keys: Arc<dyn KeyProvider>,
    pub storage: Arc<dyn DurableStorage>,
    pub sink: Arc<dyn FileSink>,
}

/// The four independent concurrency pools.
pub(crate) struct Gates {
    pub uploads: Arc<Gate>,
    pub upload_chunks: Arc<Gate>,
    pub downloads: Arc<Gate>,
    pub download_chunks: Arc<Gate>,
}

impl Gates {
    fn new(config: &EngineConfig) -> Self {
        Self {
            uploads: Arc::new(Gate::new("uploads", config.max_concurrent_uploads)),
            upload_chunks: Arc::new(Gate::new("upload-chunks", config.max_upload_chunk_requests)),
            downloads: Arc::new(Gate::new("downloads", config.max_concurrent_downloads)),
            download_chunks: Arc::new(Gate::new(
                "download-chunks",
                config.max_download_chunk_requests,
            )),
        }
    }

    fn purge_all(&self) {
        self.uploads.purge();
        self.upload_chunks.purge();
        self.downloads.purge();
        self.download_chunks.purge();
    }
}

/// State shared by the engine and every running job.
pub(crate) struct EngineContext {
    pub config: EngineConfig,
    pub api: Arc<dyn MetadataApi>,
    pub keys: Arc<dyn KeyProvider>,
    pub storage: Arc<dyn DurableStorage>,
    pub sink: Arc<dyn FileSink>,
    pub transport: GatedTransport,
    pub gates: Gates,
    pub registry: Arc<TransferRegistry>,
    pub events: EventSink,
    pub shutdown: CancellationToken,
}

impl EngineContext {
    /// Records the terminal outcome of `job`.
    ///
    /// The job settles first, so no progress is reported after its terminal
    /// event. It then leaves the registry before its terminal callbacks run.
    async fn finish(&self, job: &TransferJob, result: Result<(), EngineError>) {
        let outcome = match result {
            Ok(()) => TransferOutcome::Completed,
            Err(e) if e.is_cancelled() || job.is_cancel_requested() => TransferOutcome::Cancelled,
            Err(e) => TransferOutcome::Failed(e.to_string()),
        };

        job.settle(&outcome);
        self.registry.remove(job.id());

        let id = job.id().to_string();
        let name = job.name().to_string();
        let event = match &outcome {
            TransferOutcome::Completed => {
                info!(transfer = %id, name = %name, direction = %job.direction(), "transfer completed");
                TransferEvent::Completed { id, name }
            }
            TransferOutcome::Failed(reason) => {
                error!(transfer = %id, name = %name, error = %reason, "transfer failed");
                TransferEvent::Failed {
                    id,
                    name,
                    reason: reason.clone(),
                }
            }
            TransferOutcome::Cancelled => {
                info!(transfer = %id, name = %name, "transfer cancelled");
                TransferEvent::Cancelled { id, name }
            }
        };
        self.events.deliver(event).await;

        job.publish(outcome);
    }
}

/// Handle to one enqueued job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job: Arc<TransferJob>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        self.job.id()
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }

    pub fn direction(&self) -> TransferDirection {
        self.job.direction()
    }

    pub fn progress(&self) -> TransferProgress {
        self.job.progress()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.job.request_cancel();
    }

    /// Runs `callback` exactly once with the job's outcome.
    pub fn on_terminal(&self, callback: impl FnOnce(&TransferOutcome) + Send + 'static) {
        self.job.on_terminal(Box::new(callback) as TerminalCallback);
    }

    /// Waits for the job to end.
    pub async fn wait(&self) -> TransferOutcome {
        self.job.wait().await
    }
}

#[derive(Deserialize)]
struct ExistsReply {
    exists: bool,
}

/// Chunked encrypted transfer engine.
///
/// Must be created inside a tokio runtime; jobs and the progress ticker run
/// as tokio tasks.
pub struct TransferEngine {
    ctx: Arc<EngineContext>,
    tracker: ProgressTracker,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
}

impl TransferEngine {
    /// Builds an engine over `collaborators`.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self, EngineError> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        let events = EventSink::new(events_tx);
        let gates = Gates::new(&config);
        let transport = GatedTransport::new(
            collaborators.transport,
            Arc::clone(&gates.upload_chunks),
            Arc::clone(&gates.download_chunks),
            config.chunk_request_timeout(),
            config.retry_backoff(),
        );
        let registry = Arc::new(TransferRegistry::new());

        let tracker = ProgressTracker::new(Arc::clone(&registry), Some(config.progress_interval()));
        {
            let events = events.clone();
            tracker.on_progress(Box::new(move |p| events.emit(TransferEvent::Progress(p))));
        }
        tracker.start();

        let ctx = Arc::new(EngineContext {
            config,
            api: collaborators.api,
            keys: collaborators.keys,
            storage: collaborators.storage,
            sink: collaborators.sink,
            transport,
            gates,
            registry,
            events,
            shutdown: CancellationToken::new(),
        });

        Ok(Self {
            ctx,
            tracker,
            events_rx: Some(events_rx),
        })
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Once taken, terminal events wait for buffer space instead of being
    /// dropped, so the receiver must be drained.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        let rx = self.events_rx.take();
        if rx.is_some() {
            self.ctx.events.subscribe();
        }
        rx
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Queues an upload of `source` into folder `parent`.
    ///
    /// Rejected up front if the name exists in `parent` or the same name is
    /// already uploading there.
    pub async fn enqueue_upload(
        &self,
        source: UploadSource,
        parent: &str,
    ) -> Result<JobHandle, EngineError> {
        self.ensure_running()?;
        validate_file_name(&source.name)?;

        let reader = ChunkReader::open(&source.path, self.ctx.config.upload_chunk_size).await?;
        self.check_collision(parent, &source.name).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let key = self.ctx.keys.file_key(&source.name)?;
        let job = Arc::new(TransferJob::new(
            id.clone(),
            source.name.clone(),
            TransferDirection::Upload,
            reader.file_size(),
            reader.chunk_size(),
        ));
        self.admit(
            &job,
            DedupKey::Upload {
                parent: parent.to_string(),
                name: source.name.clone(),
            },
        )?;

        let plan = UploadPlan {
            reader,
            target: UploadTarget {
                id,
                parent: parent.to_string(),
                name: source.name,
            },
            key,
        };
        let work = upload::run(Arc::clone(&self.ctx), Arc::clone(&job), plan);
        self.spawn_job(Arc::clone(&job), Arc::clone(&self.ctx.gates.uploads), work);

        Ok(JobHandle { job })
    }

    /// Queues a download of `descriptor` into `destination`.
    ///
    /// Rejected with [`EngineError::AlreadyDownloading`] while another
    /// download of the same file name is active.
    pub fn enqueue_download(
        &self,
        descriptor: FileDescriptor,
        destination: impl Into<PathBuf>,
    ) -> Result<JobHandle, EngineError> {
        self.ensure_running()?;
        validate_file_name(&descriptor.name)?;
        let key = parse_key(&descriptor)?;
        if descriptor.chunk_size == 0 && descriptor.size > 0 {
            return Err(EngineError::Api(format!(
                "descriptor for {} declares a zero chunk size",
                descriptor.id
            )));
        }

        let job = Arc::new(TransferJob::new(
            descriptor.id.clone(),
            descriptor.name.clone(),
            TransferDirection::Download,
            descriptor.size,
            descriptor.chunk_size,
        ));
        self.admit(&job, DedupKey::DownloadName(descriptor.name.clone()))?;

        let plan = DownloadPlan {
            descriptor,
            destination: destination.into(),
            key,
        };
        let work = download::run(Arc::clone(&self.ctx), Arc::clone(&job), plan);
        self.spawn_job(Arc::clone(&job), Arc::clone(&self.ctx.gates.downloads), work);

        Ok(JobHandle { job })
    }

    /// Resolves `file_id` through the metadata API, then queues its download.
    pub async fn enqueue_download_by_id(
        &self,
        file_id: &str,
        destination: impl Into<PathBuf>,
    ) -> Result<JobHandle, EngineError> {
        let descriptor = self.resolve(file_id).await?;
        self.enqueue_download(descriptor, destination)
    }

    /// Fetches the first chunk of a file in memory (thumbnails, previews).
    ///
    /// Not a job: it is not registered and cannot be cancelled by id, but
    /// it does share the download chunk gate.
    pub async fn fetch_preview(&self, descriptor: FileDescriptor) -> Result<Vec<u8>, EngineError> {
        self.ensure_running()?;
        let key = parse_key(&descriptor)?;
        download::preview(&self.ctx, descriptor, key, &self.ctx.shutdown).await
    }

    /// Looks up a file descriptor by id.
    pub async fn resolve(&self, file_id: &str) -> Result<FileDescriptor, EngineError> {
        let resp = self.ctx.api.download_descriptor(file_id).await?;
        if !resp.status {
            return Err(EngineError::Api(resp.message_or_default().to_string()));
        }
        resp.parse_data::<FileDescriptor>()?
            .ok_or_else(|| EngineError::Api(format!("empty descriptor for {file_id}")))
    }

    /// Requests cancellation of job `id`. Returns `false` if no such job is
    /// active.
    pub fn cancel(&self, id: &str) -> bool {
        match self.ctx.registry.get(id) {
            Some(job) => {
                info!(transfer = %id, "cancel requested");
                job.request_cancel();
                true
            }
            None => false,
        }
    }

    /// Progress of an active job.
    pub fn progress(&self, id: &str) -> Option<TransferProgress> {
        self.ctx.registry.get(id).map(|job| job.progress())
    }

    /// Progress of every active job.
    pub fn active(&self) -> Vec<TransferProgress> {
        self.ctx
            .registry
            .jobs()
            .iter()
            .map(|job| job.progress())
            .collect()
    }

    /// Cancels every job, purges all gates and waits until every job has
    /// left the registry.
    pub async fn shutdown(&self) {
        self.ctx.shutdown.cancel();
        let cancelled = self.ctx.registry.cancel_all();
        info!(cancelled, "shutting down transfer engine");

        self.ctx.gates.purge_all();
        self.ctx.registry.drained().await;
        self.tracker.stop();

        let stale = self.ctx.registry.assert_idle();
        debug_assert!(stale.is_empty(), "stale transfers after shutdown: {stale:?}");
        info!("transfer engine stopped");
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.ctx.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        Ok(())
    }

    async fn check_collision(&self, parent: &str, name: &str) -> Result<(), EngineError> {
        let resp = self.ctx.api.exists(parent, name).await?;
        if !resp.status {
            return Err(EngineError::Api(resp.message_or_default().to_string()));
        }
        let reply: Option<ExistsReply> = resp.parse_data()?;
        if reply.is_some_and(|r| r.exists) {
            return Err(EngineError::NameCollision {
                parent: parent.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn admit(&self, job: &Arc<TransferJob>, key: DedupKey) -> Result<(), EngineError> {
        if let Err(e) = self.ctx.registry.insert(Arc::clone(job), Some(key)) {
            warn!(transfer = %job.id(), name = %job.name(), error = %e, "transfer rejected");
            return Err(e.into());
        }
        // Lost a race with shutdown; the job still runs its normal exit path.
        if self.ctx.shutdown.is_cancelled() {
            job.request_cancel();
        }

        info!(
            transfer = %job.id(),
            name = %job.name(),
            direction = %job.direction(),
            bytes = job.bytes_total(),
            chunks = job.total_chunks(),
            "transfer queued"
        );
        self.ctx.events.emit(TransferEvent::Queued {
            id: job.id().to_string(),
            name: job.name().to_string(),
            direction: job.direction(),
        });
        Ok(())
    }

    fn spawn_job<F>(&self, job: Arc<TransferJob>, gate: Arc<Gate>, work: F)
    where
        F: Future<Output = Result<(), EngineError>> + Send + 'static,
    {
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            // The work runs in its own task so a panic still ends the job.
            let worker = {
                let ctx = Arc::clone(&ctx);
                let job = Arc::clone(&job);
                tokio::spawn(async move { run_gated(&ctx, &job, &gate, work).await })
            };
            let result = match worker.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    let reason = panic_message(e.into_panic());
                    error!(transfer = %job.id(), panic = %reason, "transfer task panicked");
                    Err(EngineError::Panicked(reason))
                }
                Err(_) => Err(EngineError::Cancelled),
            };
            ctx.finish(&job, result).await;
        });
    }
}

/// Holds a whole-file slot of `gate` while `work` runs.
async fn run_gated<F>(
    ctx: &EngineContext,
    job: &TransferJob,
    gate: &Gate,
    work: F,
) -> Result<(), EngineError>
where
    F: Future<Output = Result<(), EngineError>>,
{
    let cancel = job.cancel_token();
    let _slot = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        slot = gate.acquire() => slot?,
    };
    if !job.start() {
        return Err(EngineError::Cancelled);
    }

    debug!(transfer = %job.id(), gate = gate.name(), in_use = gate.in_use(), "whole-file slot acquired");
    ctx.events.emit(TransferEvent::Started {
        id: job.id().to_string(),
        name: job.name().to_string(),
    });
    work.await
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".into()
    }
}

fn parse_key(descriptor: &FileDescriptor) -> Result<FileKey, EngineError> {
    FileKey::from_hex(&descriptor.key)
        .map_err(|e| EngineError::Key(format!("file {}: {e}", descriptor.id)))
}
