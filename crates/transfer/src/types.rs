use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use cirrus_protocol::types::percentage;
use cirrus_protocol::{TransferDirection, TransferProgress, TransferState};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::chunked::chunk_count;
use crate::progress::SpeedCalculator;

/// How a transfer job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    /// Failed with a short human-readable reason.
    Failed(String),
    /// Stopped on request; not an error.
    Cancelled,
}

impl TransferOutcome {
    /// The terminal state this outcome puts a job in.
    pub fn state(&self) -> TransferState {
        match self {
            Self::Completed => TransferState::Completed,
            Self::Failed(_) => TransferState::Failed,
            Self::Cancelled => TransferState::Cancelled,
        }
    }
}

/// Callback fired once when a job reaches a terminal state.
pub type TerminalCallback = Box<dyn FnOnce(&TransferOutcome) + Send>;

/// One whole-file upload or download (thread-safe).
///
/// Progress counters are only ever mutated under the job's lock, so chunk
/// workers finishing at the same time cannot lose updates.
pub struct TransferJob {
    id: String,
    name: String,
    direction: TransferDirection,
    chunk_size: u64,
    bytes_total: u64,
    total_chunks: u64,
    cancel: CancellationToken,
    speed: SpeedCalculator,
    outcome: watch::Sender<Option<TransferOutcome>>,
    inner: Mutex<JobInner>,
}

struct JobInner {
    state: TransferState,
    bytes_transferred: u64,
    chunks_completed: u64,
    next_sequence_index: u64,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    callbacks: Vec<TerminalCallback>,
    /// Set once terminal callbacks have been handed the outcome.
    published: Option<TransferOutcome>,
}

impl TransferJob {
    /// Creates a queued job for a file of `bytes_total` bytes.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        direction: TransferDirection,
        bytes_total: u64,
        chunk_size: u64,
    ) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            id: id.into(),
            name: name.into(),
            direction,
            chunk_size,
            bytes_total,
            total_chunks: chunk_count(bytes_total, chunk_size, direction),
            cancel: CancellationToken::new(),
            speed: SpeedCalculator::new(None, None),
            outcome,
            inner: Mutex::new(JobInner {
                state: TransferState::Queued,
                bytes_transferred: 0,
                chunks_completed: 0,
                next_sequence_index: 0,
                started_at: None,
                finished_at: None,
                callbacks: Vec::new(),
                published: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves `Queued` to `Running`. Returns `false` from any other state.
    pub fn start(&self) -> bool {
        let mut s = self.lock();
        if s.state != TransferState::Queued {
            return false;
        }
        s.state = TransferState::Running;
        s.started_at = Some(Instant::now());
        true
    }

    /// Records one chunk whose transport and codec step finished.
    ///
    /// `bytes_transferred` never decreases and never exceeds `bytes_total`.
    pub fn record_chunk(&self, bytes: u64) {
        let mut s = self.lock();
        if s.state.is_terminal() {
            return;
        }
        s.bytes_transferred = s.bytes_transferred.saturating_add(bytes).min(self.bytes_total);
        s.chunks_completed = (s.chunks_completed + 1).min(self.total_chunks);
        drop(s);
        self.speed.add_sample(bytes);
    }

    /// Advances the commit cursor by one chunk.
    pub fn advance_sequence(&self) {
        let mut s = self.lock();
        s.next_sequence_index = (s.next_sequence_index + 1).min(self.total_chunks);
    }

    /// Flags the job for cancellation. Workers observe it at their next
    /// dispatch boundary (and in-flight requests are raced against it).
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The job's cancellation token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Moves the job into its terminal state and fires terminal callbacks.
    ///
    /// Returns `false` (and does nothing) if the job already ended; a job is
    /// never resurrected.
    pub fn finish(&self, outcome: TransferOutcome) -> bool {
        if !self.settle(&outcome) {
            return false;
        }
        self.publish(outcome);
        true
    }

    /// Moves the job into the terminal state of `outcome` without running
    /// callbacks or waking waiters. Returns `false` if the job already ended.
    ///
    /// Once settled, [`report_running`](Self::report_running) reports nothing.
    pub fn settle(&self, outcome: &TransferOutcome) -> bool {
        let mut s = self.lock();
        if s.state.is_terminal() {
            return false;
        }
        s.state = outcome.state();
        s.finished_at = Some(Instant::now());
        if *outcome == TransferOutcome::Completed {
            s.bytes_transferred = self.bytes_total;
            s.chunks_completed = self.total_chunks;
        }
        true
    }

    /// Fires terminal callbacks and wakes waiters. Only the first call has
    /// any effect.
    pub fn publish(&self, outcome: TransferOutcome) {
        let callbacks = {
            let mut s = self.lock();
            if s.published.is_some() {
                return;
            }
            s.published = Some(outcome.clone());
            std::mem::take(&mut s.callbacks)
        };

        for cb in callbacks {
            cb(&outcome);
        }
        self.outcome.send_replace(Some(outcome));
    }

    /// Registers `callback` to run once with the terminal outcome.
    ///
    /// Runs immediately if the outcome was already published.
    pub fn on_terminal(&self, callback: TerminalCallback) {
        let published = {
            let mut s = self.lock();
            match &s.published {
                Some(outcome) => outcome.clone(),
                None => {
                    s.callbacks.push(callback);
                    return;
                }
            }
        };
        callback(&published);
    }

    /// Waits for the job to end.
    pub async fn wait(&self) -> TransferOutcome {
        let mut rx = self.outcome.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(TransferOutcome::Cancelled),
            // The sender lives as long as `self`.
            Err(_) => TransferOutcome::Cancelled,
        }
    }

    /// The outcome, once terminal.
    pub fn outcome(&self) -> Option<TransferOutcome> {
        self.outcome.borrow().clone()
    }

    /// Progress snapshot.
    pub fn progress(&self) -> TransferProgress {
        self.snapshot(&self.lock())
    }

    /// Hands a progress snapshot to `report` if the job is running.
    ///
    /// `report` runs under the job's lock, so it can never observe the job
    /// after [`settle`](Self::settle). It must not call back into the job.
    pub fn report_running(&self, report: impl FnOnce(TransferProgress)) -> bool {
        let s = self.lock();
        if s.state != TransferState::Running {
            return false;
        }
        report(self.snapshot(&s));
        true
    }

    fn snapshot(&self, s: &JobInner) -> TransferProgress {
        let remaining = self.bytes_total - s.bytes_transferred;
        let running = s.state == TransferState::Running;
        TransferProgress {
            id: self.id.clone(),
            name: self.name.clone(),
            direction: self.direction,
            state: s.state,
            bytes_transferred: s.bytes_transferred,
            bytes_total: self.bytes_total,
            chunks_completed: s.chunks_completed,
            total_chunks: self.total_chunks,
            percentage: percentage(
                s.bytes_transferred,
                self.bytes_total,
                s.chunks_completed,
                self.total_chunks,
            ),
            bytes_per_second: if running {
                self.speed.bytes_per_second()
            } else {
                0.0
            },
            eta_secs: if running {
                self.speed.eta(remaining).map(|d| d.as_secs_f64())
            } else {
                None
            },
        }
    }

    /// Returns `true` while the job is queued or running.
    pub fn is_active(&self) -> bool {
        !self.lock().state.is_terminal()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn state(&self) -> TransferState {
        self.lock().state
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.lock().bytes_transferred
    }

    pub fn chunks_completed(&self) -> u64 {
        self.lock().chunks_completed
    }

    pub fn next_sequence_index(&self) -> u64 {
        self.lock().next_sequence_index
    }

    /// Time spent running, if the job started.
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        let s = self.lock();
        let started = s.started_at?;
        Some(s.finished_at.unwrap_or_else(Instant::now) - started)
    }
}

impl std::fmt::Debug for TransferJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferJob")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("state", &self.state())
            .finish()
    }
}
