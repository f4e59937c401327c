//! Notifications emitted by the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cirrus_protocol::{TransferDirection, TransferProgress};
use tokio::sync::mpsc;
use tracing::trace;

/// Lifecycle and progress notifications for every job.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// Accepted and waiting for a whole-file slot.
    Queued {
        id: String,
        name: String,
        direction: TransferDirection,
    },
    /// Holds its whole-file slot; chunks are moving.
    Started { id: String, name: String },
    /// Periodic progress update.
    Progress(TransferProgress),
    Completed { id: String, name: String },
    Failed {
        id: String,
        name: String,
        reason: String,
    },
    Cancelled { id: String, name: String },
}

impl TransferEvent {
    /// Id of the job the event is about.
    pub fn id(&self) -> &str {
        match self {
            Self::Queued { id, .. }
            | Self::Started { id, .. }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. }
            | Self::Cancelled { id, .. } => id,
            Self::Progress(p) => &p.id,
        }
    }

    /// Whether this is a terminal notification.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// Event emitter shared by the engine and its jobs.
///
/// Lifecycle events never block: they are dropped when the buffer is full.
/// Progress events are also dropped once the buffer is down to its reserve,
/// leaving room for lifecycle events. Terminal events are never dropped
/// while someone holds the receiver; [`deliver`](Self::deliver) waits for
/// buffer space.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<TransferEvent>,
    subscribed: Arc<AtomicBool>,
    reserve: usize,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<TransferEvent>) -> Self {
        let reserve = tx.max_capacity() / 4;
        Self {
            tx,
            subscribed: Arc::new(AtomicBool::new(false)),
            reserve,
        }
    }

    /// Marks the receiver as taken by a consumer.
    pub(crate) fn subscribe(&self) {
        self.subscribed.store(true, Ordering::Release);
    }

    pub(crate) fn emit(&self, event: TransferEvent) {
        if matches!(event, TransferEvent::Progress(_)) && self.tx.capacity() <= self.reserve {
            trace!(transfer = %event.id(), "progress event skipped, buffer low");
            return;
        }
        if let Err(e) = self.tx.try_send(event) {
            trace!(error = %e, "transfer event dropped");
        }
    }

    /// Sends a terminal event, waiting for buffer space when a consumer
    /// holds the receiver.
    pub(crate) async fn deliver(&self, event: TransferEvent) {
        if !self.subscribed.load(Ordering::Acquire) {
            self.emit(event);
            return;
        }
        if self.tx.send(event).await.is_err() {
            trace!("event receiver dropped");
        }
    }
}
