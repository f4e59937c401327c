//! In-order commit of out-of-order chunk results.
//!
//! Chunk workers finish in whatever order the network allows, but the
//! output they feed (an append-only file, an ordered acknowledgment ledger)
//! must see chunks in ascending index order. [`Sequencer::commit`] parks a
//! caller on a watch channel until every lower index has been committed, then
//! runs the side effect for its own chunk.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::trace;

use crate::TransferError;
use crate::types::TransferJob;

/// The ordered side effect behind a [`Sequencer`].
pub trait CommitSink: Send {
    /// Data handed over with each chunk.
    type Payload: Send;

    /// Performs the side effect for chunk `index`. Called exactly once per
    /// index, in ascending order.
    fn commit(
        &mut self,
        index: u64,
        payload: Self::Payload,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + '_>>;
}

/// Sequencer failures.
#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    #[error("chunk {index} is out of range ({total} chunks)")]
    OutOfRange { index: u64, total: u64 },

    #[error("chunk {index} was already committed")]
    AlreadyCommitted { index: u64 },

    #[error("sequencer stopped after an earlier commit failed")]
    Poisoned,

    #[error("commit of chunk {index} failed: {source}")]
    Sink {
        index: u64,
        #[source]
        source: TransferError,
    },
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    next: u64,
    poisoned: bool,
}

/// Commits chunk payloads strictly in ascending index order.
pub struct Sequencer<S: CommitSink> {
    total: u64,
    sink: Mutex<S>,
    cursor: watch::Sender<Cursor>,
    job: Option<Arc<TransferJob>>,
}

impl<S: CommitSink> Sequencer<S> {
    /// Creates a sequencer for chunks `0..total`.
    pub fn new(total: u64, sink: S) -> Self {
        let (cursor, _) = watch::channel(Cursor {
            next: 0,
            poisoned: false,
        });
        Self {
            total,
            sink: Mutex::new(sink),
            cursor,
            job: None,
        }
    }

    /// Mirrors the commit cursor into `job` as chunks commit.
    pub fn tracking(mut self, job: Arc<TransferJob>) -> Self {
        self.job = Some(job);
        self
    }

    /// Hands `payload` over for chunk `index`.
    ///
    /// Returns once the side effect for `index` has run, which happens only
    /// after every lower index has been committed.
    pub async fn commit(&self, index: u64, payload: S::Payload) -> Result<(), SequencerError> {
        if index >= self.total {
            return Err(SequencerError::OutOfRange {
                index,
                total: self.total,
            });
        }

        let mut rx = self.cursor.subscribe();
        let cursor = {
            let seen = rx
                .wait_for(|c| c.poisoned || c.next >= index)
                .await
                .map_err(|_| SequencerError::Poisoned)?;
            *seen
        };
        if cursor.poisoned {
            return Err(SequencerError::Poisoned);
        }
        if cursor.next > index {
            return Err(SequencerError::AlreadyCommitted { index });
        }

        let mut sink = self.sink.lock().await;
        // A duplicate commit of the same index may have won the lock first.
        if self.cursor.borrow().next != index {
            return Err(SequencerError::AlreadyCommitted { index });
        }

        match sink.commit(index, payload).await {
            Ok(()) => {
                if let Some(job) = &self.job {
                    job.advance_sequence();
                }
                self.cursor.send_modify(|c| c.next += 1);
                trace!(index, "chunk committed");
                Ok(())
            }
            Err(source) => {
                self.cursor.send_modify(|c| c.poisoned = true);
                Err(SequencerError::Sink { index, source })
            }
        }
    }

    /// Next index eligible to commit.
    pub fn next_index(&self) -> u64 {
        self.cursor.borrow().next
    }

    /// Whether all `total` chunks have committed.
    pub fn is_complete(&self) -> bool {
        self.next_index() == self.total
    }

    /// Number of chunks this sequencer expects.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Returns the sink once no commit is outstanding.
    pub fn into_sink(self) -> S {
        self.sink.into_inner()
    }
}
