//! Process-wide table of live transfer jobs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::types::TransferJob;

/// Secondary key a job is deduplicated on besides its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Downloads collide on file name.
    DownloadName(String),
    /// Uploads collide on destination folder plus name.
    Upload { parent: String, name: String },
}

/// Registry rejections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("transfer {0} is already registered")]
    DuplicateId(String),

    #[error("already downloading {0}")]
    AlreadyDownloading(String),

    #[error("already uploading {name} into {parent}")]
    AlreadyUploading { parent: String, name: String },
}

struct Entry {
    job: Arc<TransferJob>,
    key: Option<DedupKey>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, Entry>,
    keys: HashMap<DedupKey, String>,
}

/// Jobs by id plus the dedup index, behind one lock.
pub struct TransferRegistry {
    inner: Mutex<Inner>,
    live: watch::Sender<usize>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        let (live, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner::default()),
            live,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `job`, rejecting it if its id or dedup key is taken.
    pub fn insert(&self, job: Arc<TransferJob>, key: Option<DedupKey>) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        let id = job.id().to_string();

        if inner.jobs.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        if let Some(key) = &key
            && inner.keys.contains_key(key)
        {
            return Err(match key.clone() {
                DedupKey::DownloadName(name) => RegistryError::AlreadyDownloading(name),
                DedupKey::Upload { parent, name } => {
                    RegistryError::AlreadyUploading { parent, name }
                }
            });
        }

        if let Some(key) = &key {
            inner.keys.insert(key.clone(), id.clone());
        }
        inner.jobs.insert(id.clone(), Entry { job, key });
        let live = inner.jobs.len();
        drop(inner);

        self.live.send_replace(live);
        debug!(transfer = %id, live, "transfer registered");
        Ok(())
    }

    /// Removes the job registered under `id`.
    pub fn remove(&self, id: &str) -> Option<Arc<TransferJob>> {
        let mut inner = self.lock();
        let entry = inner.jobs.remove(id)?;
        if let Some(key) = &entry.key {
            inner.keys.remove(key);
        }
        let live = inner.jobs.len();
        drop(inner);

        self.live.send_replace(live);
        debug!(transfer = %id, live, "transfer unregistered");
        Some(entry.job)
    }

    /// Looks up a job by id.
    pub fn get(&self, id: &str) -> Option<Arc<TransferJob>> {
        self.lock().jobs.get(id).map(|e| Arc::clone(&e.job))
    }

    /// Whether a job holds `key`.
    pub fn holds(&self, key: &DedupKey) -> bool {
        self.lock().keys.contains_key(key)
    }

    /// Snapshot of every registered job.
    pub fn jobs(&self) -> Vec<Arc<TransferJob>> {
        self.lock().jobs.values().map(|e| Arc::clone(&e.job)).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests cancellation of every registered job. Returns how many.
    pub fn cancel_all(&self) -> usize {
        let jobs = self.jobs();
        for job in &jobs {
            job.request_cancel();
        }
        jobs.len()
    }

    /// Waits until no job is registered.
    pub async fn drained(&self) {
        let mut rx = self.live.subscribe();
        // The sender is owned by `self`, so the channel cannot close here.
        let _ = rx.wait_for(|live| *live == 0).await;
    }

    /// Logs and returns the ids of entries left behind.
    pub fn assert_idle(&self) -> Vec<String> {
        let stale: Vec<String> = self.lock().jobs.keys().cloned().collect();
        for id in &stale {
            warn!(transfer = %id, "stale registry entry");
        }
        stale
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}
