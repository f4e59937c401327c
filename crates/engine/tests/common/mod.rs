//! Mock collaborators shared by the engine integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cirrus_engine::{
    BoxFuture, ChunkTransport, Collaborators, EngineConfig, EngineError, FileKey, KeyProvider,
    LocalFileSink, MemoryStorage, MetadataApi, TransferEngine, TransportError, UploadTarget,
};
use cirrus_protocol::{ApiResponse, FileDescriptor, FileMetadata, UploadCompletion};
use cirrus_transfer::codec;

pub const KEY: [u8; 32] = [7u8; 32];

pub fn key() -> FileKey {
    FileKey::from_bytes(KEY)
}

/// Config with a short backoff so retry tests finish quickly.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        retry_backoff_ms: 1,
        progress_interval_ms: 20,
        ..EngineConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// How the mock transport misbehaves.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub fail_downloads: bool,
    pub fail_uploads: bool,
    /// Download requests for this index and above never answer.
    pub hang_downloads_from: Option<u64>,
    pub hang_uploads: bool,
    /// Serve well-sized bytes that fail authentication.
    pub garbage: bool,
    pub delay: Option<Duration>,
}

/// In-memory chunk server.
#[derive(Default)]
pub struct MockTransport {
    chunks: Mutex<HashMap<(String, u64), Vec<u8>>>,
    pub behavior: Mutex<Behavior>,
    pub download_calls: Mutex<Vec<(String, u64)>>,
    pub upload_calls: Mutex<Vec<(String, u64)>>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Stores `data` as the sealed chunks of file `id`.
    pub fn seed(&self, id: &str, data: &[u8], chunk_size: usize) {
        let mut chunks = self.chunks.lock().unwrap();
        for (index, chunk) in data.chunks(chunk_size).enumerate() {
            let sealed = codec::encrypt(index as u64, &key(), chunk).unwrap();
            chunks.insert((id.to_string(), index as u64), sealed);
        }
    }

    /// Sealed chunks stored for `id`, in index order.
    pub fn stored(&self, id: &str) -> Vec<Vec<u8>> {
        let chunks = self.chunks.lock().unwrap();
        let mut indices: Vec<u64> = chunks
            .keys()
            .filter(|(file, _)| file == id)
            .map(|(_, i)| *i)
            .collect();
        indices.sort();
        indices
            .into_iter()
            .map(|i| chunks[&(id.to_string(), i)].clone())
            .collect()
    }

    pub fn download_calls_for(&self, id: &str) -> usize {
        self.download_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(file, _)| file == id)
            .count()
    }

    pub fn upload_call_count(&self) -> usize {
        self.upload_calls.lock().unwrap().len()
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }
}

impl ChunkTransport for MockTransport {
    fn download_chunk<'a>(
        &'a self,
        file: &'a FileDescriptor,
        index: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransportError>> {
        Box::pin(async move {
            self.download_calls
                .lock()
                .unwrap()
                .push((file.id.clone(), index));
            let _guard = self.enter();
            let behavior = self.behavior.lock().unwrap().clone();

            if let Some(delay) = behavior.delay {
                tokio::time::sleep(delay).await;
            }
            if behavior.hang_downloads_from.is_some_and(|from| index >= from) {
                std::future::pending::<()>().await;
            }
            if behavior.fail_downloads {
                return Err(TransportError::Network("connection reset".into()));
            }
            if behavior.garbage {
                return Ok(vec![0xAB; 64]);
            }
            self.chunks
                .lock()
                .unwrap()
                .get(&(file.id.clone(), index))
                .cloned()
                .ok_or_else(|| TransportError::Malformed(format!("no chunk {index}")))
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        target: &'a UploadTarget,
        index: u64,
        sealed: &'a [u8],
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            self.upload_calls
                .lock()
                .unwrap()
                .push((target.id.clone(), index));
            let _guard = self.enter();
            let behavior = self.behavior.lock().unwrap().clone();

            if let Some(delay) = behavior.delay {
                tokio::time::sleep(delay).await;
            }
            if behavior.hang_uploads {
                std::future::pending::<()>().await;
            }
            if behavior.fail_uploads {
                return Err(TransportError::Network("connection refused".into()));
            }
            self.chunks
                .lock()
                .unwrap()
                .insert((target.id.clone(), index), sealed.to_vec());
            Ok(ApiResponse::ok())
        })
    }
}

// ---------------------------------------------------------------------------
// Metadata API
// ---------------------------------------------------------------------------

/// In-memory metadata API that records finalize calls.
pub struct MockApi {
    transport: Arc<MockTransport>,
    pub existing: Mutex<HashSet<(String, String)>>,
    pub descriptors: Mutex<HashMap<String, FileDescriptor>>,
    pub completions: Mutex<Vec<UploadCompletion>>,
    /// Upload requests the transport had seen when each finalize arrived.
    pub uploads_at_finalize: Mutex<Vec<usize>>,
    pub exists_calls: AtomicUsize,
}

impl MockApi {
    pub fn new(transport: Arc<MockTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            existing: Mutex::new(HashSet::new()),
            descriptors: Mutex::new(HashMap::new()),
            completions: Mutex::new(Vec::new()),
            uploads_at_finalize: Mutex::new(Vec::new()),
            exists_calls: AtomicUsize::new(0),
        })
    }

    pub fn add_existing(&self, parent: &str, name: &str) {
        self.existing
            .lock()
            .unwrap()
            .insert((parent.to_string(), name.to_string()));
    }

    pub fn add_descriptor(&self, descriptor: FileDescriptor) {
        self.descriptors
            .lock()
            .unwrap()
            .insert(descriptor.id.clone(), descriptor);
    }
}

impl MetadataApi for MockApi {
    fn exists<'a>(
        &'a self,
        parent: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            self.exists_calls.fetch_add(1, Ordering::SeqCst);
            let exists = self
                .existing
                .lock()
                .unwrap()
                .contains(&(parent.to_string(), name.to_string()));
            ApiResponse::with_data(&serde_json::json!({ "exists": exists }))
                .map_err(|e| TransportError::Malformed(e.to_string()))
        })
    }

    fn mark_upload_done<'a>(
        &'a self,
        completion: &'a UploadCompletion,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            self.uploads_at_finalize
                .lock()
                .unwrap()
                .push(self.transport.upload_call_count());
            self.completions.lock().unwrap().push(completion.clone());
            Ok(ApiResponse::ok())
        })
    }

    fn download_descriptor<'a>(
        &'a self,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            match self.descriptors.lock().unwrap().get(file_id) {
                Some(desc) => ApiResponse::with_data(desc)
                    .map_err(|e| TransportError::Malformed(e.to_string())),
                None => Ok(ApiResponse::error("file not found")),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

pub struct FixedKeys;

impl KeyProvider for FixedKeys {
    fn file_key(&self, _name: &str) -> Result<FileKey, EngineError> {
        Ok(key())
    }

    fn seal_metadata(&self, metadata: &FileMetadata) -> Result<String, EngineError> {
        Ok(serde_json::to_string(metadata)?)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: TransferEngine,
    pub api: Arc<MockApi>,
    pub transport: Arc<MockTransport>,
    pub storage: Arc<MemoryStorage>,
}

pub fn harness(config: EngineConfig) -> Harness {
    let transport = MockTransport::new();
    let api = MockApi::new(Arc::clone(&transport));
    let storage = Arc::new(MemoryStorage::new());
    let engine = TransferEngine::new(
        config,
        Collaborators {
            api: api.clone(),
            transport: transport.clone(),
            keys: Arc::new(FixedKeys),
            storage: storage.clone(),
            sink: Arc::new(LocalFileSink),
        },
    )
    .unwrap();
    Harness {
        engine,
        api,
        transport,
        storage,
    }
}

pub fn descriptor(id: &str, name: &str, size: u64, chunk_size: u64) -> FileDescriptor {
    FileDescriptor {
        id: id.into(),
        name: name.into(),
        size,
        chunk_size,
        key: key().to_hex(),
        parent: String::new(),
    }
}

/// Deterministic test content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Polls `check` until it holds, failing the test after five seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..1000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 5s");
}
