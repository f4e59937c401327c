use std::time::Duration;

/// Plaintext chunk size for uploads (1 MiB).
///
/// Downloads use the chunk size declared by the server in the
/// [`FileDescriptor`](crate::FileDescriptor).
pub const UPLOAD_CHUNK_SIZE: u64 = 1024 * 1024;

/// Whole-file uploads allowed to run at once.
pub const MAX_CONCURRENT_UPLOADS: usize = 3;

/// Upload chunk requests in flight across all uploads.
pub const MAX_UPLOAD_CHUNK_REQUESTS: usize = 5;

/// Whole-file downloads allowed to run at once.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 5;

/// Download chunk requests in flight across all downloads.
pub const MAX_DOWNLOAD_CHUNK_REQUESTS: usize = 30;

/// Attempts per upload chunk before the job fails.
pub const UPLOAD_MAX_ATTEMPTS: u32 = 10;

/// Attempts per download chunk before the job fails.
pub const DOWNLOAD_MAX_ATTEMPTS: u32 = 32;

/// Attempts for a preview (first chunk, in memory) fetch.
pub const PREVIEW_MAX_ATTEMPTS: u32 = 16;

/// Fixed delay between two attempts of the same chunk.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(1000);

/// Timeout for a single chunk request.
///
/// Independent of and much longer than [`RETRY_BACKOFF`]; an expired request
/// counts as one failed attempt.
pub const CHUNK_REQUEST_TIMEOUT: Duration = Duration::from_millis(3_600_000);

/// Interval between periodic progress notifications.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Chunk tasks a single job may have outstanding (fetched or pushed but not
/// yet committed).
pub const COMMIT_WINDOW: usize = 64;
