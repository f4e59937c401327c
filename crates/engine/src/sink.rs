//! Filesystem sink for download output.

use std::path::{Path, PathBuf};

use cirrus_transfer::{ChunkWriter, TransferError};

use crate::api::BoxFuture;

/// Creates output files for downloads.
pub trait FileSink: Send + Sync {
    /// Opens a fresh, empty output for `destination`.
    fn create<'a>(
        &'a self,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<Box<dyn ChunkFile>, TransferError>>;
}

/// Append-only output of one download.
pub trait ChunkFile: Send {
    /// Appends `data` after everything written so far.
    fn append<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<(), TransferError>>;

    /// Makes the output visible at its destination.
    fn finish(self: Box<Self>) -> BoxFuture<'static, Result<PathBuf, TransferError>>;

    /// Deletes everything written.
    fn discard(self: Box<Self>) -> BoxFuture<'static, Result<(), TransferError>>;
}

/// [`FileSink`] on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSink;

impl FileSink for LocalFileSink {
    fn create<'a>(
        &'a self,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<Box<dyn ChunkFile>, TransferError>> {
        Box::pin(async move {
            let writer = ChunkWriter::create(destination).await?;
            Ok(Box::new(writer) as Box<dyn ChunkFile>)
        })
    }
}

impl ChunkFile for ChunkWriter {
    fn append<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<(), TransferError>> {
        Box::pin(ChunkWriter::append(self, data))
    }

    fn finish(self: Box<Self>) -> BoxFuture<'static, Result<PathBuf, TransferError>> {
        Box::pin(ChunkWriter::finish(*self))
    }

    fn discard(self: Box<Self>) -> BoxFuture<'static, Result<(), TransferError>> {
        Box::pin(ChunkWriter::discard(*self))
    }
}
