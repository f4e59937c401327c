use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use cirrus_protocol::TransferDirection;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::TransferError;

/// Suffix of the temporary file a download writes into.
const PART_SUFFIX: &str = "part";

// ---------------------------------------------------------------------------
// Chunk arithmetic
// ---------------------------------------------------------------------------

/// Number of chunks a file of `size` bytes is split into.
///
/// An empty file still uploads as one (empty) chunk; an empty download has
/// nothing to fetch.
pub fn chunk_count(size: u64, chunk_size: u64, direction: TransferDirection) -> u64 {
    let chunks = size.div_ceil(chunk_size.max(1));
    if chunks == 0 && direction == TransferDirection::Upload {
        1
    } else {
        chunks
    }
}

/// Byte offset and length of chunk `index`, or `None` past the end.
pub fn chunk_span(index: u64, size: u64, chunk_size: u64) -> Option<(u64, usize)> {
    let chunk_size = chunk_size.max(1);
    let offset = index.checked_mul(chunk_size)?;
    if offset >= size {
        // The lone chunk of an empty file.
        return (index == 0).then_some((0, 0));
    }
    let len = (size - offset).min(chunk_size);
    Some((offset, len as usize))
}

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Random-access chunk reader for an upload source.
///
/// Each read opens its own handle, so chunk workers can read different
/// indices concurrently without sharing a file cursor.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    path: PathBuf,
    file_size: u64,
    chunk_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    pub async fn open(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(TransferError::InvalidPath(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            file_size: metadata.len(),
            chunk_size: chunk_size.max(1),
        })
    }

    /// Reads the plaintext of chunk `index`.
    pub async fn read_chunk(&self, index: u64) -> Result<Vec<u8>, TransferError> {
        let total = self.total_chunks();
        let Some((offset, len)) = chunk_span(index, self.file_size, self.chunk_size) else {
            return Err(TransferError::ChunkOutOfRange { index, total });
        };

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(TransferError::ShortRead {
                    index,
                    expected: len,
                    actual: filled,
                });
            }
            filled += n;
        }
        Ok(buf)
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Plaintext bytes per chunk.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of upload chunks for this file.
    pub fn total_chunks(&self) -> u64 {
        chunk_count(self.file_size, self.chunk_size, TransferDirection::Upload)
    }

    /// Source path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// Append-only writer for a download's output.
///
/// Bytes go to `<destination>.part`; [`finish`](Self::finish) renames the
/// part file onto the destination, [`discard`](Self::discard) deletes it.
pub struct ChunkWriter {
    destination: PathBuf,
    part_path: PathBuf,
    file: BufWriter<File>,
    written: u64,
}

impl ChunkWriter {
    /// Creates (or truncates) the part file for `destination`.
    pub async fn create(destination: &Path) -> Result<Self, TransferError> {
        if destination.file_name().is_none() {
            return Err(TransferError::InvalidPath(format!(
                "destination has no file name: {}",
                destination.display()
            )));
        }
        if let Some(parent) = destination.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part_path = part_path_for(destination);
        let file = File::create(&part_path).await?;
        Ok(Self {
            destination: destination.to_path_buf(),
            part_path,
            file: BufWriter::new(file),
            written: 0,
        })
    }

    /// Appends `data` at the current end of the output.
    pub async fn append(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flushes, syncs and moves the part file onto the destination.
    pub async fn finish(mut self) -> Result<PathBuf, TransferError> {
        self.file.flush().await?;
        self.file.get_ref().sync_all().await?;
        drop(self.file);
        tokio::fs::rename(&self.part_path, &self.destination).await?;
        debug!(path = %self.destination.display(), bytes = self.written, "download output finalized");
        Ok(self.destination)
    }

    /// Deletes the partial output.
    pub async fn discard(self) -> Result<(), TransferError> {
        drop(self.file);
        match tokio::fs::remove_file(&self.part_path).await {
            Ok(()) => {
                debug!(path = %self.part_path.display(), "partial download removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Bytes appended so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Path of the temporary part file.
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }
}

/// Temporary path a download of `destination` writes into.
pub fn part_path_for(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(PART_SUFFIX);
    destination.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn chunk_count_edge_cases() {
        use TransferDirection::{Download, Upload};
        assert_eq!(chunk_count(0, MIB, Upload), 1);
        assert_eq!(chunk_count(0, MIB, Download), 0);
        assert_eq!(chunk_count(MIB, MIB, Upload), 1);
        assert_eq!(chunk_count(MIB + 1, MIB, Upload), 2);
        assert_eq!(chunk_count(3 * MIB, MIB, Upload), 3);
        assert_eq!(chunk_count(3 * MIB, MIB, Download), 3);
    }

    #[test]
    fn chunk_span_boundaries() {
        assert_eq!(chunk_span(0, 10, 4), Some((0, 4)));
        assert_eq!(chunk_span(2, 10, 4), Some((8, 2)));
        assert_eq!(chunk_span(3, 10, 4), None);
        assert_eq!(chunk_span(0, 0, 4), Some((0, 0)));
        assert_eq!(chunk_span(1, 0, 4), None);
        assert_eq!(chunk_span(u64::MAX, 10, 4), None);
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64);
        assert_ne!(c1, checksum_bytes(b"hello"));
    }

    #[tokio::test]
    async fn reader_reads_any_index() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "src.bin", b"AABBCCDDEE");

        let reader = ChunkReader::open(&path, 4).await.unwrap();
        assert_eq!(reader.file_size(), 10);
        assert_eq!(reader.total_chunks(), 3);

        assert_eq!(reader.read_chunk(2).await.unwrap(), b"EE");
        assert_eq!(reader.read_chunk(0).await.unwrap(), b"AABB");
        assert_eq!(reader.read_chunk(1).await.unwrap(), b"CCDD");
        assert!(matches!(
            reader.read_chunk(3).await,
            Err(TransferError::ChunkOutOfRange { index: 3, total: 3 })
        ));
    }

    #[tokio::test]
    async fn reader_empty_file_has_one_empty_chunk() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.bin", b"");

        let reader = ChunkReader::open(&path, MIB).await.unwrap();
        assert_eq!(reader.total_chunks(), 1);
        assert!(reader.read_chunk(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reader_rejects_directory() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ChunkReader::open(dir.path(), MIB).await,
            Err(TransferError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn writer_appends_then_renames() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("sub/out.txt");

        let mut writer = ChunkWriter::create(&dest).await.unwrap();
        let part = writer.part_path().to_path_buf();
        assert!(part.ends_with("out.txt.part"));

        writer.append(b"Hello").await.unwrap();
        writer.append(b" World").await.unwrap();
        assert_eq!(writer.written(), 11);
        assert!(!dest.exists());

        let finished = writer.finish().await.unwrap();
        assert_eq!(finished, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"Hello World");
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn writer_discard_removes_partial_output() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.bin");

        let mut writer = ChunkWriter::create(&dest).await.unwrap();
        writer.append(&[1, 2, 3]).await.unwrap();
        let part = writer.part_path().to_path_buf();
        assert!(part.exists());

        writer.discard().await.unwrap();
        assert!(!part.exists());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn reader_writer_roundtrip() {
        let dir = TempDir::new().unwrap();
        let original = b"The quick brown fox jumps over the lazy dog";
        let src = create_test_file(dir.path(), "src.txt", original);

        let reader = ChunkReader::open(&src, 10).await.unwrap();
        let mut writer = ChunkWriter::create(&dir.path().join("dst.txt")).await.unwrap();
        for index in 0..reader.total_chunks() {
            let chunk = reader.read_chunk(index).await.unwrap();
            writer.append(&chunk).await.unwrap();
        }
        let dst = writer.finish().await.unwrap();

        assert_eq!(std::fs::read(dst).unwrap(), original);
    }
}
