use cirrus_engine::{EngineError, FileKey, KeyProvider};
use cirrus_protocol::FileMetadata;

/// Key provider for the local backend.
///
/// Generates a fresh random key per upload but "seals" metadata as plain
/// JSON, so the key is readable by anyone with access to the backend
/// directory. Development and testing only.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainKeyProvider;

impl KeyProvider for PlainKeyProvider {
    fn file_key(&self, _name: &str) -> Result<FileKey, EngineError> {
        Ok(FileKey::generate())
    }

    fn seal_metadata(&self, metadata: &FileMetadata) -> Result<String, EngineError> {
        Ok(serde_json::to_string(metadata)?)
    }
}

/// Reads metadata sealed by [`PlainKeyProvider`].
pub fn open_metadata(sealed: &str) -> Result<FileMetadata, serde_json::Error> {
    serde_json::from_str(sealed)
}
