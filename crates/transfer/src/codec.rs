//! Per-chunk authenticated encryption.
//!
//! Every chunk is sealed independently with ChaCha20-Poly1305 under the
//! file's key. The layout of a sealed chunk is `[nonce (12)][ciphertext][tag (16)]`.
//! The chunk index is bound as associated data, so identical plaintext at two
//! indices never produces the same bytes and a chunk served at the wrong index
//! fails authentication.
//!
//! Both directions are free functions over borrowed inputs and hold no state,
//! so any number of chunk workers may call them at once.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Smallest byte count a sealed chunk can have (empty plaintext).
pub const MIN_SEALED_LEN: usize = NONCE_SIZE + TAG_SIZE;

/// Length of a per-file key.
pub const KEY_SIZE: usize = 32;

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Fewer bytes than the smallest valid sealed chunk. Treated by the
    /// transport as a flaky response and retried.
    #[error("sealed chunk {index} truncated to {len} bytes")]
    Truncated { index: u64, len: usize },

    /// Tag mismatch: wrong key, wrong index or corrupted bytes.
    #[error("chunk {index} failed authentication")]
    Authentication { index: u64 },

    #[error("chunk {index} could not be sealed")]
    Seal { index: u64 },

    #[error("invalid file key: {0}")]
    InvalidKey(String),
}

impl CodecError {
    /// Whether a fresh copy of the same chunk could decode.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

/// A per-file symmetric key.
///
/// Owned by the key collaborator; the engine borrows it for a job's lifetime.
#[derive(Clone, PartialEq, Eq)]
pub struct FileKey([u8; KEY_SIZE]);

impl FileKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parses a 64-character hex key.
    pub fn from_hex(encoded: &str) -> Result<Self, CodecError> {
        let raw = hex::decode(encoded).map_err(|e| CodecError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_SIZE] = raw.try_into().map_err(|v: Vec<u8>| {
            CodecError::InvalidKey(format!("expected {KEY_SIZE} bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Hex encoding of the key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FileKey(..)")
    }
}

/// Seals one plaintext chunk.
pub fn encrypt(index: u64, key: &FileKey, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let aad = index.to_le_bytes();
    let sealed = key
        .cipher()
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| CodecError::Seal { index })?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Opens one sealed chunk.
pub fn decrypt(index: u64, key: &FileKey, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
    if sealed.len() < MIN_SEALED_LEN {
        return Err(CodecError::Truncated {
            index,
            len: sealed.len(),
        });
    }

    let (nonce, body) = sealed.split_at(NONCE_SIZE);
    let aad = index.to_le_bytes();
    key.cipher()
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: body,
                aad: &aad,
            },
        )
        .map_err(|_| CodecError::Authentication { index })
}

/// Size of the sealed form of a `plaintext_len`-byte chunk.
pub fn sealed_len(plaintext_len: usize) -> usize {
    plaintext_len + MIN_SEALED_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 1024 * 1024;

    #[test]
    fn roundtrip_boundary_sizes() {
        let key = FileKey::generate();
        for len in [0, 1, CHUNK - 1, CHUNK] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            for index in [0u64, u64::MAX] {
                let sealed = encrypt(index, &key, &data).unwrap();
                assert_eq!(sealed.len(), sealed_len(len));
                let opened = decrypt(index, &key, &sealed).unwrap();
                assert_eq!(opened, data, "len {len} index {index}");
            }
        }
    }

    #[test]
    fn same_plaintext_differs_across_indices() {
        let key = FileKey::generate();
        let a = encrypt(0, &key, b"same bytes").unwrap();
        let b = encrypt(1, &key, b"same bytes").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_index_fails_authentication() {
        let key = FileKey::generate();
        let sealed = encrypt(3, &key, b"chunk three").unwrap();
        assert_eq!(
            decrypt(4, &key, &sealed).unwrap_err(),
            CodecError::Authentication { index: 4 }
        );
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let sealed = encrypt(0, &FileKey::generate(), b"secret").unwrap();
        let err = decrypt(0, &FileKey::generate(), &sealed).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn truncated_chunk_is_transient() {
        let key = FileKey::generate();
        for len in [0, 1, MIN_SEALED_LEN - 1] {
            let err = decrypt(9, &key, &vec![0u8; len]).unwrap_err();
            assert_eq!(err, CodecError::Truncated { index: 9, len });
            assert!(err.is_transient());
        }
    }

    #[test]
    fn tampered_chunk_is_rejected() {
        let key = FileKey::generate();
        let mut sealed = encrypt(0, &key, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            decrypt(0, &key, &sealed),
            Err(CodecError::Authentication { .. })
        ));
    }

    #[test]
    fn key_hex_roundtrip() {
        let key = FileKey::generate();
        let parsed = FileKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn key_hex_rejects_bad_input() {
        assert!(FileKey::from_hex("zz").is_err());
        assert!(FileKey::from_hex("abcd").is_err());
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = FileKey::from_bytes([7u8; KEY_SIZE]);
        assert_eq!(format!("{key:?}"), "FileKey(..)");
    }

    #[test]
    fn concurrent_use_from_threads() {
        use std::sync::Arc;
        let key = Arc::new(FileKey::generate());
        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let key = Arc::clone(&key);
                std::thread::spawn(move || {
                    let data = vec![i as u8; 4096];
                    let sealed = encrypt(i, &key, &data).unwrap();
                    assert_eq!(decrypt(i, &key, &sealed).unwrap(), data);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
