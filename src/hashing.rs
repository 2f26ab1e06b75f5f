//! Content Hasher
//!
//! Streaming SHA-256 fixity digests. Files are consumed in fixed-size chunks
//! so peak memory does not depend on file size, and the cancel flag is
//! checked between chunks.

use std::io::{self, Read};

use sha2::{Digest, Sha256};

use crate::config::HashingConfig;
use crate::source::SubmissionFile;
use crate::worker::CancelFlag;

/// Length of a hex-encoded SHA-256 digest
pub const SHA256_HEX_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Hashing cancelled")]
    Cancelled,
}

/// Compute SHA-256 hash of in-memory data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Chunked SHA-256 hasher
#[derive(Debug, Clone)]
pub struct ContentHasher {
    chunk_size: usize,
}

impl ContentHasher {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_config(config: &HashingConfig) -> Self {
        Self::new(config.chunk_size)
    }

    /// Digest everything the reader yields
    ///
    /// `on_progress` receives the running byte count after every chunk.
    pub fn hash_reader<R: Read>(
        &self,
        mut reader: R,
        cancel: &CancelFlag,
        mut on_progress: impl FnMut(u64),
    ) -> Result<String, HashError> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(HashError::Cancelled);
            }

            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            hasher.update(&buf[..n]);
            total += n as u64;
            on_progress(total);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Digest a submission file from a fresh reader
    pub fn hash_file(
        &self,
        file: &SubmissionFile,
        cancel: &CancelFlag,
        on_progress: impl FnMut(u64),
    ) -> Result<String, HashError> {
        let reader = file.open()?;
        let digest = self.hash_reader(reader, cancel, on_progress)?;

        tracing::debug!(
            file_name = %file.name(),
            size = file.size(),
            digest = %digest,
            "Computed fixity digest"
        );

        Ok(digest)
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_HASH_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            compute_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(compute_hash(b"").len(), SHA256_HEX_LEN);
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let hasher = ContentHasher::new(7);
        let streamed = hasher
            .hash_reader(Cursor::new(&data), &CancelFlag::new(), |_| {})
            .unwrap();
        assert_eq!(streamed, compute_hash(&data));
    }

    #[test]
    fn test_deterministic_and_sensitive() {
        let data = b"archival master bytes".to_vec();
        let a = compute_hash(&data);
        let b = compute_hash(&data);
        assert_eq!(a, b);

        let mut mutated = data.clone();
        mutated[3] ^= 0x01;
        assert_ne!(a, compute_hash(&mutated));
    }

    #[test]
    fn test_digest_ignores_file_name() {
        let hasher = ContentHasher::default();
        let cancel = CancelFlag::new();
        let a = SubmissionFile::from_bytes("a.tif", b"same".to_vec());
        let b = SubmissionFile::from_bytes("b.psd", b"same".to_vec());
        assert_eq!(
            hasher.hash_file(&a, &cancel, |_| {}).unwrap(),
            hasher.hash_file(&b, &cancel, |_| {}).unwrap()
        );
    }

    #[test]
    fn test_progress_reports_running_total() {
        let mut seen = Vec::new();
        ContentHasher::new(4)
            .hash_reader(Cursor::new(vec![0u8; 10]), &CancelFlag::new(), |n| seen.push(n))
            .unwrap();
        assert_eq!(seen, vec![4, 8, 10]);
    }

    #[test]
    fn test_cancelled_before_read() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = ContentHasher::default().hash_reader(Cursor::new(vec![1u8; 8]), &cancel, |_| {});
        assert!(matches!(result, Err(HashError::Cancelled)));
    }
}
