//! Incremental leaf-certificate digest

use sha1::{Digest, Sha1};

use super::fingerprint::{Fingerprint, FINGERPRINT_LEN};

/// Running SHA-1 over certificate bytes delivered in arbitrary chunks.
///
/// `finalize` takes the accumulator by value, so a finished context cannot be
/// fed again.
#[derive(Clone, Default)]
pub struct LeafDigest {
    hasher: Sha1,
    len: usize,
}

impl LeafDigest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` to the running digest
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
        self.len += bytes.len();
    }

    /// Number of bytes fed so far
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize(self) -> Fingerprint {
        let digest = self.hasher.finalize();
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&digest);
        Fingerprint::from_bytes(bytes)
    }

    /// One-shot digest of a complete buffer
    pub fn of(bytes: &[u8]) -> Fingerprint {
        let mut digest = Self::new();
        digest.update(bytes);
        digest.finalize()
    }
}
