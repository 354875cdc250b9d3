//! Content fingerprints used for staleness checks and cache keys.

use std::fs;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Returns the lowercase hexadecimal SHA-256 digest of `bytes`.
#[must_use]
pub fn digest_bytes(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

/// Returns the digest of the file at `path`, or `None` when it is absent.
///
/// # Errors
///
/// Returns the underlying I/O error for failures other than a missing file.
pub fn digest_file(path: &Path) -> io::Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(digest_bytes(&bytes))),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error),
    }
}

/// Incrementally digests a sequence of length-delimited fields.
#[derive(Debug, Clone, Default)]
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one field; the length prefix keeps `["ab", "c"]` distinct from
    /// `["a", "bc"]`.
    #[must_use]
    pub fn field(mut self, bytes: &[u8]) -> Self {
        self.hasher.update(bytes.len().to_string());
        self.hasher.update(b":");
        self.hasher.update(bytes);
        self
    }

    /// Returns the hexadecimal digest.
    #[must_use]
    pub fn finish(self) -> String {
        to_hex(&self.hasher.finalize())
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
