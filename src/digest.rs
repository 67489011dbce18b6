//! Content digests for change detection
//!
//! A digest is a fixed-size fingerprint of a file's bytes. It is only ever
//! compared against the digest recorded for the same path on an earlier pass,
//! so all that matters is that identical content always yields the same value.
//!
//! ```rust,no_run
//! use backsync::digest::file_digest;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let digest = file_digest(Path::new("notes.txt"))?;
//! assert_eq!(digest.len(), 64);
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SyncError};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::trace;

/// Size of the chunks streamed through the hasher
pub const CHUNK_SIZE: usize = 8192;

/// Length of a hex-encoded digest
pub const DIGEST_LEN: usize = 64;

/// Hash a file's content, streaming it in [`CHUNK_SIZE`] chunks
///
/// Returns the SHA-256 digest as a 64-character lowercase hex string.
///
/// # Errors
///
/// - [`SyncError::FileUnavailable`] if the file cannot be opened or read.
///   Callers must treat this as "file unavailable", never as "unchanged".
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| SyncError::file_unavailable(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| SyncError::file_unavailable(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let digest = hex::encode(hasher.finalize());
    trace!("Digest of {:?}: {}", path, digest);
    Ok(digest)
}

/// Hash an in-memory byte slice
pub fn bytes_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
