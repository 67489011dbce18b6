//! Persisted mapping from local file path to last-known digest
//!
//! The hash index is the single source of truth for "has this file changed
//! since it was last stored remotely". It is part of the settings document and
//! is serialized as a list of `{filePath, hash}` entries.
//!
//! Two ways of using it are provided:
//!
//! - [`HashIndex::check_and_update`] decides and records in one step. The first
//!   sight of a path always reports a change.
//! - [`HashIndex::probe`] followed by [`HashIndex::record`] separates the
//!   decision from the commit, so a digest is only recorded once the file has
//!   actually reached the remote store. The sync engine uses this pair.
//!
//! The index has no internal locking; callers serialize access.

use crate::digest::file_digest;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::trace;

/// One persisted index entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashEntry {
    /// Absolute local path of the file
    pub file_path: PathBuf,
    /// Hex digest of the file content when it was last uploaded
    pub hash: String,
}

/// Outcome of probing a file against the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Content matches the recorded digest
    Unchanged,
    /// Path has no entry yet
    New(String),
    /// Recorded digest differs from the current one
    Modified(String),
}

impl Probe {
    /// Whether the file needs uploading
    pub fn is_changed(&self) -> bool {
        !matches!(self, Probe::Unchanged)
    }

    /// The fresh digest, if the file changed
    pub fn digest(&self) -> Option<&str> {
        match self {
            Probe::Unchanged => None,
            Probe::New(d) | Probe::Modified(d) => Some(d),
        }
    }
}

/// Path → digest index, keyed by absolute local path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<HashEntry>", into = "Vec<HashEntry>")]
pub struct HashIndex {
    entries: BTreeMap<PathBuf, String>,
}

impl HashIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `local_path` changed and record its new digest
    ///
    /// - No entry: the digest is inserted and `true` is returned.
    /// - Entry with an equal digest: `false`, nothing changes.
    /// - Entry with a different digest: the digest is overwritten, `true`.
    ///
    /// # Errors
    ///
    /// [`crate::SyncError::FileUnavailable`] if the file cannot be read. The
    /// index is left untouched in that case.
    pub fn check_and_update(&mut self, local_path: &Path) -> Result<bool> {
        match self.probe(local_path)? {
            Probe::Unchanged => Ok(false),
            Probe::New(digest) | Probe::Modified(digest) => {
                self.record(local_path, digest);
                Ok(true)
            }
        }
    }

    /// Compare the current content of `local_path` to its entry without mutating
    pub fn probe(&self, local_path: &Path) -> Result<Probe> {
        let digest = file_digest(local_path)?;
        let probe = match self.entries.get(local_path) {
            None => Probe::New(digest),
            Some(known) if *known == digest => Probe::Unchanged,
            Some(_) => Probe::Modified(digest),
        };
        trace!("Probe {:?}: {:?}", local_path, probe);
        Ok(probe)
    }

    /// Insert or overwrite the digest for `local_path`
    pub fn record(&mut self, local_path: &Path, digest: String) {
        self.entries.insert(local_path.to_path_buf(), digest);
    }

    /// Recorded digest for `local_path`
    pub fn get(&self, local_path: &Path) -> Option<&str> {
        self.entries.get(local_path).map(String::as_str)
    }

    /// Number of tracked files
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no file is tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry; only a cleaning cycle does this
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over entries in path order
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.entries
            .iter()
            .map(|(path, digest)| (path.as_path(), digest.as_str()))
    }
}

impl From<Vec<HashEntry>> for HashIndex {
    fn from(entries: Vec<HashEntry>) -> Self {
        // Later duplicates win, matching an in-place update of the first entry
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.file_path, entry.hash))
                .collect(),
        }
    }
}

impl From<HashIndex> for Vec<HashEntry> {
    fn from(index: HashIndex) -> Self {
        index
            .entries
            .into_iter()
            .map(|(file_path, hash)| HashEntry { file_path, hash })
            .collect()
    }
}
