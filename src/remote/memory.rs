//! In-memory remote store
//!
//! Behaves like a strict collection store: a collection or object can only be
//! created under an existing parent collection, and deleting a collection
//! removes its whole subtree. Every call is journaled so tests can assert on
//! the exact traffic a pass produced.

use super::RemoteStore;
use crate::error::{Result, SyncError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One recorded remote operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// `create_collection(path)`
    CreateCollection(String),
    /// `put_object(local, remote)`
    PutObject {
        /// Local file that was read
        local: PathBuf,
        /// Destination path
        remote: String,
    },
    /// `delete_collection(path)`
    DeleteCollection(String),
}

#[derive(Debug, Default)]
struct Inner {
    collections: BTreeSet<String>,
    objects: BTreeMap<String, Vec<u8>>,
    calls: Vec<RemoteCall>,
    fail_creates: usize,
    fail_puts: usize,
    fail_deletes: usize,
    failing_objects: HashSet<String>,
}

/// Remote store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` collection creations fail
    pub fn fail_next_creates(&self, count: usize) {
        self.inner.lock().fail_creates = count;
    }

    /// Make the next `count` uploads fail
    pub fn fail_next_puts(&self, count: usize) {
        self.inner.lock().fail_puts = count;
    }

    /// Make the next `count` collection deletions fail
    pub fn fail_next_deletes(&self, count: usize) {
        self.inner.lock().fail_deletes = count;
    }

    /// Make every upload to `remote_path` fail until [`MemoryStore::heal_object`]
    pub fn fail_object(&self, remote_path: impl Into<String>) {
        self.inner.lock().failing_objects.insert(remote_path.into());
    }

    /// Stop failing uploads to `remote_path`
    pub fn heal_object(&self, remote_path: &str) {
        self.inner.lock().failing_objects.remove(remote_path);
    }

    /// All calls received so far, in order
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.inner.lock().calls.clone()
    }

    /// Forget the call journal
    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Remote paths of every `put_object` call so far
    pub fn uploads(&self) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::PutObject { remote, .. } => Some(remote.clone()),
                _ => None,
            })
            .collect()
    }

    /// Paths of every `create_collection` call so far
    pub fn created_collections(&self) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::CreateCollection(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of `delete_collection` calls so far
    pub fn deletions(&self) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|call| matches!(call, RemoteCall::DeleteCollection(_)))
            .count()
    }

    /// Whether a collection currently exists
    pub fn has_collection(&self, path: &str) -> bool {
        self.inner.lock().collections.contains(path)
    }

    /// Current content stored at `remote_path`
    pub fn object(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.inner.lock().objects.get(remote_path).cloned()
    }

    /// Paths of all stored objects
    pub fn object_paths(&self) -> Vec<String> {
        self.inner.lock().objects.keys().cloned().collect()
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn is_within(path: &str, collection: &str) -> bool {
    path == collection
        || path
            .strip_prefix(collection)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl Inner {
    fn parent_exists(&self, path: &str) -> bool {
        let parent = parent_of(path);
        parent == "/" || self.collections.contains(parent)
    }
}

impl RemoteStore for MemoryStore {
    fn create_collection(&self, path: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(RemoteCall::CreateCollection(path.to_string()));

        if inner.fail_creates > 0 {
            inner.fail_creates -= 1;
            return Err(SyncError::transport("MKCOL", path, "injected failure"));
        }
        if !inner.parent_exists(path) {
            return Err(SyncError::transport("MKCOL", path, "409 Conflict: parent missing"));
        }

        inner.collections.insert(path.to_string());
        debug!("Created collection {}", path);
        Ok(())
    }

    fn put_object(&self, local_file: &Path, remote_path: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(RemoteCall::PutObject {
            local: local_file.to_path_buf(),
            remote: remote_path.to_string(),
        });

        if inner.fail_puts > 0 {
            inner.fail_puts -= 1;
            return Err(SyncError::transport("PUT", remote_path, "injected failure"));
        }
        if inner.failing_objects.contains(remote_path) {
            return Err(SyncError::transport("PUT", remote_path, "503 Service Unavailable"));
        }
        if !inner.parent_exists(remote_path) {
            return Err(SyncError::transport("PUT", remote_path, "409 Conflict: parent missing"));
        }

        let content = fs::read(local_file).map_err(|e| SyncError::file_unavailable(local_file, e))?;
        debug!("Stored {} ({} bytes)", remote_path, content.len());
        inner.objects.insert(remote_path.to_string(), content);
        Ok(())
    }

    fn delete_collection(&self, path: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(RemoteCall::DeleteCollection(path.to_string()));

        if inner.fail_deletes > 0 {
            inner.fail_deletes -= 1;
            return Err(SyncError::transport("DELETE", path, "injected failure"));
        }

        inner.collections.retain(|c| !is_within(c, path));
        inner.objects.retain(|o, _| !is_within(o, path));
        debug!("Deleted collection {}", path);
        Ok(())
    }
}
