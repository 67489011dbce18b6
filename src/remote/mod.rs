//! Remote object store interface
//!
//! The engine only ever needs three operations from the remote side. Paths are
//! `/`-separated and rooted at the backup namespace, e.g.
//! `/backuper_files/photos/2024/a.jpg`.
//!
//! Two implementations ship with the crate:
//!
//! - [`WebDavStore`]: talks to a WebDAV server over HTTPS
//! - [`MemoryStore`]: keeps everything in memory and records every call,
//!   with fault injection for tests and dry runs

mod memory;
mod webdav;

pub use memory::{MemoryStore, RemoteCall};
pub use webdav::WebDavStore;

use crate::error::Result;
use std::path::Path;
use std::sync::Arc;

/// Operations the sync engine consumes from the remote store
///
/// Every operation fails with [`crate::SyncError::Transport`] when the remote
/// side refuses or cannot be reached.
pub trait RemoteStore: Send + Sync {
    /// Create one collection; its parent must already exist
    fn create_collection(&self, path: &str) -> Result<()>;

    /// Upload the content of `local_file` to `remote_path`
    fn put_object(&self, local_file: &Path, remote_path: &str) -> Result<()>;

    /// Delete a collection and everything beneath it
    fn delete_collection(&self, path: &str) -> Result<()>;
}

impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    fn create_collection(&self, path: &str) -> Result<()> {
        (**self).create_collection(path)
    }

    fn put_object(&self, local_file: &Path, remote_path: &str) -> Result<()> {
        (**self).put_object(local_file, remote_path)
    }

    fn delete_collection(&self, path: &str) -> Result<()> {
        (**self).delete_collection(path)
    }
}

impl<T: RemoteStore + ?Sized> RemoteStore for Box<T> {
    fn create_collection(&self, path: &str) -> Result<()> {
        (**self).create_collection(path)
    }

    fn put_object(&self, local_file: &Path, remote_path: &str) -> Result<()> {
        (**self).put_object(local_file, remote_path)
    }

    fn delete_collection(&self, path: &str) -> Result<()> {
        (**self).delete_collection(path)
    }
}
