//! Remote path mapping and the remote directory cache
//!
//! Every watched root gets its own namespace segment (the root's basename)
//! under a fixed backup prefix:
//!
//! ```text
//! local:   /home/ann/photos/2024/beach.jpg     (root /home/ann/photos)
//! remote:  /backuper_files/photos/2024/beach.jpg
//! ```
//!
//! Mapping is a pure function of the relative path, the namespace and the
//! prefix. The local separator never leaks into remote paths.
//!
//! [`DirectoryCache`] memoizes collections known to exist remotely so that
//! [`DirectoryCache::ensure_ancestors`] issues each `create_collection` only
//! once per process lifetime, until a cleaning cycle clears the cache.

use crate::error::Result;
use crate::remote::RemoteStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path};
use tracing::debug;

/// Remote prefix every backup lives under
pub const DEFAULT_BACKUP_PREFIX: &str = "/backuper_files";

/// Remote path separator
pub const REMOTE_SEPARATOR: char = '/';

/// Derives remote paths for local files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePathMapper {
    prefix: String,
}

impl Default for RemotePathMapper {
    fn default() -> Self {
        Self::new(DEFAULT_BACKUP_PREFIX)
    }
}

impl RemotePathMapper {
    /// Create a mapper rooted at `prefix` (normalized to `/a/b` form)
    pub fn new(prefix: impl AsRef<str>) -> Self {
        let segments: Vec<&str> = prefix
            .as_ref()
            .split(REMOTE_SEPARATOR)
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            prefix: format!("/{}", segments.join("/")),
        }
    }

    /// The backup namespace root, e.g. `/backuper_files`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Namespace segment for a watched root: its basename
    pub fn namespace_of(root: &Path) -> Option<String> {
        root.file_name().map(|name| name.to_string_lossy().into_owned())
    }

    /// Remote collection holding everything from one root
    pub fn namespace_path(&self, namespace: &str) -> String {
        join(&self.prefix, namespace)
    }

    /// Remote path for `relative` (relative to its root) under `namespace`
    ///
    /// Only normal path components are kept, so `./a/b` and `a/b` map alike.
    pub fn resolve(&self, relative: &Path, namespace: &str) -> String {
        let mut remote = self.namespace_path(namespace);
        for component in relative.components() {
            if let Component::Normal(segment) = component {
                remote.push(REMOTE_SEPARATOR);
                remote.push_str(&segment.to_string_lossy());
            }
        }
        remote
    }

    /// Ancestor collections of `remote_path`, root to leaf
    ///
    /// Excludes the backup prefix itself and the final (file) segment.
    pub fn ancestors(&self, remote_path: &str) -> Vec<String> {
        let rest = match remote_path.strip_prefix(&self.prefix) {
            Some(rest) if rest.starts_with(REMOTE_SEPARATOR) => rest,
            _ => return Vec::new(),
        };

        let segments: Vec<&str> = rest.split(REMOTE_SEPARATOR).filter(|s| !s.is_empty()).collect();
        let mut current = self.prefix.clone();
        let mut ancestors = Vec::with_capacity(segments.len().saturating_sub(1));
        for segment in segments.iter().take(segments.len().saturating_sub(1)) {
            current = join(&current, segment);
            ancestors.push(current.clone());
        }
        ancestors
    }
}

fn join(base: &str, segment: &str) -> String {
    if base.ends_with(REMOTE_SEPARATOR) {
        format!("{}{}", base, segment)
    } else {
        format!("{}{}{}", base, REMOTE_SEPARATOR, segment)
    }
}

/// Set of remote collections known to exist
///
/// Every member has actually been created remotely; the cache is never
/// populated speculatively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectoryCache {
    known: BTreeSet<String>,
}

impl DirectoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` is known to exist
    pub fn contains(&self, path: &str) -> bool {
        self.known.contains(path)
    }

    /// Number of known collections
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Whether no collection is known
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Forget everything; only a cleaning cycle does this
    pub fn clear(&mut self) {
        self.known.clear();
    }

    /// Known collections in path order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.known.iter().map(String::as_str)
    }

    /// Create `path` remotely unless it is already known
    ///
    /// Returns `true` if a `create_collection` call was made. On failure the
    /// path is not cached, so the next attempt retries.
    pub fn ensure_collection(&mut self, store: &dyn RemoteStore, path: &str) -> Result<bool> {
        if self.known.contains(path) {
            return Ok(false);
        }
        store.create_collection(path)?;
        debug!("Collection {} now known", path);
        self.known.insert(path.to_string());
        Ok(true)
    }

    /// Make sure every ancestor collection of `remote_path` exists
    ///
    /// Ancestors are created root to leaf so a parent always exists before its
    /// child. Returns the number of collections created. The first failure is
    /// propagated and stops the walk down the chain.
    pub fn ensure_ancestors(
        &mut self,
        store: &dyn RemoteStore,
        mapper: &RemotePathMapper,
        remote_path: &str,
    ) -> Result<usize> {
        let mut created = 0;
        for ancestor in mapper.ancestors(remote_path) {
            if self.ensure_collection(store, &ancestor)? {
                created += 1;
            }
        }
        Ok(created)
    }
}
