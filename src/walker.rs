//! Recursive enumeration of files under a watched root
//!
//! [`list_files`] returns a lazy, finite [`FileWalk`] that yields every
//! non-directory entry beneath a root as a path relative to that root, in
//! depth-first order. Directories are descended into but never yielded.
//! Entries are visited in file-name order within each directory so two walks
//! over an unchanged tree produce the same sequence.
//!
//! Paths are plain [`PathBuf`]s using the host separator. Conversion to the
//! remote `/` convention happens only in [`crate::mapper`].

use crate::error::{Result, SyncError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Lazy depth-first walk over the files of one root
pub struct FileWalk {
    root: PathBuf,
    inner: walkdir::IntoIter,
}

impl std::fmt::Debug for FileWalk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWalk").field("root", &self.root).finish()
    }
}

impl FileWalk {
    /// Root the walk was started from
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Iterator for FileWalk {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(SyncError::WalkDir(e))),
            };

            // Follows links, so a link to a directory is walked like a directory
            if entry.file_type().is_dir() {
                continue;
            }

            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => {
                    return Some(Err(SyncError::internal(format!(
                        "Walked path {:?} escaped root {:?}",
                        entry.path(),
                        self.root
                    ))))
                }
            };
            trace!("Walked {:?}", relative);
            return Some(Ok(relative));
        }
    }
}

/// Start a walk over the files under `root`
///
/// # Errors
///
/// [`SyncError::FileUnavailable`] if `root` is not a readable directory. The
/// sync engine treats this as "root is gone".
pub fn list_files(root: &Path) -> Result<FileWalk> {
    // Surface an unreadable root up front instead of as the first item
    fs::read_dir(root).map_err(|e| SyncError::file_unavailable(root, e))?;
    debug!("Walking {:?}", root);

    let inner = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter();

    Ok(FileWalk {
        root: root.to_path_buf(),
        inner,
    })
}
