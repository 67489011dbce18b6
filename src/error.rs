//! Error types for the backsync library
//!
//! This module defines all error types that can occur while synchronizing
//! watched directories to the remote store. The variants follow the
//! containment policy of the engine:
//!
//! - [`SyncError::FileUnavailable`]: a file or root could not be read. The
//!   file is skipped (or the root pruned); the pass continues.
//! - [`SyncError::Transport`]: a remote operation failed. A failed upload
//!   skips that file, a failed namespace deletion aborts the cleaning cycle.
//! - [`SyncError::ConfigurationRejected`]: user input was invalid or the
//!   configuration session was blocked by an active pass. Nothing changes.
//! - [`SyncError::Persistence`]: the settings document could not be read or
//!   written. Fatal at startup, retried at later write points.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the backsync library
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for all backsync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// I/O errors not attributable to a specific tracked file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// A file or directory could not be opened or read
    #[error("File unavailable: {path:?}: {source}")]
    FileUnavailable {
        /// Path that could not be read
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A remote store operation failed
    #[error("Transport error during {operation} of {path}: {message}")]
    Transport {
        /// Remote operation name (`MKCOL`, `PUT`, `DELETE`, ...)
        operation: &'static str,
        /// Remote path the operation targeted
        path: String,
        /// Human readable failure description
        message: String,
    },

    /// Configuration change refused
    #[error("Configuration rejected: {0}")]
    ConfigurationRejected(String),

    /// The settings document could not be loaded or saved
    #[error("Persistence error at {path:?}: {message}")]
    Persistence {
        /// Location of the settings document
        path: PathBuf,
        /// Human readable failure description
        message: String,
    },

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Create a file-unavailable error for `path`
    pub fn file_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::FileUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Create a transport error for a remote operation
    pub fn transport(
        operation: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        SyncError::Transport {
            operation,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a configuration rejection with a user-facing reason
    pub fn rejected(msg: impl Into<String>) -> Self {
        SyncError::ConfigurationRejected(msg.into())
    }

    /// Create a persistence error for the settings document at `path`
    pub fn persistence(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        SyncError::Persistence {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SyncError::Internal(msg.into())
    }

    /// Check if this error came from the remote store
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport { .. })
    }

    /// Check if this error is a refused configuration change
    pub fn is_rejection(&self) -> bool {
        matches!(self, SyncError::ConfigurationRejected(_))
    }

    /// Check if this error means a local path could not be read
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            SyncError::FileUnavailable { .. } | SyncError::WalkDir(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SyncError::ConfigurationRejected(reason) => reason.clone(),
            SyncError::Transport { operation, path, message } => {
                format!(
                    "Remote store refused {} on '{}': {}. Check host and credentials with 'status'.",
                    operation, path, message
                )
            }
            SyncError::Persistence { path, message } => {
                format!(
                    "Could not access settings at {:?} ({}). Run 'backsync init' to create them.",
                    path, message
                )
            }
            _ => self.to_string(),
        }
    }
}
