//! # Backsync - Incremental backup to a remote collection store
//!
//! Mirrors a set of local directories onto a WebDAV-style remote store,
//! uploading only files whose content changed since the last pass.
//!
//! ## Overview
//!
//! Each watched directory (a *root*) is backed up under its own remote
//! namespace, `/backuper_files/<root name>/...`. Passes run on a fixed
//! interval:
//!
//! - an **upload pass** walks every root, hashes each file with SHA-256 and
//!   uploads the ones whose digest differs from the hash index
//! - a **cleaning pass** deletes the whole remote backup and resets the local
//!   caches, so the following pass re-uploads everything. The first pass after
//!   startup cleans, then one pass in every `cleaningInterval` does.
//!
//! Remote collections are created on demand and remembered in a directory
//! cache so each is created at most once between cleanings. Both caches, the
//! watched roots, timing and credentials persist in one JSON settings file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use backsync::{Coordinator, SettingsStore, SyncEngine, WebDavStore};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings_store = SettingsStore::new("settings.json");
//! let settings = settings_store.load()?;
//! let store = WebDavStore::new(&settings.host, settings.port, &settings.login, &settings.password)?;
//!
//! let coordinator = Coordinator::new(SyncEngine::new(settings, settings_store, Arc::new(store)));
//!
//! // Reconfigure between passes
//! coordinator.open_session()?.set_interval("600")?;
//!
//! // Run one pass (cleans, since it is the first one)
//! let report = coordinator.run_pass()?;
//! println!("{:?}: {} files uploaded", report.kind, report.files_uploaded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! The engine sits behind the [`Coordinator`]. Passes wait for an open
//! [`ConfigSession`] to close; a session requested while a pass runs is
//! refused immediately with [`SyncError::ConfigurationRejected`].
//! [`Scheduler`] drives passes on a tokio runtime.
//!
//! ## Module Organization
//!
//! - [`digest`]: SHA-256 content digests
//! - [`hash_index`]: last uploaded digest per file
//! - [`walker`]: recursive file listing
//! - [`mapper`]: local to remote path mapping and the directory cache
//! - [`remote`]: the remote store trait, WebDAV and in-memory stores
//! - [`settings`]: the persisted settings document
//! - [`engine`]: cleaning and upload passes
//! - [`coordinator`]: pass/session mutual exclusion
//! - [`scheduler`]: the periodic pass loop
//! - [`error`]: error types and handling

pub mod coordinator;
pub mod digest;
pub mod engine;
pub mod error;
pub mod hash_index;
pub mod mapper;
pub mod remote;
pub mod scheduler;
pub mod settings;
pub mod walker;

// Re-export main types for convenience
pub use coordinator::{ConfigSession, Coordinator};
pub use digest::{bytes_digest, file_digest};
pub use engine::{CleaningCadence, PassKind, PassReport, SyncEngine};
pub use error::{Result, SyncError};
pub use hash_index::{HashIndex, Probe};
pub use mapper::{DirectoryCache, RemotePathMapper, DEFAULT_BACKUP_PREFIX};
pub use remote::{MemoryStore, RemoteCall, RemoteStore, WebDavStore};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use settings::{SettingsStore, SyncSettings};
pub use walker::list_files;
