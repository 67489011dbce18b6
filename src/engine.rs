//! The synchronization engine
//!
//! [`SyncEngine`] owns the settings document (including the hash index and the
//! remote directory cache) and the remote store handle, and runs passes:
//!
//! ```text
//!            cadence due                       otherwise
//! Idle ─────────────────▶ Cleaning ──▶ Idle   Idle ──▶ Walking/Uploading ──▶ Idle
//! ```
//!
//! - A **cleaning** pass deletes the whole backup namespace remotely and, only
//!   if that succeeded, clears both caches so the next pass re-uploads
//!   everything. A failed deletion leaves every local cache and the cadence
//!   counter untouched, so the next pass tries to clean again.
//! - An **upload** pass walks each watched root in configured order. Roots that
//!   vanished are pruned from the settings. Each file is probed against the
//!   hash index; changed files get their ancestor collections ensured and are
//!   uploaded. The new digest is recorded only after the upload succeeded, so
//!   a failed upload is retried on the next pass.
//!
//! Per-file failures are logged and counted but never abort the pass.
//! Settings are written once at the end of each pass and right after a root is
//! pruned.

use crate::error::Result;
use crate::hash_index::Probe;
use crate::mapper::RemotePathMapper;
use crate::remote::RemoteStore;
use crate::settings::{SettingsStore, SyncSettings};
use crate::walker::list_files;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// What a pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Remote namespace wiped and caches reset
    Cleaning,
    /// Watched roots walked and changed files uploaded
    Upload,
}

/// Summary of one completed pass
#[derive(Debug, Clone)]
pub struct PassReport {
    /// Cleaning or upload
    pub kind: PassKind,
    /// When the pass started
    pub started_at: DateTime<Utc>,
    /// Wall-clock time the pass took
    pub duration: Duration,
    /// Files seen by the walker
    pub files_scanned: usize,
    /// Files uploaded successfully
    pub files_uploaded: usize,
    /// Files whose digest matched the index
    pub files_unchanged: usize,
    /// Files skipped because of a read or transport failure
    pub files_failed: usize,
    /// Bytes uploaded
    pub bytes_uploaded: u64,
    /// Remote collections created
    pub collections_created: usize,
    /// Roots removed from the watched set because they are gone
    pub pruned_roots: Vec<PathBuf>,
    /// Roots skipped because their namespace collides with an earlier root
    pub skipped_roots: Vec<PathBuf>,
}

impl PassReport {
    fn new(kind: PassKind) -> Self {
        Self {
            kind,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            files_scanned: 0,
            files_uploaded: 0,
            files_unchanged: 0,
            files_failed: 0,
            bytes_uploaded: 0,
            collections_created: 0,
            pruned_roots: Vec::new(),
            skipped_roots: Vec::new(),
        }
    }

    /// Whether every scanned file ended up stored or unchanged
    pub fn is_complete(&self) -> bool {
        self.files_failed == 0
    }
}

/// Counts passes toward the next cleaning
///
/// Starts "due" so the first pass after startup cleans. Every completed pass
/// increments the counter and a successful cleaning resets it first, so with a
/// cadence of `n` a cleaning happens every `n` passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleaningCadence {
    counter: u32,
    forced: bool,
}

impl Default for CleaningCadence {
    fn default() -> Self {
        Self::at_startup()
    }
}

impl CleaningCadence {
    /// Counter state at process start: cleaning is due
    pub fn at_startup() -> Self {
        Self {
            counter: 0,
            forced: true,
        }
    }

    /// Counter state that does not force a cleaning
    pub fn settled() -> Self {
        Self {
            counter: 0,
            forced: false,
        }
    }

    /// Whether the next pass must clean, given the configured cadence
    ///
    /// A cadence of 0 disables periodic cleaning.
    pub fn is_due(&self, cadence: u32) -> bool {
        self.forced || (cadence > 0 && self.counter >= cadence)
    }

    /// Passes counted since the last cleaning
    pub fn counter(&self) -> u32 {
        self.counter
    }

    fn cleaned(&mut self) {
        self.counter = 0;
        self.forced = false;
    }

    fn pass_completed(&mut self) {
        self.counter = self.counter.saturating_add(1);
    }
}

enum FileOutcome {
    Unchanged,
    Uploaded { bytes: u64, collections: usize },
}

/// Runs cleaning and upload passes over the configured roots
pub struct SyncEngine {
    settings: SyncSettings,
    settings_store: SettingsStore,
    store: Arc<dyn RemoteStore>,
    mapper: RemotePathMapper,
    cadence: CleaningCadence,
    unsaved: bool,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("settings_store", &self.settings_store)
            .field("roots", &self.settings.watched_roots)
            .field("mapper", &self.mapper)
            .field("cadence", &self.cadence)
            .field("unsaved", &self.unsaved)
            .finish()
    }
}

impl SyncEngine {
    /// Create an engine over already-loaded settings
    ///
    /// The first pass will be a cleaning pass; see [`SyncEngine::skip_startup_cleaning`].
    pub fn new(
        settings: SyncSettings,
        settings_store: SettingsStore,
        store: Arc<dyn RemoteStore>,
    ) -> Self {
        Self {
            settings,
            settings_store,
            store,
            mapper: RemotePathMapper::default(),
            cadence: CleaningCadence::at_startup(),
            unsaved: false,
        }
    }

    /// Load settings from `settings_store` and create an engine
    ///
    /// # Errors
    ///
    /// [`crate::SyncError::Persistence`] if the settings cannot be read. Without them
    /// no roots or credentials are known, so callers should treat this as fatal.
    pub fn open(settings_store: SettingsStore, store: Arc<dyn RemoteStore>) -> Result<Self> {
        let settings = settings_store.load()?;
        info!(
            "Opened settings {:?} with {} watched roots",
            settings_store.path(),
            settings.watched_roots.len()
        );
        Ok(Self::new(settings, settings_store, store))
    }

    /// Use a different backup prefix
    pub fn with_mapper(mut self, mapper: RemotePathMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Do not force a cleaning on the first pass
    pub fn skip_startup_cleaning(mut self) -> Self {
        self.cadence = CleaningCadence::settled();
        self
    }

    /// Current settings
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Path mapper in use
    pub fn mapper(&self) -> &RemotePathMapper {
        &self.mapper
    }

    /// Cleaning counter state
    pub fn cadence(&self) -> CleaningCadence {
        self.cadence
    }

    /// Whether the next pass will clean
    pub fn cleaning_due(&self) -> bool {
        self.cadence.is_due(self.settings.cleaning_cadence)
    }

    /// Whether in-memory settings differ from the last successful save
    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    /// Swap the remote store, e.g. after credentials changed
    pub fn replace_store(&mut self, store: Arc<dyn RemoteStore>) {
        self.store = store;
    }

    /// Apply a settings mutation and persist it, all or nothing
    ///
    /// The mutation runs on a copy. If it fails, or the copy cannot be saved,
    /// neither memory nor disk changes.
    pub fn update_settings<F>(&mut self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut SyncSettings) -> Result<()>,
    {
        let mut next = self.settings.clone();
        mutate(&mut next)?;
        self.settings_store.save(&next)?;
        self.settings = next;
        self.unsaved = false;
        Ok(())
    }

    /// Run one scheduled pass: cleaning if due, otherwise upload
    #[instrument(skip(self))]
    pub fn run_pass(&mut self) -> Result<PassReport> {
        if self.cleaning_due() {
            self.clean()
        } else {
            Ok(self.upload_pass())
        }
    }

    /// Wipe the remote namespace and reset the change-tracking caches
    ///
    /// # Errors
    ///
    /// [`crate::SyncError::Transport`] if the namespace could not be deleted. Nothing
    /// local changes in that case.
    pub fn clean(&mut self) -> Result<PassReport> {
        let started = Instant::now();
        let mut report = PassReport::new(PassKind::Cleaning);
        let namespace = self.mapper.prefix().to_string();
        info!("Cleaning remote namespace {}", namespace);

        if let Err(e) = self.store.delete_collection(&namespace) {
            error!("Cleaning aborted, {} not deleted: {}", namespace, e);
            return Err(e);
        }

        self.settings.hash_index.clear();
        self.settings.directory_cache.clear();
        self.settings.last_cleaning = Some(Utc::now());
        self.cadence.cleaned();
        self.cadence.pass_completed();
        self.unsaved = true;
        self.save_checkpoint();

        report.duration = started.elapsed();
        info!("Cleaning completed in {:?}", report.duration);
        Ok(report)
    }

    /// Walk every watched root and upload changed files
    pub fn upload_pass(&mut self) -> PassReport {
        let started = Instant::now();
        let mut report = PassReport::new(PassKind::Upload);
        let mut namespaces = HashSet::new();
        let roots = self.settings.watched_roots.clone();
        info!("Backup started over {} roots", roots.len());

        for root in roots {
            if !root.exists() {
                warn!("Watched root {:?} no longer exists, removing it", root);
                self.prune_root(&root, &mut report);
                continue;
            }

            let Some(namespace) = RemotePathMapper::namespace_of(&root) else {
                warn!("Watched root {:?} has no name to use remotely, skipping", root);
                report.skipped_roots.push(root);
                continue;
            };
            if !namespaces.insert(namespace.clone()) {
                warn!(
                    "Watched root {:?} maps to remote namespace '{}' already used by another root, skipping",
                    root, namespace
                );
                report.skipped_roots.push(root);
                continue;
            }

            let walk = match list_files(&root) {
                Ok(walk) => walk,
                Err(e) => {
                    warn!("Watched root {:?} is unreadable ({}), removing it", root, e);
                    self.prune_root(&root, &mut report);
                    continue;
                }
            };

            for entry in walk {
                let relative = match entry {
                    Ok(relative) => relative,
                    Err(e) => {
                        warn!("Skipping unreadable entry under {:?}: {}", root, e);
                        report.files_failed += 1;
                        continue;
                    }
                };
                report.files_scanned += 1;

                let local = root.join(&relative);
                match self.sync_file(&local, &relative, &namespace) {
                    Ok(FileOutcome::Unchanged) => report.files_unchanged += 1,
                    Ok(FileOutcome::Uploaded { bytes, collections }) => {
                        report.files_uploaded += 1;
                        report.bytes_uploaded += bytes;
                        report.collections_created += collections;
                    }
                    Err(e) => {
                        warn!("Skipping {:?}: {}", local, e);
                        report.files_failed += 1;
                    }
                }
            }
        }

        self.settings.last_backup = Some(Utc::now());
        self.cadence.pass_completed();
        self.unsaved = true;
        self.save_checkpoint();

        report.duration = started.elapsed();
        info!(
            "Backup completed: {} scanned, {} uploaded, {} unchanged, {} failed",
            report.files_scanned, report.files_uploaded, report.files_unchanged, report.files_failed
        );
        report
    }

    fn sync_file(&mut self, local: &Path, relative: &Path, namespace: &str) -> Result<FileOutcome> {
        let digest = match self.settings.hash_index.probe(local)? {
            Probe::Unchanged => return Ok(FileOutcome::Unchanged),
            Probe::New(digest) | Probe::Modified(digest) => digest,
        };

        let remote = self.mapper.resolve(relative, namespace);
        let cache = &mut self.settings.directory_cache;
        let mut collections = usize::from(cache.ensure_collection(self.store.as_ref(), self.mapper.prefix())?);
        collections += cache.ensure_ancestors(self.store.as_ref(), &self.mapper, &remote)?;

        info!("Backing up {}", remote);
        self.store.put_object(local, &remote)?;
        self.settings.hash_index.record(local, digest);

        let bytes = fs::metadata(local).map(|m| m.len()).unwrap_or(0);
        debug!("Uploaded {} ({} bytes)", remote, bytes);
        Ok(FileOutcome::Uploaded { bytes, collections })
    }

    fn prune_root(&mut self, root: &Path, report: &mut PassReport) {
        if self.settings.unwatch(root) {
            report.pruned_roots.push(root.to_path_buf());
            self.unsaved = true;
            self.save_checkpoint();
        }
    }

    /// Save settings if anything changed; failures are logged and retried later
    fn save_checkpoint(&mut self) {
        if !self.unsaved {
            return;
        }
        match self.settings_store.save(&self.settings) {
            Ok(()) => self.unsaved = false,
            Err(e) => error!("Failed to save settings, will retry at the next write: {}", e),
        }
    }

    /// Force a save of the current settings
    pub fn save(&mut self) -> Result<()> {
        self.settings_store.save(&self.settings)?;
        self.unsaved = false;
        Ok(())
    }
}
