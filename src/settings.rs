//! Persisted synchronization settings
//!
//! The settings document is one JSON object holding everything that must
//! survive a restart: watched roots, timing, credentials, and the two change
//! tracking caches (hash index and remote directory cache).
//!
//! ```json
//! {
//!   "watchedRoots": ["/home/ann/photos"],
//!   "backupInterval": 3600,
//!   "cleaningInterval": 10,
//!   "filesHash": [{ "filePath": "/home/ann/photos/a.jpg", "hash": "9f86..." }],
//!   "existsDirectories": ["/backuper_files", "/backuper_files/photos"],
//!   "host": "dav.example.com",
//!   "port": 443,
//!   "login": "ann",
//!   "pass": "secret",
//!   "lastBackup": "2024-05-01T10:00:00Z"
//! }
//! ```
//!
//! [`SettingsStore`] loads and saves the whole document. Saves go through a
//! temporary file in the same directory that is renamed over the target, so a
//! crash mid-write leaves the previous document intact.

use crate::error::{Result, SyncError};
use crate::hash_index::HashIndex;
use crate::mapper::DirectoryCache;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Default seconds between passes
pub const DEFAULT_INTERVAL_SECS: u64 = 3600;

/// Shortest accepted sleep between passes
pub const MIN_INTERVAL_SECS: u64 = 1;

/// Default number of passes between cleanings
pub const DEFAULT_CLEANING_CADENCE: u32 = 10;

/// Default WebDAV port
pub const DEFAULT_PORT: u16 = 443;

/// Default settings file name, resolved against the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_cadence() -> u32 {
    DEFAULT_CLEANING_CADENCE
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Process-wide synchronization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// Local directories to back up, in pass order
    #[serde(default)]
    pub watched_roots: Vec<PathBuf>,
    /// Seconds to sleep between passes
    #[serde(rename = "backupInterval", default = "default_interval")]
    pub interval_secs: u64,
    /// Passes between full cleanings (0 disables periodic cleaning)
    #[serde(rename = "cleaningInterval", default = "default_cadence")]
    pub cleaning_cadence: u32,
    /// Last uploaded digest per local file
    #[serde(rename = "filesHash", default)]
    pub hash_index: HashIndex,
    /// Remote collections known to exist
    #[serde(rename = "existsDirectories", default)]
    pub directory_cache: DirectoryCache,
    /// Remote store host name
    #[serde(default)]
    pub host: String,
    /// Remote store port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Remote store login
    #[serde(default)]
    pub login: String,
    /// Remote store password
    #[serde(rename = "pass", default)]
    pub password: String,
    /// Completion time of the last upload pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<DateTime<Utc>>,
    /// Completion time of the last successful cleaning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cleaning: Option<DateTime<Utc>>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            watched_roots: Vec::new(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            cleaning_cadence: DEFAULT_CLEANING_CADENCE,
            hash_index: HashIndex::new(),
            directory_cache: DirectoryCache::new(),
            host: String::new(),
            port: DEFAULT_PORT,
            login: String::new(),
            password: String::new(),
            last_backup: None,
            last_cleaning: None,
        }
    }
}

impl SyncSettings {
    /// Sleep duration between passes
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Whether `root` is already watched
    pub fn is_watched(&self, root: &Path) -> bool {
        self.watched_roots.iter().any(|r| r == root)
    }

    /// Remove `root` from the watched set; returns whether it was present
    pub fn unwatch(&mut self, root: &Path) -> bool {
        let before = self.watched_roots.len();
        self.watched_roots.retain(|r| r != root);
        self.watched_roots.len() != before
    }
}

/// Loads and saves the settings document at a fixed path
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Store backed by the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the settings document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a document exists on disk
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read and parse the document
    ///
    /// # Errors
    ///
    /// [`SyncError::Persistence`] if the file is missing, unreadable or not a
    /// valid settings document. An interval below [`MIN_INTERVAL_SECS`] is
    /// raised to it.
    pub fn load(&self) -> Result<SyncSettings> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| SyncError::persistence(&self.path, e.to_string()))?;
        let mut settings: SyncSettings = serde_json::from_str(&content)
            .map_err(|e| SyncError::persistence(&self.path, format!("malformed settings: {}", e)))?;
        if settings.interval_secs < MIN_INTERVAL_SECS {
            warn!(
                "backupInterval {} in {:?} is too short, using {}s",
                settings.interval_secs, self.path, MIN_INTERVAL_SECS
            );
            settings.interval_secs = MIN_INTERVAL_SECS;
        }
        debug!(
            "Loaded settings from {:?}: {} roots, {} tracked files",
            self.path,
            settings.watched_roots.len(),
            settings.hash_index.len()
        );
        Ok(settings)
    }

    /// Atomically replace the document with `settings`
    pub fn save(&self, settings: &SyncSettings) -> Result<()> {
        let json = serde_json::to_vec_pretty(settings)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let persist_err = |e: std::io::Error| SyncError::persistence(&self.path, e.to_string());
        let mut temp = NamedTempFile::new_in(&dir).map_err(persist_err)?;
        temp.write_all(&json).map_err(persist_err)?;
        temp.as_file().sync_all().map_err(persist_err)?;
        temp.persist(&self.path)
            .map_err(|e| SyncError::persistence(&self.path, e.error.to_string()))?;

        debug!("Saved settings to {:?} ({} bytes)", self.path, json.len());
        Ok(())
    }

    /// Write a default document, refusing to overwrite one unless `force`
    pub fn init(&self, force: bool) -> Result<SyncSettings> {
        if self.exists() && !force {
            return Err(SyncError::persistence(
                &self.path,
                "settings already exist (use --force to overwrite)",
            ));
        }
        let settings = SyncSettings::default();
        self.save(&settings)?;
        info!("Initialized settings at {:?}", self.path);
        Ok(settings)
    }
}
