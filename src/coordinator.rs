//! Mutual exclusion between backup passes and configuration sessions
//!
//! The [`SyncEngine`] (settings, caches, store handle) lives behind a single
//! lock shared by two parties:
//!
//! - the scheduler, which calls [`Coordinator::run_pass`]. It waits for any
//!   open configuration session to close before starting.
//! - the interactive console, which calls [`Coordinator::open_session`]. If a
//!   pass is running the session is refused immediately instead of waiting,
//!   so the user sees "backup in progress" rather than a hung prompt.
//!
//! A [`ConfigSession`] keeps exclusive access until it is dropped. Every
//! accepted change is persisted before the call returns; a rejected change
//! leaves both memory and disk untouched.

use crate::engine::{PassReport, SyncEngine};
use crate::error::{Result, SyncError};
use crate::mapper::RemotePathMapper;
use crate::remote::RemoteStore;
use crate::settings::{SyncSettings, MIN_INTERVAL_SECS};
use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Minimum length of a login or password
pub const MIN_CREDENTIAL_LEN: usize = 3;

struct Shared {
    engine: Mutex<SyncEngine>,
    pass_active: AtomicBool,
    session_open: AtomicBool,
    interval_secs: AtomicU64,
    passes_completed: AtomicU64,
    last_report: Mutex<Option<PassReport>>,
}

/// Cloneable handle arbitrating access to the sync engine
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("pass_active", &self.is_pass_active())
            .field("interval", &self.interval())
            .field("passes_completed", &self.passes_completed())
            .finish()
    }
}

/// Clears the pass flag even if the pass panics
struct PassFlag<'a>(&'a AtomicBool);

impl<'a> PassFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        PassFlag(flag)
    }
}

impl Drop for PassFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Coordinator {
    /// Take ownership of `engine`
    pub fn new(engine: SyncEngine) -> Self {
        let interval_secs = engine.settings().interval_secs;
        Self {
            shared: Arc::new(Shared {
                engine: Mutex::new(engine),
                pass_active: AtomicBool::new(false),
                session_open: AtomicBool::new(false),
                interval_secs: AtomicU64::new(interval_secs),
                passes_completed: AtomicU64::new(0),
                last_report: Mutex::new(None),
            }),
        }
    }

    /// Run one pass, waiting for any open configuration session first
    pub fn run_pass(&self) -> Result<PassReport> {
        let mut engine = self.shared.engine.lock();
        let _flag = PassFlag::raise(&self.shared.pass_active);

        let result = engine.run_pass();
        self.shared.passes_completed.fetch_add(1, Ordering::SeqCst);
        if let Ok(report) = &result {
            *self.shared.last_report.lock() = Some(report.clone());
        }
        result
    }

    /// Open a configuration session, refusing if a pass is running
    ///
    /// # Errors
    ///
    /// [`SyncError::ConfigurationRejected`] if a pass or another session holds
    /// the engine. Whoever holds the engine without a session is a pass, even
    /// one that has not raised its flag yet.
    pub fn open_session(&self) -> Result<ConfigSession<'_>> {
        match self.shared.engine.try_lock() {
            Some(engine) => {
                self.shared.session_open.store(true, Ordering::SeqCst);
                debug!("Configuration session opened");
                Ok(ConfigSession {
                    engine,
                    shared: &self.shared,
                })
            }
            None if self.shared.session_open.load(Ordering::SeqCst) => Err(SyncError::rejected(
                "Another configuration session is open; try again shortly.",
            )),
            None => Err(SyncError::rejected(
                "A backup is in progress; settings cannot be changed until it finishes.",
            )),
        }
    }

    /// Whether a pass is running right now
    pub fn is_pass_active(&self) -> bool {
        self.shared.pass_active.load(Ordering::SeqCst)
    }

    /// Sleep between passes, as last configured
    ///
    /// Never waits on the engine lock.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.shared.interval_secs.load(Ordering::SeqCst))
    }

    /// Number of passes attempted so far, failed ones included
    pub fn passes_completed(&self) -> u64 {
        self.shared.passes_completed.load(Ordering::SeqCst)
    }

    /// Report of the last successful pass
    pub fn last_report(&self) -> Option<PassReport> {
        self.shared.last_report.lock().clone()
    }

    /// Snapshot of the current settings, waiting for the engine if busy
    pub fn settings(&self) -> SyncSettings {
        self.shared.engine.lock().settings().clone()
    }

    /// Snapshot of the current settings, or `None` while a pass or session
    /// holds the engine
    pub fn try_settings(&self) -> Option<SyncSettings> {
        self.shared
            .engine
            .try_lock()
            .map(|engine| engine.settings().clone())
    }
}

/// Exclusive, validated access to the settings
///
/// Passes do not start while a session is alive.
pub struct ConfigSession<'a> {
    engine: MutexGuard<'a, SyncEngine>,
    shared: &'a Shared,
}

impl std::fmt::Debug for ConfigSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSession")
            .field("engine", &*self.engine)
            .finish()
    }
}

impl ConfigSession<'_> {
    /// Current settings
    pub fn settings(&self) -> &SyncSettings {
        self.engine.settings()
    }

    /// Change the sleep between passes, in whole seconds
    ///
    /// Takes effect from the next sleep; a sleep in progress is not cut short.
    pub fn set_interval(&mut self, input: &str) -> Result<u64> {
        let secs: u64 = parse_count(input, "Interval")?;
        if secs < MIN_INTERVAL_SECS {
            return Err(SyncError::rejected(format!(
                "Interval must be at least {} second",
                MIN_INTERVAL_SECS
            )));
        }
        self.engine.update_settings(|s| {
            s.interval_secs = secs;
            Ok(())
        })?;
        self.shared.interval_secs.store(secs, Ordering::SeqCst);
        info!("Backup interval set to {}s", secs);
        Ok(secs)
    }

    /// Change how many passes separate two cleanings (0 disables them)
    pub fn set_cleaning_cadence(&mut self, input: &str) -> Result<u32> {
        let passes: u32 = parse_count(input, "Cleaning cadence")?;
        self.engine.update_settings(|s| {
            s.cleaning_cadence = passes;
            Ok(())
        })?;
        info!("Cleaning cadence set to every {} passes", passes);
        Ok(passes)
    }

    /// Change the remote store login and password
    pub fn set_credentials(&mut self, login: &str, password: &str) -> Result<()> {
        if login.chars().count() < MIN_CREDENTIAL_LEN {
            return Err(SyncError::rejected(format!(
                "Login must be at least {} characters",
                MIN_CREDENTIAL_LEN
            )));
        }
        if password.chars().count() < MIN_CREDENTIAL_LEN {
            return Err(SyncError::rejected(format!(
                "Password must be at least {} characters",
                MIN_CREDENTIAL_LEN
            )));
        }
        self.engine.update_settings(|s| {
            s.login = login.to_string();
            s.password = password.to_string();
            Ok(())
        })?;
        info!("Remote credentials updated for '{}'", login);
        Ok(())
    }

    /// Start watching `dir`
    ///
    /// Rejected if `dir` is not an existing directory, is already watched, or
    /// its name collides with the remote namespace of another watched root.
    pub fn add_root(&mut self, dir: &Path) -> Result<PathBuf> {
        if !dir.is_dir() {
            return Err(SyncError::rejected(format!(
                "{} is not an existing directory",
                dir.display()
            )));
        }
        let root = dir
            .canonicalize()
            .map_err(|e| SyncError::rejected(format!("Cannot resolve {}: {}", dir.display(), e)))?;

        let settings = self.engine.settings();
        if settings.is_watched(&root) {
            return Err(SyncError::rejected(format!(
                "{} is already watched",
                root.display()
            )));
        }
        let namespace = RemotePathMapper::namespace_of(&root).ok_or_else(|| {
            SyncError::rejected(format!("{} has no name to back up under", root.display()))
        })?;
        if let Some(other) = settings
            .watched_roots
            .iter()
            .find(|r| RemotePathMapper::namespace_of(r).as_deref() == Some(namespace.as_str()))
        {
            return Err(SyncError::rejected(format!(
                "{} would share the remote folder '{}' with {}",
                root.display(),
                namespace,
                other.display()
            )));
        }

        let added = root.clone();
        self.engine.update_settings(move |s| {
            s.watched_roots.push(root);
            Ok(())
        })?;
        info!("Now watching {:?}", added);
        Ok(added)
    }

    /// Stop watching `dir`
    pub fn remove_root(&mut self, dir: &Path) -> Result<PathBuf> {
        let settings = self.engine.settings();
        let root = if settings.is_watched(dir) {
            dir.to_path_buf()
        } else {
            match dir.canonicalize() {
                Ok(canonical) if settings.is_watched(&canonical) => canonical,
                _ => {
                    return Err(SyncError::rejected(format!(
                        "{} is not watched",
                        dir.display()
                    )))
                }
            }
        };

        let removed = root.clone();
        self.engine.update_settings(move |s| {
            s.unwatch(&root);
            Ok(())
        })?;
        info!("No longer watching {:?}", removed);
        Ok(removed)
    }

    /// Swap the remote store used by subsequent passes
    pub fn replace_store(&mut self, store: Arc<dyn RemoteStore>) {
        self.engine.replace_store(store);
    }
}

impl Drop for ConfigSession<'_> {
    fn drop(&mut self) {
        self.shared.session_open.store(false, Ordering::SeqCst);
        debug!("Configuration session closed");
    }
}

/// Reject anything that is not a bare unsigned integer
fn parse_count<T: std::str::FromStr>(input: &str, what: &str) -> Result<T> {
    let trimmed = input.trim();
    trimmed
        .parse::<T>()
        .map_err(|_| SyncError::rejected(format!("{} must be a whole number, got '{}'", what, trimmed)))
}
