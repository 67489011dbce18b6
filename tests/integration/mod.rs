//! Integration tests for Backsync
//!
//! Drives whole passes through the engine and coordinator against the
//! in-memory store: incremental uploads, the cleaning cycle, root pruning,
//! and the pass/session mutual exclusion.

use ::backsync::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use tempfile::TempDir;
use tracing::info;

/// A settings document on disk plus one watched root named `docs`
pub struct SyncHarness {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub settings_store: SettingsStore,
}

impl SyncHarness {
    /// Create the root and write a settings document watching it
    pub fn new(cleaning_cadence: u32) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("docs");
        fs::create_dir(&root).unwrap();

        let settings_store = SettingsStore::new(temp_dir.path().join("settings.json"));
        let mut settings = settings_store.init(false).unwrap();
        settings.watched_roots.push(root.clone());
        settings.cleaning_cadence = cleaning_cadence;
        settings_store.save(&settings).unwrap();

        Self {
            temp_dir,
            root,
            settings_store,
        }
    }

    /// Write `content` at `relative` under the root, creating directories
    pub fn write(&self, relative: &str, content: &str) {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    /// Engine over the document on disk
    pub fn engine(&self, store: Arc<dyn RemoteStore>) -> SyncEngine {
        SyncEngine::open(self.settings_store.clone(), store).unwrap()
    }

    /// Raw bytes of the settings document
    pub fn settings_on_disk(&self) -> Vec<u8> {
        fs::read(self.settings_store.path()).unwrap()
    }
}

/// Store whose uploads block until released, to hold a pass open
pub struct GatedStore {
    inner: MemoryStore,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl GatedStore {
    /// Returns the store, a receiver notified when an upload starts, and a
    /// sender that lets one upload proceed
    pub fn new() -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Self {
            inner: MemoryStore::new(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        (store, entered_rx, release_tx)
    }
}

impl RemoteStore for GatedStore {
    fn create_collection(&self, path: &str) -> Result<()> {
        self.inner.create_collection(path)
    }

    fn put_object(&self, local_file: &Path, remote_path: &str) -> Result<()> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        self.inner.put_object(local_file, remote_path)
    }

    fn delete_collection(&self, path: &str) -> Result<()> {
        self.inner.delete_collection(path)
    }
}

/// Store that deletes a local file while another one is being uploaded
pub struct VanishingStore {
    inner: MemoryStore,
    trigger: String,
    victim: PathBuf,
}

impl VanishingStore {
    /// Remove `victim` from disk when `trigger` is uploaded
    pub fn new(trigger: impl Into<String>, victim: impl Into<PathBuf>) -> Self {
        Self {
            inner: MemoryStore::new(),
            trigger: trigger.into(),
            victim: victim.into(),
        }
    }
}

impl RemoteStore for VanishingStore {
    fn create_collection(&self, path: &str) -> Result<()> {
        self.inner.create_collection(path)
    }

    fn put_object(&self, local_file: &Path, remote_path: &str) -> Result<()> {
        if remote_path == self.trigger {
            let _ = fs::remove_file(&self.victim);
        }
        self.inner.put_object(local_file, remote_path)
    }

    fn delete_collection(&self, path: &str) -> Result<()> {
        self.inner.delete_collection(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_incremental_uploads() {
        let harness = SyncHarness::new(0);
        harness.write("a.txt", "hello");
        harness.write("sub/b.txt", "world");

        let store = Arc::new(MemoryStore::new());
        let mut engine = harness.engine(store.clone()).skip_startup_cleaning();

        // First pass uploads both files
        let report = engine.run_pass().unwrap();
        assert_eq!(report.kind, PassKind::Upload);
        let mut uploads = store.uploads();
        uploads.sort();
        assert_eq!(
            uploads,
            vec!["/backuper_files/docs/a.txt", "/backuper_files/docs/sub/b.txt"]
        );
        assert_eq!(
            store.created_collections(),
            vec!["/backuper_files", "/backuper_files/docs", "/backuper_files/docs/sub"]
        );
        assert_eq!(store.object("/backuper_files/docs/sub/b.txt").unwrap(), b"world");

        // Nothing changed, nothing uploaded
        store.clear_calls();
        let report = engine.run_pass().unwrap();
        assert_eq!(report.files_unchanged, 2);
        assert!(store.calls().is_empty());

        // Exactly the modified file goes up
        harness.write("a.txt", "hello2");
        let report = engine.run_pass().unwrap();
        info!("Third pass: {:?}", report);
        assert_eq!(report.files_uploaded, 1);
        assert_eq!(store.uploads(), vec!["/backuper_files/docs/a.txt"]);
        assert_eq!(store.object("/backuper_files/docs/a.txt").unwrap(), b"hello2");
    }

    #[test]
    fn test_cleaning_cadence_of_two() {
        let harness = SyncHarness::new(2);
        harness.write("a.txt", "hello");

        let store = Arc::new(MemoryStore::new());
        let mut engine = harness.engine(store.clone());

        let mut cleaning_passes = Vec::new();
        for pass in 1..=8 {
            let before = store.deletions();
            let report = engine.run_pass().unwrap();
            if store.deletions() > before {
                assert_eq!(report.kind, PassKind::Cleaning);
                cleaning_passes.push(pass);
            }
        }
        assert_eq!(cleaning_passes, vec![1, 3, 5, 7]);
    }

    #[test]
    fn test_cleaning_disabled_still_cleans_at_startup() {
        let harness = SyncHarness::new(0);
        harness.write("a.txt", "hello");

        let store = Arc::new(MemoryStore::new());
        let mut engine = harness.engine(store.clone());
        for _ in 0..5 {
            engine.run_pass().unwrap();
        }
        assert_eq!(store.deletions(), 1);
    }

    #[test]
    fn test_everything_reuploaded_after_cleaning() {
        let harness = SyncHarness::new(2);
        harness.write("a.txt", "hello");
        harness.write("sub/b.txt", "world");

        let store = Arc::new(MemoryStore::new());
        let mut engine = harness.engine(store.clone());

        assert_eq!(engine.run_pass().unwrap().kind, PassKind::Cleaning);
        assert_eq!(engine.run_pass().unwrap().files_uploaded, 2);

        let report = engine.run_pass().unwrap();
        assert_eq!(report.kind, PassKind::Cleaning);
        assert!(store.object_paths().is_empty());
        let saved = harness.settings_store.load().unwrap();
        assert!(saved.hash_index.is_empty());
        assert!(saved.directory_cache.is_empty());
        assert!(saved.last_cleaning.is_some());

        // Unchanged files go up again, collections are recreated
        let report = engine.run_pass().unwrap();
        assert_eq!(report.files_uploaded, 2);
        assert!(store.has_collection("/backuper_files/docs/sub"));
    }

    #[test]
    fn test_caches_persist_across_restart() {
        let harness = SyncHarness::new(0);
        harness.write("sub/b.txt", "world");

        let store = Arc::new(MemoryStore::new());
        let mut engine = harness.engine(store.clone()).skip_startup_cleaning();
        engine.run_pass().unwrap();
        drop(engine);

        // A fresh engine over the saved document knows the file and folders
        store.clear_calls();
        let mut engine = harness.engine(store.clone()).skip_startup_cleaning();
        let report = engine.run_pass().unwrap();
        assert_eq!(report.files_unchanged, 1);
        assert!(store.calls().is_empty());

        harness.write("sub/c.txt", "new");
        engine.run_pass().unwrap();
        assert!(store.created_collections().is_empty());
        assert_eq!(store.uploads(), vec!["/backuper_files/docs/sub/c.txt"]);
    }

    #[test]
    fn test_vanished_root_is_pruned_and_persisted() {
        let harness = SyncHarness::new(0);
        let photos = harness.temp_dir.path().join("photos");
        fs::create_dir(&photos).unwrap();
        fs::write(photos.join("p.jpg"), "jpeg").unwrap();
        harness.write("a.txt", "hello");

        let mut settings = harness.settings_store.load().unwrap();
        settings.watched_roots.insert(0, photos.clone());
        harness.settings_store.save(&settings).unwrap();
        fs::remove_dir_all(&photos).unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut engine = harness.engine(store.clone()).skip_startup_cleaning();
        let report = engine.run_pass().unwrap();

        // The remaining root is still backed up
        assert_eq!(report.pruned_roots, vec![photos]);
        assert_eq!(report.files_uploaded, 1);
        assert_eq!(
            harness.settings_store.load().unwrap().watched_roots,
            vec![harness.root.clone()]
        );
    }

    #[test]
    fn test_colliding_root_names_are_skipped() {
        let harness = SyncHarness::new(0);
        harness.write("a.txt", "first");
        let other = harness.temp_dir.path().join("elsewhere").join("docs");
        fs::create_dir_all(&other).unwrap();
        fs::write(other.join("a.txt"), "second").unwrap();

        let mut settings = harness.settings_store.load().unwrap();
        settings.watched_roots.push(other.clone());
        harness.settings_store.save(&settings).unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut engine = harness.engine(store.clone()).skip_startup_cleaning();
        let report = engine.run_pass().unwrap();

        assert_eq!(report.skipped_roots, vec![other.clone()]);
        assert_eq!(store.object("/backuper_files/docs/a.txt").unwrap(), b"first");
        // Skipped, not pruned
        assert!(harness.settings_store.load().unwrap().is_watched(&other));
    }

    #[test]
    fn test_transport_failures_do_not_abort_the_pass() {
        let harness = SyncHarness::new(0);
        harness.write("a.txt", "a");
        harness.write("b.txt", "b");
        harness.write("c.txt", "c");

        let store = Arc::new(MemoryStore::new());
        store.fail_object("/backuper_files/docs/b.txt");
        let mut engine = harness.engine(store.clone()).skip_startup_cleaning();

        let report = engine.run_pass().unwrap();
        assert_eq!(report.files_uploaded, 2);
        assert_eq!(report.files_failed, 1);
        assert!(!report.is_complete());

        let saved = harness.settings_store.load().unwrap();
        assert!(saved.hash_index.get(&harness.root.join("b.txt")).is_none());
        assert!(saved.hash_index.get(&harness.root.join("c.txt")).is_some());
    }

    #[test]
    fn test_unreadable_file_is_skipped_and_pass_continues() {
        let harness = SyncHarness::new(0);
        harness.write("a.txt", "a");
        harness.write("b.txt", "b");
        harness.write("c.txt", "c");
        let victim = harness.root.join("b.txt");

        // Files are walked in name order, so b.txt disappears before its digest
        let store = Arc::new(VanishingStore::new("/backuper_files/docs/a.txt", &victim));
        let mut engine = harness.engine(store.clone()).skip_startup_cleaning();
        let report = engine.run_pass().unwrap();

        assert_eq!(report.files_failed, 1);
        assert_eq!(report.files_uploaded, 2);
        assert_eq!(
            store.inner.uploads(),
            vec!["/backuper_files/docs/a.txt", "/backuper_files/docs/c.txt"]
        );
        assert!(engine.settings().hash_index.get(&victim).is_none());
        let saved = harness.settings_store.load().unwrap();
        assert!(saved.hash_index.get(&victim).is_none());
        assert!(saved.hash_index.get(&harness.root.join("c.txt")).is_some());
    }

    #[test]
    fn test_root_that_cannot_be_listed_is_pruned() {
        let harness = SyncHarness::new(0);
        harness.write("a.txt", "hello");

        // Exists, but is not a directory
        let not_a_dir = harness.temp_dir.path().join("notes");
        fs::write(&not_a_dir, "plain file").unwrap();
        let mut settings = harness.settings_store.load().unwrap();
        settings.watched_roots.insert(0, not_a_dir.clone());
        harness.settings_store.save(&settings).unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut engine = harness.engine(store.clone()).skip_startup_cleaning();
        let report = engine.run_pass().unwrap();

        assert_eq!(report.pruned_roots, vec![not_a_dir.clone()]);
        assert_eq!(report.files_uploaded, 1);
        assert!(!harness.settings_store.load().unwrap().is_watched(&not_a_dir));
        assert!(not_a_dir.exists());
    }

    #[test]
    fn test_failed_collection_is_retried_next_pass() {
        let harness = SyncHarness::new(0);
        harness.write("sub/b.txt", "world");

        let store = Arc::new(MemoryStore::new());
        let mut engine = harness.engine(store.clone()).skip_startup_cleaning();

        store.fail_next_creates(1);
        let report = engine.run_pass().unwrap();
        assert_eq!(report.files_failed, 1);
        assert!(engine.settings().directory_cache.is_empty());
        assert!(engine.settings().hash_index.is_empty());

        let report = engine.run_pass().unwrap();
        assert_eq!(report.files_uploaded, 1);
        assert!(engine.settings().directory_cache.contains("/backuper_files/docs/sub"));
    }

    #[test]
    fn test_session_rejected_while_pass_active() {
        let harness = SyncHarness::new(0);
        harness.write("a.txt", "hello");

        let (store, entered, release) = GatedStore::new();
        let engine = harness.engine(Arc::new(store)).skip_startup_cleaning();
        let coordinator = Coordinator::new(engine);
        let before = harness.settings_on_disk();

        let pass = {
            let coordinator = coordinator.clone();
            thread::spawn(move || coordinator.run_pass())
        };
        entered.recv_timeout(Duration::from_secs(10)).unwrap();

        assert!(coordinator.is_pass_active());
        let err = coordinator.open_session().unwrap_err();
        assert!(err.is_rejection());
        assert!(err.user_message().contains("backup is in progress"));
        assert_eq!(harness.settings_on_disk(), before);
        assert_eq!(coordinator.interval(), Duration::from_secs(3600));

        release.send(()).unwrap();
        let report = pass.join().unwrap().unwrap();
        assert_eq!(report.files_uploaded, 1);

        // Once the pass is over the change goes through
        assert!(!coordinator.is_pass_active());
        coordinator.open_session().unwrap().set_interval("120").unwrap();
        assert_eq!(harness.settings_store.load().unwrap().interval_secs, 120);
    }

    #[test]
    fn test_pass_waits_for_open_session() {
        let harness = SyncHarness::new(0);
        harness.write("a.txt", "hello");

        let store = Arc::new(MemoryStore::new());
        let coordinator = Coordinator::new(harness.engine(store.clone()).skip_startup_cleaning());

        let session = coordinator.open_session().unwrap();
        let pass = {
            let coordinator = coordinator.clone();
            thread::spawn(move || coordinator.run_pass())
        };
        thread::sleep(Duration::from_millis(100));
        assert_eq!(coordinator.passes_completed(), 0);
        assert!(store.calls().is_empty());

        drop(session);
        pass.join().unwrap().unwrap();
        assert_eq!(coordinator.passes_completed(), 1);
        assert_eq!(store.uploads(), vec!["/backuper_files/docs/a.txt"]);
    }

    #[test]
    fn test_replaced_store_used_by_next_pass() {
        let harness = SyncHarness::new(0);
        harness.write("a.txt", "hello");

        let old_store = Arc::new(MemoryStore::new());
        let new_store = Arc::new(MemoryStore::new());
        let coordinator = Coordinator::new(harness.engine(old_store.clone()).skip_startup_cleaning());

        {
            let mut session = coordinator.open_session().unwrap();
            session.set_credentials("ann", "hunter2").unwrap();
            session.replace_store(new_store.clone());
        }
        coordinator.run_pass().unwrap();

        assert!(old_store.calls().is_empty());
        assert_eq!(new_store.uploads(), vec!["/backuper_files/docs/a.txt"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scheduler_drives_passes() {
        let harness = SyncHarness::new(2);
        harness.write("a.txt", "hello");

        let store = Arc::new(MemoryStore::new());
        let coordinator = Coordinator::new(harness.engine(store.clone()));
        coordinator.open_session().unwrap().set_interval("1").unwrap();

        let handle = Scheduler::new(coordinator.clone()).spawn();
        tokio::time::timeout(Duration::from_secs(30), async {
            while coordinator.passes_completed() < 2 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        handle.shutdown().await;

        assert_eq!(store.calls()[0], RemoteCall::DeleteCollection("/backuper_files".into()));
        assert!(store.uploads().contains(&"/backuper_files/docs/a.txt".to_string()));
        assert_eq!(coordinator.last_report().unwrap().kind, PassKind::Upload);
    }
}
