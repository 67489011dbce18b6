//! Main test module for Backsync
//!
//! This module includes all test suites:
//! - Integration tests for pass, cleaning and session scenarios
//! - Property-based tests for mapping and index invariants

pub mod integration;

#[cfg(test)]
mod edge_cases {
    use ::backsync::*;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn engine_for(dir: &Path, roots: Vec<std::path::PathBuf>, store: Arc<MemoryStore>) -> SyncEngine {
        let settings_store = SettingsStore::new(dir.join("settings.json"));
        let mut settings = SyncSettings::default();
        settings.watched_roots = roots;
        settings.cleaning_cadence = 0;
        SyncEngine::new(settings, settings_store, store).skip_startup_cleaning()
    }

    #[test]
    fn test_empty_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("empty");
        fs::create_dir(&root).unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_for(temp_dir.path(), vec![root], store.clone());

        let report = engine.run_pass().unwrap();
        assert_eq!(report.files_scanned, 0);
        assert!(store.calls().is_empty());
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("docs");
        fs::create_dir(&root).unwrap();

        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "file.multiple.dots.txt",
            "résumé.txt",
            "文件.txt",
        ];
        for name in &special_names {
            fs::write(root.join(name), name.as_bytes()).unwrap();
        }

        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_for(temp_dir.path(), vec![root], store.clone());
        let report = engine.run_pass().unwrap();
        assert_eq!(report.files_uploaded, special_names.len());

        for name in &special_names {
            let remote = format!("/backuper_files/docs/{}", name);
            assert_eq!(store.object(&remote).unwrap(), name.as_bytes());
        }
    }

    #[test]
    fn test_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("docs");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("empty.txt"), "").unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_for(temp_dir.path(), vec![root.clone()], store.clone());
        engine.run_pass().unwrap();

        assert_eq!(store.object("/backuper_files/docs/empty.txt").unwrap(), b"");
        assert_eq!(
            engine.settings().hash_index.get(&root.join("empty.txt")),
            Some(bytes_digest(b"").as_str())
        );
    }

    #[test]
    fn test_deeply_nested_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("docs");
        let mut deep = root.clone();
        for i in 0..12 {
            deep = deep.join(format!("level{}", i));
        }
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("deep.txt"), "deep").unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_for(temp_dir.path(), vec![root], store.clone());
        let report = engine.run_pass().unwrap();

        assert_eq!(report.files_uploaded, 1);
        // Prefix, namespace and twelve levels
        assert_eq!(report.collections_created, 14);
        let created = store.created_collections();
        assert_eq!(created[0], "/backuper_files");
        assert_eq!(created[1], "/backuper_files/docs");
        assert!(created.windows(2).all(|w| w[1].starts_with(&w[0])));
    }

    #[test]
    fn test_file_removed_locally_stays_remote() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("docs");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("gone.txt"), "bye").unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_for(temp_dir.path(), vec![root.clone()], store.clone());
        engine.run_pass().unwrap();
        fs::remove_file(root.join("gone.txt")).unwrap();

        let report = engine.run_pass().unwrap();
        assert_eq!(report.files_scanned, 0);
        assert!(store.object("/backuper_files/docs/gone.txt").is_some());
        assert_eq!(store.deletions(), 0);
    }

    #[test]
    fn test_custom_backup_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("docs");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.txt"), "hello").unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut engine = engine_for(temp_dir.path(), vec![root], store.clone())
            .with_mapper(RemotePathMapper::new("/nightly/"));
        engine.run_pass().unwrap();

        assert_eq!(store.uploads(), vec!["/nightly/docs/a.txt"]);
        let known: Vec<&str> = engine.settings().directory_cache.iter().collect();
        assert_eq!(known, vec!["/nightly", "/nightly/docs"]);
    }

    #[test]
    fn test_missing_settings_document_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let settings_store = SettingsStore::new(temp_dir.path().join("nowhere.json"));
        let err = SyncEngine::open(settings_store, Arc::new(MemoryStore::new())).unwrap_err();
        assert!(matches!(err, SyncError::Persistence { .. }));
    }
}
