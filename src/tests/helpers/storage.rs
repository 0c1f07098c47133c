//! A fake editor storage layout under one temp directory:
//!
//! ```text
//! <tmp>/storage/<id>/workspace.json   store directories
//! <tmp>/projects/<name>/              workspace targets
//! <tmp>/trash, <tmp>/state, <tmp>/backups
//! ```

use super::unique_temp_dir;
use crate::config::Config;
use crate::engine::WorkspaceEngine;
use crate::scheduler::FixedPressure;
use crate::workspace::path_to_uri;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub struct FakeStorage {
    pub dir: TempDir,
}

impl FakeStorage {
    pub fn new(test_name: &str) -> Self {
        let dir = unique_temp_dir(test_name);
        std::fs::create_dir_all(dir.path().join("storage")).unwrap();
        std::fs::create_dir_all(dir.path().join("projects")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("storage")
    }

    pub fn trash_files(&self) -> PathBuf {
        self.dir.path().join("trash").join("files")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn backups(&self) -> PathBuf {
        self.dir.path().join("backups")
    }

    /// Create a project directory and return its `file://` URI.
    pub fn project(&self, name: &str) -> (PathBuf, String) {
        let path = self.dir.path().join("projects").join(name);
        std::fs::create_dir_all(&path).unwrap();
        let uri = path_to_uri(&path).unwrap();
        (path, uri)
    }

    /// Create a store directory with raw descriptor contents.
    pub fn store(&self, id: &str, contents: &str) -> PathBuf {
        let store = self.root().join(id);
        std::fs::create_dir_all(&store).unwrap();
        std::fs::write(store.join("workspace.json"), contents).unwrap();
        store
    }

    pub fn folder_store(&self, id: &str, uri: &str) -> PathBuf {
        self.store(id, &format!(r#"{{"folder":"{}"}}"#, uri))
    }

    pub fn workspace_store(&self, id: &str, uri: &str) -> PathBuf {
        self.store(id, &format!(r#"{{"workspace":"{}"}}"#, uri))
    }

    pub fn config(&self) -> Config {
        Config {
            storage_roots: vec![self.root()],
            processing_delay_ms: 50,
            prefetch_idle_delay_ms: 50,
            state_dir: self.state_dir(),
            backup_dir: Some(self.backups()),
            trash_dir: Some(self.dir.path().join("trash")),
            ..Config::default()
        }
    }

    pub fn engine(&self) -> Arc<WorkspaceEngine> {
        self.engine_with(self.config())
    }

    pub fn engine_with(&self, config: Config) -> Arc<WorkspaceEngine> {
        Arc::new(WorkspaceEngine::with_pressure(
            config,
            Arc::new(FixedPressure(None)),
        ))
    }

    /// Names of everything in the trash `files/` directory.
    pub fn trashed(&self) -> Vec<String> {
        match std::fs::read_dir(self.trash_files()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
