// src/catalog.rs
//! Workspace Catalog
//!
//! The canonical, deduplicated set of workspace records. Records are keyed by
//! URI: at most one live record per URI. The catalog never touches the
//! filesystem except for read-only probes, and never releases store
//! directories itself; `remove` hands the record back so the caller decides
//! between trash, delete, backup or simply forgetting it.

use crate::workspace::{DescriptorKind, RecordProbe, WorkspaceRecord, read_descriptor};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Read-only copy of a record handed to presentation code
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceView {
    pub uri: String,
    pub kind: DescriptorKind,
    pub target: PathBuf,
    pub store_path: PathBuf,
    #[serde(skip)]
    pub accessed: Option<SystemTime>,
}

/// Outcome of a validation probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// The workspace target vanished
    TargetMissing,
    /// Descriptor missing, unreadable or unparseable
    DescriptorBroken(String),
    /// Descriptor now names a different URI
    DescriptorMismatch(String),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

#[derive(Debug, Default)]
pub struct WorkspaceCatalog {
    records: BTreeMap<String, WorkspaceRecord>,
    by_store: HashMap<PathBuf, String>,
}

impl WorkspaceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless a record with the same URI exists. Returns whether it was inserted.
    ///
    /// A rejected record is dropped without touching its store directory.
    pub fn add(&mut self, record: WorkspaceRecord) -> bool {
        if self.records.contains_key(&record.uri) {
            debug!("Workspace already in catalog: {}", record.uri);
            return false;
        }
        self.by_store
            .insert(record.store.path().to_path_buf(), record.uri.clone());
        self.records.insert(record.uri.clone(), record);
        true
    }

    /// Remove by URI, transferring ownership of the record to the caller.
    pub fn remove(&mut self, uri: &str) -> Option<WorkspaceRecord> {
        let record = self.records.remove(uri)?;
        self.by_store.remove(record.store.path());
        Some(record)
    }

    /// Remove whichever record owns `store_path`.
    pub fn remove_by_store(&mut self, store_path: &Path) -> Option<WorkspaceRecord> {
        let uri = self.by_store.get(store_path)?.clone();
        self.remove(&uri)
    }

    pub fn get(&self, uri: &str) -> Option<&WorkspaceRecord> {
        self.records.get(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.records.contains_key(uri)
    }

    /// Whether a committed record already owns this store directory
    pub fn contains_store(&self, store_path: &Path) -> bool {
        self.by_store.contains_key(store_path)
    }

    pub fn uris(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn probes(&self) -> Vec<RecordProbe> {
        self.records.values().map(WorkspaceRecord::probe).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drain every record, e.g. before clearing all storage roots.
    pub fn drain(&mut self) -> Vec<WorkspaceRecord> {
        self.by_store.clear();
        std::mem::take(&mut self.records).into_values().collect()
    }

    /// Snapshot in URI order; safe to render while the catalog keeps changing.
    pub fn snapshot(&self) -> Vec<WorkspaceView> {
        self.records
            .values()
            .map(|r| WorkspaceView {
                uri: r.uri.clone(),
                kind: r.kind,
                target: r.target.clone(),
                store_path: r.store.path().to_path_buf(),
                accessed: None,
            })
            .collect()
    }

    /// Snapshot ordered by descending access time of the workspace target.
    ///
    /// Targets whose access time cannot be read sort last; ties keep URI order.
    pub fn sorted_by_recency(&self) -> Vec<WorkspaceView> {
        sort_by_recency(self.snapshot())
    }

    /// Re-check a record: target exists, descriptor readable and still names the URI.
    pub async fn check(probe: &RecordProbe) -> Validation {
        match tokio::fs::try_exists(&probe.target).await {
            Ok(true) => {}
            Ok(false) => return Validation::TargetMissing,
            Err(e) => return Validation::DescriptorBroken(e.to_string()),
        }

        let store_dir = match probe.descriptor_path.parent() {
            Some(dir) => dir,
            None => return Validation::DescriptorBroken("descriptor has no parent".into()),
        };

        match read_descriptor(store_dir).await {
            Ok(Some(descriptor)) if descriptor.uri == probe.uri => Validation::Valid,
            Ok(Some(descriptor)) => Validation::DescriptorMismatch(descriptor.uri),
            Ok(None) => {
                Validation::DescriptorBroken("descriptor missing or without target".into())
            }
            Err(e) => Validation::DescriptorBroken(e.to_string()),
        }
    }

    /// `true` when [`Self::check`] finds nothing wrong. Never removes anything.
    pub async fn validate(probe: &RecordProbe) -> bool {
        Self::check(probe).await.is_valid()
    }
}

/// Order an already-taken snapshot by recency, so callers can stat targets
/// without holding the catalog lock.
pub fn sort_by_recency(views: Vec<WorkspaceView>) -> Vec<WorkspaceView> {
    let mut views: Vec<WorkspaceView> = views
        .into_iter()
        .map(|mut v| {
            v.accessed = std::fs::metadata(&v.target)
                .and_then(|m| m.accessed())
                .ok();
            v
        })
        .collect();
    views.sort_by(|a, b| b.accessed.cmp(&a.accessed));
    views
}
