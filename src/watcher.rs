//! Storage-root watcher
//!
//! Watches each storage root non-recursively. New or modified store
//! directories are handed to the prefetcher so the next refresh can commit
//! them without reading; removed ones mark the catalog dirty and wake the
//! refresh loop.

use crate::engine::WorkspaceEngine;
use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageChange {
    Added(PathBuf),
    Removed(PathBuf),
}

/// Map a notify event to store-directory changes under `roots`.
pub fn classify(event: &notify::Event, roots: &[PathBuf]) -> Vec<StorageChange> {
    let added = match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => true,
        EventKind::Remove(_) => false,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter_map(|path| store_dir_of(path, roots))
        .map(|store| {
            if added {
                StorageChange::Added(store)
            } else {
                StorageChange::Removed(store)
            }
        })
        .collect()
}

/// The store directory `path` belongs to: a direct child of a root, or the
/// parent of a file directly inside such a child.
fn store_dir_of(path: &Path, roots: &[PathBuf]) -> Option<PathBuf> {
    let parent = path.parent()?;
    if roots.iter().any(|root| root == parent) {
        return Some(path.to_path_buf());
    }
    let grandparent = parent.parent()?;
    if roots.iter().any(|root| root == grandparent) {
        return Some(parent.to_path_buf());
    }
    None
}

pub struct StorageWatcher {
    watcher: Option<RecommendedWatcher>,
    roots: Vec<PathBuf>,
    changed: Arc<Notify>,
}

impl StorageWatcher {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            watcher: None,
            roots,
            changed: Arc::new(Notify::new()),
        }
    }

    /// Notified whenever a store directory disappears.
    pub fn changed(&self) -> Arc<Notify> {
        self.changed.clone()
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Start watching and spawn the forwarding task.
    pub fn start(&mut self, engine: Arc<WorkspaceEngine>) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();

        let mut watcher = notify::recommended_watcher(move |res| {
            if let Err(e) = tx.send(res) {
                error!("Failed to send storage event: {}", e);
            }
        })
        .context("Failed to create storage watcher")?;

        let mut watched = 0;
        for root in &self.roots {
            if !root.is_dir() {
                debug!("Not watching missing root {}", root.display());
                continue;
            }
            watcher
                .watch(root, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {}", root.display()))?;
            watched += 1;
        }
        self.watcher = Some(watcher);
        info!("Watching {} storage roots", watched);

        let roots = self.roots.clone();
        let changed = self.changed.clone();
        tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Storage watcher error: {}", e);
                        continue;
                    }
                };
                for change in classify(&event, &roots) {
                    debug!("Storage change: {:?}", change);
                    match change {
                        StorageChange::Added(store) => {
                            engine.prefetch_idle(&store);
                        }
                        StorageChange::Removed(_) => {
                            engine.mark_dirty();
                            changed.notify_one();
                        }
                    }
                }
            }
            debug!("Storage watcher channel closed");
        });
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            info!("Storage watcher stopped");
        }
    }
}
