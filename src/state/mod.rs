//! Persisted derived state
//!
//! Usage statistics, tags, favorites and groups, each stored as its own
//! versioned JSON document under the state directory. Loading is tolerant: a
//! missing file is empty state and a corrupt file is logged and replaced by
//! empty state. Saving writes a temp file and renames it over the original.

mod collections;
mod usage;

pub use collections::{Favorites, Group, Groups, TagStore};
pub use usage::{UsageStats, WorkspaceUsage};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current on-disk version of every state document
pub const STATE_VERSION: u32 = 1;

/// A JSON document living under the state directory
pub trait StateDocument: Serialize + DeserializeOwned + Default {
    const FILE_NAME: &'static str;

    /// Drop everything recorded for `uri`. Returns whether anything changed.
    fn forget(&mut self, uri: &str) -> bool;
}

fn default_version() -> u32 {
    STATE_VERSION
}

pub fn document_path<T: StateDocument>(state_dir: &Path) -> PathBuf {
    state_dir.join(T::FILE_NAME)
}

/// Read a document, or default state if it is missing or corrupt.
pub fn load<T: StateDocument>(state_dir: &Path) -> Result<T> {
    let path = document_path::<T>(state_dir);
    if !path.exists() {
        debug!("No {} yet, starting empty", path.display());
        return Ok(T::default());
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read state file {}", path.display()))?;

    match serde_json::from_str::<T>(&contents) {
        Ok(document) => Ok(document),
        Err(e) => {
            warn!("State file corrupt ({}), starting fresh: {}", path.display(), e);
            Ok(T::default())
        }
    }
}

/// Write a document atomically: temp file, then rename.
pub fn save<T: StateDocument>(state_dir: &Path, document: &T) -> Result<()> {
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;

    let path = document_path::<T>(state_dir);
    let contents = serde_json::to_string_pretty(document)
        .with_context(|| format!("Failed to serialize {}", T::FILE_NAME))?;

    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, contents)
        .with_context(|| format!("Failed to write temp state at {}", temp_path.display()))?;
    std::fs::rename(&temp_path, &path).with_context(|| {
        format!("Failed to rename {} to {}", temp_path.display(), path.display())
    })?;
    Ok(())
}

/// Load, apply `change`, and save only if `change` reports a modification.
pub fn update<T, R>(state_dir: &Path, change: impl FnOnce(&mut T) -> (bool, R)) -> Result<R>
where
    T: StateDocument,
{
    let mut document = load::<T>(state_dir)?;
    let (changed, result) = change(&mut document);
    if changed {
        save(state_dir, &document)?;
    }
    Ok(result)
}

/// Remove `uri` from every state document.
pub fn forget_everywhere(state_dir: &Path, uri: &str) -> Result<()> {
    update::<UsageStats, _>(state_dir, |d| (d.forget(uri), ()))?;
    update::<TagStore, _>(state_dir, |d| (d.forget(uri), ()))?;
    update::<Favorites, _>(state_dir, |d| (d.forget(uri), ()))?;
    update::<Groups, _>(state_dir, |d| (d.forget(uri), ()))?;
    Ok(())
}
