// src/workspace/mod.rs
//! Workspace records and store directories
//!
//! A store directory is the editor-managed folder holding a `workspace.json`
//! descriptor. Each [`WorkspaceRecord`] owns exactly one [`StoreDir`]; the
//! handle is not `Clone` and can only be released by consuming it (trash,
//! backup or delete), so a store directory is never aliased by two records.

pub mod trash;

use crate::error::{Result, ScoutError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub use trash::Trash;

/// File name of the descriptor inside a store directory
pub const DESCRIPTOR_FILE: &str = "workspace.json";

/// Upper bound on reading one descriptor; a hung mount counts as a miss
pub const DESCRIPTOR_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Extension of multi-root workspace files
pub const CODE_WORKSPACE_EXT: &str = "code-workspace";

/// What the descriptor points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    Folder,
    WorkspaceFile,
}

/// Parsed contents of a `workspace.json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub uri: String,
    pub kind: DescriptorKind,
}

#[derive(Deserialize)]
struct RawDescriptor {
    folder: Option<String>,
    workspace: Option<String>,
}

impl Descriptor {
    /// Parse descriptor JSON. Unknown fields are ignored; `folder` wins over
    /// `workspace` when both are present.
    pub fn parse(path: &Path, contents: &str) -> Result<Self> {
        Self::from_json(path, contents)?.ok_or_else(|| ScoutError::Parse {
            path: path.to_path_buf(),
            message: "no folder or workspace property".to_string(),
        })
    }

    /// Like [`Descriptor::parse`], but well-formed JSON naming neither a
    /// folder nor a workspace yields `Ok(None)`. Only invalid JSON is an error.
    pub fn from_json(path: &Path, contents: &str) -> Result<Option<Self>> {
        let raw: RawDescriptor = serde_json::from_str(contents).map_err(|e| ScoutError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(match (raw.folder, raw.workspace) {
            (Some(folder), _) if !folder.is_empty() => Some(Self {
                uri: folder,
                kind: DescriptorKind::Folder,
            }),
            (_, Some(workspace)) if !workspace.is_empty() => Some(Self {
                uri: workspace,
                kind: DescriptorKind::WorkspaceFile,
            }),
            _ => None,
        })
    }

    /// JSON body that regenerates this descriptor
    pub fn to_json(&self) -> String {
        let key = match self.kind {
            DescriptorKind::Folder => "folder",
            DescriptorKind::WorkspaceFile => "workspace",
        };
        let mut body = serde_json::Map::new();
        body.insert(key.to_string(), serde_json::Value::String(self.uri.clone()));
        serde_json::Value::Object(body).to_string()
    }

    pub fn target_path(&self) -> Result<PathBuf> {
        uri_to_path(&self.uri)
    }
}

/// Read and parse the descriptor of a store directory.
///
/// Returns `Ok(None)` when the directory has no descriptor at all, or one
/// that names no target. Both are normal for editor-internal store
/// directories and are skipped, not disposed of.
pub async fn read_descriptor(store_dir: &Path) -> Result<Option<Descriptor>> {
    let path = store_dir.join(DESCRIPTOR_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => {
            let descriptor = Descriptor::from_json(&path, &contents)?;
            if descriptor.is_none() {
                debug!("{} names no folder or workspace, skipping", path.display());
            }
            Ok(descriptor)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No {} found in {}", DESCRIPTOR_FILE, store_dir.display());
            Ok(None)
        }
        Err(e) => Err(ScoutError::from_io(path, e)),
    }
}

/// [`read_descriptor`] bounded by [`DESCRIPTOR_READ_TIMEOUT`].
pub async fn read_descriptor_bounded(store_dir: &Path) -> Result<Option<Descriptor>> {
    tokio::time::timeout(DESCRIPTOR_READ_TIMEOUT, read_descriptor(store_dir))
        .await
        .unwrap_or_else(|_| {
            Err(ScoutError::Timeout {
                operation: "descriptor read",
                after: DESCRIPTOR_READ_TIMEOUT,
            })
        })
}

/// Convert a `file://` URI to a local path. Remote schemes are unsupported.
pub fn uri_to_path(uri: &str) -> Result<PathBuf> {
    let url = Url::parse(uri).map_err(|_| ScoutError::UnsupportedUri(uri.to_string()))?;
    if url.scheme() != "file" {
        return Err(ScoutError::UnsupportedUri(uri.to_string()));
    }
    url.to_file_path()
        .map_err(|_| ScoutError::UnsupportedUri(uri.to_string()))
}

/// Convert a local path to a `file://` URI string.
pub fn path_to_uri(path: &Path) -> Option<String> {
    Url::from_file_path(path).ok().map(String::from)
}

/// Exclusively owned handle on a store directory
#[derive(Debug, PartialEq, Eq)]
pub struct StoreDir(PathBuf);

impl StoreDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.0.join(DESCRIPTOR_FILE)
    }

    /// Move the directory to the trash, consuming the handle.
    pub fn trash(self, trash: &Trash) -> Result<PathBuf> {
        trash.move_to_trash(&self.0)
    }

    /// Move the directory into a timestamped folder under `backup_root`.
    pub fn backup(self, backup_root: &Path) -> Result<PathBuf> {
        trash::backup_into(&self.0, backup_root)
    }

    /// Remove the directory permanently.
    pub fn delete(self) -> Result<()> {
        std::fs::remove_dir_all(&self.0).map_err(|e| ScoutError::from_io(&self.0, e))
    }

    /// Give up ownership without touching the filesystem.
    pub fn release(self) -> PathBuf {
        self.0
    }
}

/// A committed catalog entry
#[derive(Debug)]
pub struct WorkspaceRecord {
    pub uri: String,
    pub kind: DescriptorKind,
    /// Local path the URI resolves to
    pub target: PathBuf,
    pub store: StoreDir,
}

impl WorkspaceRecord {
    pub fn new(descriptor: Descriptor, store: StoreDir) -> Result<Self> {
        let target = descriptor.target_path()?;
        Ok(Self {
            uri: descriptor.uri,
            kind: descriptor.kind,
            target,
            store,
        })
    }

    pub fn descriptor(&self) -> Descriptor {
        Descriptor {
            uri: self.uri.clone(),
            kind: self.kind,
        }
    }

    /// Everything the read-only probes need, without touching the handle
    pub fn probe(&self) -> RecordProbe {
        RecordProbe {
            uri: self.uri.clone(),
            target: self.target.clone(),
            descriptor_path: self.store.descriptor_path(),
        }
    }
}

/// Owned copy of the paths needed to validate a record off-lock
#[derive(Debug, Clone)]
pub struct RecordProbe {
    pub uri: String,
    pub target: PathBuf,
    pub descriptor_path: PathBuf,
}
