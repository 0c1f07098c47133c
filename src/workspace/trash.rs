//! Best-effort disposal of store directories
//!
//! Trash follows the freedesktop.org layout (`files/` + `info/*.trashinfo`).
//! Backups move a directory under a timestamped folder. Both fall back to a
//! recursive copy when a rename crosses filesystems.

use crate::error::{Result, ScoutError};
use chrono::Local;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct Trash {
    root: PathBuf,
}

impl Trash {
    /// `$XDG_DATA_HOME/Trash`
    pub fn platform() -> Self {
        let root = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("Trash");
        Self { root }
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn info_dir(&self) -> PathBuf {
        self.root.join("info")
    }

    /// Move `path` into the trash. Returns the trashed location.
    pub fn move_to_trash(&self, path: &Path) -> Result<PathBuf> {
        let wrap = |source: io::Error| ScoutError::Trash {
            path: path.to_path_buf(),
            source,
        };

        let files_dir = self.files_dir();
        let info_dir = self.info_dir();
        std::fs::create_dir_all(&files_dir).map_err(wrap)?;
        std::fs::create_dir_all(&info_dir).map_err(wrap)?;

        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "workspace".to_string());
        let name = unique_name(&files_dir, &base);
        let destination = files_dir.join(&name);
        let info_path = info_dir.join(format!("{}.trashinfo", name));

        let original = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let encoded = Url::from_file_path(&original)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| original.to_string_lossy().to_string());
        let info = format!(
            "[Trash Info]\nPath={}\nDeletionDate={}\n",
            encoded,
            Local::now().format("%Y-%m-%dT%H:%M:%S")
        );
        std::fs::write(&info_path, info).map_err(wrap)?;

        if let Err(e) = move_dir(path, &destination) {
            let _ = std::fs::remove_file(&info_path);
            return Err(wrap(e));
        }

        info!("Moved {} to trash", path.display());
        Ok(destination)
    }
}

/// Move `path` to `<backup_root>/<timestamp>/<name>`.
pub fn backup_into(path: &Path, backup_root: &Path) -> Result<PathBuf> {
    let wrap = |source: io::Error| ScoutError::Backup {
        path: path.to_path_buf(),
        source,
    };

    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let folder = backup_root.join(stamp);
    std::fs::create_dir_all(&folder).map_err(wrap)?;

    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "workspace".to_string());
    let destination = folder.join(unique_name(&folder, &base));

    move_dir(path, &destination).map_err(wrap)?;
    info!(
        "Backed up {} to {}",
        path.display(),
        destination.display()
    );
    Ok(destination)
}

fn unique_name(dir: &Path, base: &str) -> String {
    if !dir.join(base).exists() {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}.{}", base, n))
        .find(|candidate| !dir.join(candidate).exists())
        .unwrap_or_else(|| base.to_string())
}

fn move_dir(from: &Path, to: &Path) -> io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!("Rename crosses devices, copying {}", from.display());
            copy_tree(from, to)?;
            std::fs::remove_dir_all(from)
        }
        Err(e) => Err(e),
    }
}

/// Recursively copy a directory tree.
pub fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
