//! Storage root enumeration
//!
//! Yields the candidate store directories (one level below each root).

use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub struct PathEnumerator {
    roots: Vec<PathBuf>,
}

impl PathEnumerator {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Every immediate subdirectory of every existing root, deduplicated.
    pub fn store_dirs(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut dirs = Vec::new();

        for root in &self.roots {
            if !root.is_dir() {
                debug!("Storage root {} does not exist, skipping", root.display());
                continue;
            }

            for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
                match entry {
                    Ok(entry) if entry.file_type().is_dir() => {
                        let path = entry.into_path();
                        if seen.insert(path.clone()) {
                            dirs.push(path);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Failed to read entry under {}: {}", root.display(), e),
                }
            }
        }

        debug!(
            "Enumerated {} store directories across {} roots",
            dirs.len(),
            self.roots.len()
        );
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_yields_only_immediate_directories() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("workspaceStorage");
        std::fs::create_dir_all(root.join("a/nested")).unwrap();
        std::fs::create_dir_all(root.join("b")).unwrap();
        std::fs::write(root.join("stray.txt"), "x").unwrap();

        let enumerator = PathEnumerator::new(vec![root.clone(), tmp.path().join("missing")]);
        let mut dirs = enumerator.store_dirs();
        dirs.sort();

        assert_eq!(dirs, vec![root.join("a"), root.join("b")]);
    }

    #[test]
    fn test_duplicate_roots_do_not_duplicate_dirs() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("one")).unwrap();
        let root = tmp.path().to_path_buf();

        let enumerator = PathEnumerator::new(vec![root.clone(), root]);
        assert_eq!(enumerator.store_dirs().len(), 1);
    }
}
