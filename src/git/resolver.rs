//! Read-through git identity resolution
//!
//! Reads `.git/config` (following `gitdir:` links for worktrees) under a fixed
//! timeout. A timeout is a miss: nothing is cached and no error is raised.

use super::cache::{GitInfo, GitInfoUpdate, GitMetadataCache};
use super::remote::{parse_git_config, parse_remote_url};
use crate::error::ScoutError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Upper bound for reading git config files
pub const GIT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of one resolution with its cost, fed to the load-shedding window
#[derive(Debug, Clone)]
pub struct Resolution {
    pub info: Option<GitInfo>,
    pub elapsed: Duration,
    pub cache_hit: bool,
}

pub struct GitResolver {
    cache: Arc<GitMetadataCache>,
    read_timeout: Duration,
    global_config: Option<PathBuf>,
}

impl GitResolver {
    pub fn new(cache: Arc<GitMetadataCache>) -> Self {
        Self {
            cache,
            read_timeout: GIT_READ_TIMEOUT,
            global_config: dirs::home_dir().map(|home| home.join(".gitconfig")),
        }
    }

    pub fn with_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Override (or disable) the global `~/.gitconfig` fallback for `user.name`.
    pub fn with_global_config(mut self, path: Option<PathBuf>) -> Self {
        self.global_config = path;
        self
    }

    pub fn cache(&self) -> &Arc<GitMetadataCache> {
        &self.cache
    }

    /// Cached identity for `workspace`, resolving on a miss.
    pub async fn resolve(&self, workspace: &Path) -> Resolution {
        let started = Instant::now();
        if let Some(info) = self.cache.get(workspace) {
            return Resolution {
                info: Some(info),
                elapsed: started.elapsed(),
                cache_hit: true,
            };
        }

        let info = match timeout(self.read_timeout, self.read_identity(workspace)).await {
            Ok(update) => Some(self.cache.put(workspace, update)),
            Err(_) => {
                let miss = ScoutError::Timeout {
                    operation: "git metadata read",
                    after: self.read_timeout,
                };
                debug!("{} for {}", miss, workspace.display());
                None
            }
        };

        Resolution {
            info,
            elapsed: started.elapsed(),
            cache_hit: false,
        }
    }

    async fn read_identity(&self, workspace: &Path) -> GitInfoUpdate {
        let Some(config_path) = locate_config(workspace).await else {
            return GitInfoUpdate {
                is_repo: Some(false),
                ..Default::default()
            };
        };

        let contents = match tokio::fs::read_to_string(&config_path).await {
            Ok(contents) => contents,
            Err(e) => {
                debug!("Unreadable git config {}: {}", config_path.display(), e);
                return GitInfoUpdate {
                    is_repo: Some(true),
                    ..Default::default()
                };
            }
        };

        let config = parse_git_config(&contents);
        let remote_url = config.preferred_remote().map(|(_, url)| url.to_string());
        let repo_info = remote_url.as_deref().and_then(parse_remote_url);

        let user_name = match config.user_name.clone() {
            Some(name) => Some(name),
            None => self.global_user_name().await,
        };

        GitInfoUpdate {
            is_repo: Some(true),
            remote_url,
            repo_info,
            user_name,
            has_upstream: Some(config.remote("upstream").is_some()),
        }
    }

    async fn global_user_name(&self) -> Option<String> {
        let path = self.global_config.as_ref()?;
        let contents = tokio::fs::read_to_string(path).await.ok()?;
        parse_git_config(&contents).user_name
    }
}

/// Find the config file of the repository rooted at `workspace`.
async fn locate_config(workspace: &Path) -> Option<PathBuf> {
    let dot_git = workspace.join(".git");
    let metadata = tokio::fs::metadata(&dot_git).await.ok()?;

    if metadata.is_dir() {
        return Some(dot_git.join("config"));
    }

    // Worktrees and submodules: `.git` is a file containing `gitdir: <path>`
    let pointer = tokio::fs::read_to_string(&dot_git).await.ok()?;
    let gitdir = pointer.trim().strip_prefix("gitdir:")?.trim();
    let gitdir = workspace.join(gitdir);

    // A worktree's own gitdir has a `commondir` pointing back at the main repo
    let common = match tokio::fs::read_to_string(gitdir.join("commondir")).await {
        Ok(rel) => gitdir.join(rel.trim()),
        Err(_) => gitdir,
    };
    Some(common.join("config"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver() -> GitResolver {
        GitResolver::new(Arc::new(GitMetadataCache::new(Duration::from_secs(300))))
            .with_global_config(None)
    }

    #[tokio::test]
    async fn test_non_repo_is_cached_negative() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver();

        let first = resolver.resolve(dir.path()).await;
        assert!(!first.cache_hit);
        assert!(!first.info.unwrap().is_repo);

        let second = resolver.resolve(dir.path()).await;
        assert!(second.cache_hit);
    }

    #[tokio::test]
    async fn test_resolves_upstream_owner() {
        let dir = TempDir::new().unwrap();
        let git = dir.path().join(".git");
        std::fs::create_dir_all(&git).unwrap();
        std::fs::write(
            git.join("config"),
            "[remote \"origin\"]\n\turl = git@github.com:me/proj.git\n\
             [remote \"upstream\"]\n\turl = https://github.com/Org/Proj.git\n\
             [user]\n\tname = me\n",
        )
        .unwrap();

        let info = resolver().resolve(dir.path()).await.info.unwrap();
        assert!(info.is_repo);
        assert!(info.has_upstream);
        assert_eq!(info.repo_info.unwrap().slug(), "org/proj");
        assert_eq!(info.user_name.as_deref(), Some("me"));
    }

    #[tokio::test]
    async fn test_worktree_gitdir_pointer() {
        let dir = TempDir::new().unwrap();
        let main_git = dir.path().join("main/.git");
        std::fs::create_dir_all(main_git.join("worktrees/wt")).unwrap();
        std::fs::write(
            main_git.join("config"),
            "[remote \"origin\"]\nurl = https://github.com/o/r.git\n",
        )
        .unwrap();
        std::fs::write(main_git.join("worktrees/wt/commondir"), "../..\n").unwrap();

        let worktree = dir.path().join("wt");
        std::fs::create_dir_all(&worktree).unwrap();
        std::fs::write(
            worktree.join(".git"),
            format!("gitdir: {}\n", main_git.join("worktrees/wt").display()),
        )
        .unwrap();

        let info = resolver().resolve(&worktree).await.info.unwrap();
        assert_eq!(info.repo_info.unwrap().slug(), "o/r");
        assert!(!info.has_upstream);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_config_read_is_uncached_miss() {
        let dir = TempDir::new().unwrap();
        let git = dir.path().join(".git");
        std::fs::create_dir_all(&git).unwrap();
        // Opening a FIFO for reading blocks until a writer shows up
        let fifo = git.join("config");
        let status = std::process::Command::new("mkfifo")
            .arg(&fifo)
            .status()
            .unwrap();
        assert!(status.success());

        let resolver = resolver().with_timeout(Duration::from_millis(50));
        let resolution = resolver.resolve(dir.path()).await;

        assert!(resolution.info.is_none());
        assert!(!resolution.cache_hit);
        assert!(resolver.cache().is_empty());

        // Release the blocked reader so the runtime can shut down
        drop(std::fs::OpenOptions::new().write(true).open(&fifo).unwrap());
    }
}
