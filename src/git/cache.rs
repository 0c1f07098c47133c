//! TTL cache for git identity facts
//!
//! Expiry is decided at read time (`now - timestamp >= ttl` is a miss); the
//! read path never evicts. `sweep_expired` does bulk eviction on an idle timer.

use super::remote::RepoInfo;
use crate::utils::lock;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// One cached resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    pub is_repo: bool,
    pub remote_url: Option<String>,
    pub repo_info: Option<RepoInfo>,
    pub user_name: Option<String>,
    /// An `upstream` remote is configured
    pub has_upstream: bool,
    pub timestamp: DateTime<Utc>,
}

/// Partial write merged into an existing entry
#[derive(Debug, Clone, Default)]
pub struct GitInfoUpdate {
    pub is_repo: Option<bool>,
    pub remote_url: Option<String>,
    pub repo_info: Option<RepoInfo>,
    pub user_name: Option<String>,
    pub has_upstream: Option<bool>,
}

pub struct GitMetadataCache {
    entries: Mutex<HashMap<PathBuf, GitInfo>>,
    ttl: Mutex<Duration>,
}

/// Strip trailing separators and `.` components so equivalent paths share a key.
pub fn normalize_key(path: &Path) -> PathBuf {
    path.components().collect()
}

impl GitMetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Mutex::new(ttl),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, GitInfo>> {
        lock(&self.entries, "git cache")
    }

    pub fn ttl(&self) -> Duration {
        *lock(&self.ttl, "git cache ttl")
    }

    /// Change the TTL policy. Invalidates everything.
    pub fn set_ttl(&self, ttl: Duration) {
        *lock(&self.ttl, "git cache ttl") = ttl;
        self.clear();
    }

    fn is_expired(&self, entry: &GitInfo, now: DateTime<Utc>) -> bool {
        let ttl = ChronoDuration::from_std(self.ttl()).unwrap_or(ChronoDuration::MAX);
        now.signed_duration_since(entry.timestamp) >= ttl
    }

    pub fn get(&self, path: &Path) -> Option<GitInfo> {
        self.get_at(path, Utc::now())
    }

    /// Live entry as of `now`, or `None` when absent or expired.
    pub fn get_at(&self, path: &Path, now: DateTime<Utc>) -> Option<GitInfo> {
        let entries = self.entries();
        let entry = entries.get(&normalize_key(path))?;
        if self.is_expired(entry, now) {
            debug!("Git cache entry expired for {}", path.display());
            return None;
        }
        Some(entry.clone())
    }

    pub fn put(&self, path: &Path, update: GitInfoUpdate) -> GitInfo {
        self.put_at(path, update, Utc::now())
    }

    /// Merge `update` into the entry for `path` and refresh its timestamp.
    ///
    /// Fields the update leaves as `None` keep their previous value.
    pub fn put_at(&self, path: &Path, update: GitInfoUpdate, now: DateTime<Utc>) -> GitInfo {
        let mut entries = self.entries();
        let entry = entries
            .entry(normalize_key(path))
            .or_insert_with(|| GitInfo {
                is_repo: false,
                remote_url: None,
                repo_info: None,
                user_name: None,
                has_upstream: false,
                timestamp: now,
            });

        if let Some(is_repo) = update.is_repo {
            entry.is_repo = is_repo;
        }
        if update.remote_url.is_some() {
            entry.remote_url = update.remote_url;
        }
        if update.repo_info.is_some() {
            entry.repo_info = update.repo_info;
        }
        if update.user_name.is_some() {
            entry.user_name = update.user_name;
        }
        if let Some(has_upstream) = update.has_upstream {
            entry.has_upstream = has_upstream;
        }
        entry.timestamp = now;
        entry.clone()
    }

    pub fn clear(&self) {
        let mut entries = self.entries();
        let count = entries.len();
        entries.clear();
        debug!("Git cache cleared ({} entries)", count);
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    /// Evict every entry expired as of `now`. Returns the eviction count.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = ChronoDuration::from_std(self.ttl()).unwrap_or(ChronoDuration::MAX);
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| now.signed_duration_since(entry.timestamp) < ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("Swept {} expired git cache entries", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
