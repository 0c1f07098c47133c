// src/engine.rs
//! Workspace Engine
//!
//! The single context object owning the catalog, the git cache, the queues,
//! the scheduler, the prefetch engine and the recovery manager. Collaborators
//! receive `Arc` handles from here; there is no global state.
//!
//! Lock discipline: the catalog is a std mutex that is never held across an
//! await. Every operation snapshots what it needs, releases the lock, does
//! its I/O, and re-locks to apply the result.

use crate::catalog::{Validation, WorkspaceCatalog, WorkspaceView, sort_by_recency};
use crate::config::Config;
use crate::enumerator::PathEnumerator;
use crate::error::{Result, ScoutError};
use crate::git::{GitMetadataCache, GitResolver};
use crate::naming::display_name;
use crate::prefetch::PrefetchEngine;
use crate::recovery::{HealthState, RecoveryManager, SweepAction};
use crate::scheduler::{
    BatchScheduler, EnqueueOutcome, FailedItem, ItemProcessor, ItemReport, PathQueues,
    PressureProbe, RunSummary, SchedulerSettings, SystemPressure,
};
use crate::state::{self, UsageStats};
use crate::utils::lock;
use crate::workspace::{
    CODE_WORKSPACE_EXT, Descriptor, DescriptorKind, RecordProbe, StoreDir, Trash,
    WorkspaceRecord, path_to_uri, read_descriptor_bounded, trash::copy_tree,
};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How `remove` disposes of the store directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalMode {
    /// Move to the platform trash
    Trash,
    /// Delete permanently and drop persisted state
    Delete,
    /// Drop the record only; the store directory stays
    Forget,
}

/// Launch request handed to the external launcher. Never executed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenIntent {
    pub command: String,
    pub args: Vec<String>,
    pub uri: String,
}

/// Catalog entry enriched for presentation
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceEntry {
    pub name: String,
    #[serde(flatten)]
    pub view: WorkspaceView,
    pub health: HealthState,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub discovered: usize,
    pub from_prefetch: usize,
    pub run: RunSummary,
    pub validation: ValidationReport,
    pub preferred_files: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub checked: usize,
    pub removed: usize,
    pub recovered: usize,
    pub degraded: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub expired_git_entries: usize,
    pub recovered: usize,
    pub quarantined: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClearReport {
    pub backups: Vec<PathBuf>,
    pub deleted: usize,
    pub purged: usize,
}

/// Foreground work for one store directory: read, check, resolve, commit.
pub struct DescriptorProcessor {
    catalog: Arc<Mutex<WorkspaceCatalog>>,
    queues: Arc<PathQueues>,
    git: Arc<GitResolver>,
    recovery: Arc<RecoveryManager>,
    trash: Trash,
}

impl DescriptorProcessor {
    async fn dispose(&self, store_path: &Path) {
        trash_blocking(&self.trash, StoreDir::new(store_path)).await;
    }

    /// Commit an already-parsed descriptor.
    async fn commit(&self, store_path: &Path, descriptor: Descriptor) -> Result<ItemReport> {
        let target = match descriptor.target_path() {
            Ok(target) => target,
            Err(ScoutError::UnsupportedUri(uri)) => {
                debug!("Skipping non-local workspace {}", uri);
                return Ok(ItemReport::default());
            }
            Err(e) => return Err(e),
        };

        let metadata = match tokio::fs::metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Workspace target {} vanished, trashing {}",
                    target.display(),
                    store_path.display()
                );
                self.dispose(store_path).await;
                return Err(ScoutError::NotFound(target));
            }
            Err(e) => return Err(ScoutError::from_io(&target, e)),
        };

        let mut report = ItemReport::default();
        if descriptor.kind == DescriptorKind::Folder && metadata.is_dir() {
            let resolution = self.git.resolve(&target).await;
            if !resolution.cache_hit {
                report.metadata_time = Some(resolution.elapsed);
            }
        }

        let record = WorkspaceRecord::new(descriptor, StoreDir::new(store_path))?;
        let uri = record.uri.clone();
        if lock(&self.catalog, "catalog").add(record) {
            self.recovery.record_validation(&uri, true);
            debug!("Committed workspace {}", uri);
        }
        Ok(report)
    }
}

#[async_trait]
impl ItemProcessor for DescriptorProcessor {
    async fn process(&self, path: &Path) -> Result<ItemReport> {
        let descriptor = match self.queues.take_prefetched(path) {
            Some(descriptor) => descriptor,
            None => match read_descriptor_bounded(path).await {
                Ok(Some(descriptor)) => descriptor,
                Ok(None) => return Ok(ItemReport::default()),
                Err(e @ ScoutError::Parse { .. }) => {
                    warn!("{}", e);
                    self.dispose(path).await;
                    return Ok(ItemReport::default());
                }
                Err(e) => return Err(e),
            },
        };
        self.commit(path, descriptor).await
    }
}

pub struct WorkspaceEngine {
    config: Config,
    catalog: Arc<Mutex<WorkspaceCatalog>>,
    queues: Arc<PathQueues>,
    git: Arc<GitResolver>,
    recovery: Arc<RecoveryManager>,
    processor: Arc<DescriptorProcessor>,
    scheduler: BatchScheduler<DescriptorProcessor>,
    prefetch: Arc<PrefetchEngine>,
    trash: Trash,
    dirty: AtomicBool,
}

impl WorkspaceEngine {
    pub fn new(config: Config) -> Self {
        Self::with_pressure(config, Arc::new(SystemPressure::new()))
    }

    pub fn with_pressure(config: Config, pressure: Arc<dyn PressureProbe>) -> Self {
        let catalog = Arc::new(Mutex::new(WorkspaceCatalog::new()));
        let queues = Arc::new(PathQueues::new());
        let cache = Arc::new(GitMetadataCache::new(config.git_cache_ttl()));
        let git = Arc::new(GitResolver::new(cache));
        let recovery = Arc::new(RecoveryManager::new());
        let trash = config
            .trash_dir
            .clone()
            .map(Trash::at)
            .unwrap_or_else(Trash::platform);

        let processor = Arc::new(DescriptorProcessor {
            catalog: catalog.clone(),
            queues: queues.clone(),
            git: git.clone(),
            recovery: recovery.clone(),
            trash: trash.clone(),
        });
        let scheduler = BatchScheduler::new(
            processor.clone(),
            queues.clone(),
            SchedulerSettings::from_config(&config),
            pressure,
        );
        let prefetch = Arc::new(PrefetchEngine::new(
            queues.clone(),
            scheduler.running_flag(),
            catalog.clone(),
            &config,
        ));

        Self {
            config,
            catalog,
            queues,
            git,
            recovery,
            processor,
            scheduler,
            prefetch,
            trash,
            dirty: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Mutex<WorkspaceCatalog>> {
        &self.catalog
    }

    pub fn scheduler(&self) -> &BatchScheduler<DescriptorProcessor> {
        &self.scheduler
    }

    pub fn prefetch(&self) -> &Arc<PrefetchEngine> {
        &self.prefetch
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    pub fn git_cache(&self) -> &Arc<GitMetadataCache> {
        self.git.cache()
    }

    /// Something on disk changed since the last refresh.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Scan every storage root, process new store directories and re-validate
    /// the catalog. Rescanning an unchanged tree leaves the catalog unchanged.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        self.dirty.store(false, Ordering::SeqCst);
        let enumerator = PathEnumerator::new(self.config.storage_roots.clone());
        let store_dirs = tokio::task::spawn_blocking(move || enumerator.store_dirs())
            .await
            .map_err(|e| ScoutError::Io(std::io::Error::other(e)))?;

        let fresh: Vec<PathBuf> = {
            let catalog = lock(&self.catalog, "catalog");
            store_dirs
                .into_iter()
                .filter(|dir| !catalog.contains_store(dir))
                .collect()
        };

        let mut report = RefreshReport {
            discovered: fresh.len(),
            ..RefreshReport::default()
        };

        let mut hits = Vec::new();
        for dir in fresh {
            match self.queues.take_prefetched(&dir) {
                Some(descriptor) => hits.push((dir, descriptor)),
                None => {
                    if self.scheduler.enqueue(&dir) == EnqueueOutcome::Prefetched {
                        // Prefetch finished between the two calls
                        if let Some(descriptor) = self.queues.take_prefetched(&dir) {
                            hits.push((dir, descriptor));
                        }
                    }
                }
            }
        }

        report.from_prefetch = hits.len();
        let chunk = self.config.max_batch_size.max(1);
        for batch in hits.chunks(chunk) {
            let results = join_all(
                batch
                    .iter()
                    .map(|(dir, descriptor)| self.processor.commit(dir, descriptor.clone())),
            )
            .await;
            for ((dir, _), result) in batch.iter().zip(results) {
                match result {
                    Ok(_) | Err(ScoutError::NotFound(_)) => {}
                    Err(e) => warn!("Failed to commit prefetched {}: {}", dir.display(), e),
                }
            }
        }

        report.run = self.scheduler.run().await;
        report.validation = self.validate_all().await;
        if self.config.prefer_workspace_file {
            report.preferred_files = self.apply_workspace_file_preference().await;
        }

        info!(
            "Refresh complete: {} new store dirs, {} workspaces in catalog",
            report.discovered,
            lock(&self.catalog, "catalog").len()
        );
        Ok(report)
    }

    /// Re-check every committed record. Vanished targets are removed and
    /// trashed; broken descriptors go through recovery.
    pub async fn validate_all(&self) -> ValidationReport {
        let probes = lock(&self.catalog, "catalog").probes();
        let mut report = ValidationReport {
            checked: probes.len(),
            ..ValidationReport::default()
        };

        let chunk = self.config.max_batch_size.max(1);
        for batch in probes.chunks(chunk) {
            let results = join_all(batch.iter().map(|probe| async move {
                let store_present = match probe.descriptor_path.parent() {
                    Some(store) => tokio::fs::try_exists(store).await.unwrap_or(true),
                    None => false,
                };
                let validation = WorkspaceCatalog::check(probe).await;
                (probe, store_present, validation)
            }))
            .await;

            for (probe, store_present, validation) in results {
                if !store_present {
                    // Store directory removed behind our back; nothing to trash
                    if let Some(record) = lock(&self.catalog, "catalog").remove(&probe.uri) {
                        record.store.release();
                    }
                    self.recovery.forget(&probe.uri);
                    report.removed += 1;
                    continue;
                }
                self.apply_validation(probe, validation, &mut report).await;
            }
        }

        if report.removed + report.degraded > 0 {
            debug!(
                "Validation: {} checked, {} removed, {} degraded",
                report.checked, report.removed, report.degraded
            );
        }
        report
    }

    async fn apply_validation(
        &self,
        probe: &RecordProbe,
        validation: Validation,
        report: &mut ValidationReport,
    ) {
        match validation {
            Validation::Valid => self.recovery.record_validation(&probe.uri, true),
            Validation::TargetMissing => {
                info!("Workspace target {} vanished", probe.target.display());
                let removed = lock(&self.catalog, "catalog").remove(&probe.uri);
                if let Some(record) = removed {
                    self.recovery.forget(&probe.uri);
                    trash_blocking(&self.trash, record.store).await;
                    report.removed += 1;
                }
            }
            Validation::DescriptorMismatch(now_names) => {
                // The store directory was reused; rediscover it on the next scan
                debug!("{} now describes {}", probe.uri, now_names);
                if let Some(record) = lock(&self.catalog, "catalog").remove(&probe.uri) {
                    record.store.release();
                }
                self.recovery.forget(&probe.uri);
                report.removed += 1;
            }
            Validation::DescriptorBroken(reason) => {
                debug!("Descriptor broken for {}: {}", probe.uri, reason);
                if self.try_recover(probe).await {
                    report.recovered += 1;
                } else {
                    report.degraded += 1;
                }
            }
        }
    }

    /// Recovery if the cooldown and attempt cap allow it, else mark degraded.
    async fn try_recover(&self, probe: &RecordProbe) -> bool {
        let descriptor = match lock(&self.catalog, "catalog").get(&probe.uri) {
            Some(record) => record.descriptor(),
            None => return false,
        };
        if self.recovery.should_attempt_recovery(&probe.uri) {
            self.recovery.attempt_recovery(probe, &descriptor).await
        } else {
            self.recovery.record_validation(&probe.uri, false);
            false
        }
    }

    /// Soft-remove folder records whose folder holds a `.code-workspace` file
    /// that is itself in the catalog.
    async fn apply_workspace_file_preference(&self) -> usize {
        let folders: Vec<(String, PathBuf)> = lock(&self.catalog, "catalog")
            .snapshot()
            .into_iter()
            .filter(|v| v.kind == DescriptorKind::Folder)
            .map(|v| (v.uri, v.target))
            .collect();

        let mut replaced = 0;
        for (uri, folder) in folders {
            let Ok(mut entries) = tokio::fs::read_dir(&folder).await else {
                continue;
            };
            let mut workspace_files = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == CODE_WORKSPACE_EXT) {
                    workspace_files.push(path);
                }
            }

            let mut catalog = lock(&self.catalog, "catalog");
            let preferred = workspace_files
                .iter()
                .filter_map(|file| path_to_uri(file))
                .any(|file_uri| catalog.contains(&file_uri));
            if !preferred {
                continue;
            }
            if let Some(record) = catalog.remove(&uri) {
                debug!("Preferring workspace file over folder {}", uri);
                record.store.release();
                replaced += 1;
            }
        }
        replaced
    }

    /// Catalog snapshot in URI order.
    pub fn snapshot(&self) -> Vec<WorkspaceView> {
        lock(&self.catalog, "catalog").snapshot()
    }

    /// Catalog snapshot ordered most recently accessed first.
    pub fn recent(&self) -> Vec<WorkspaceView> {
        let views = self.snapshot();
        sort_by_recency(views)
    }

    /// Recent workspaces with display names from the git cache.
    pub fn entries(&self) -> Vec<WorkspaceEntry> {
        let cache = self.git.cache();
        self.recent()
            .into_iter()
            .map(|view| {
                let git = cache.get(&view.target);
                WorkspaceEntry {
                    name: display_name(&view.uri, git.as_ref()),
                    health: self.recovery.health(&view.uri),
                    view,
                }
            })
            .collect()
    }

    /// Remove a workspace. Disposal failures are logged, never returned.
    pub fn remove(&self, uri: &str, mode: RemovalMode) -> bool {
        let Some(record) = lock(&self.catalog, "catalog").remove(uri) else {
            return false;
        };
        self.recovery.forget(uri);

        match mode {
            RemovalMode::Trash => {
                if let Err(e) = record.store.trash(&self.trash) {
                    warn!("{}", e);
                }
            }
            RemovalMode::Delete => {
                if let Err(e) = record.store.delete() {
                    warn!("Failed to delete store directory for {}: {}", uri, e);
                }
                if let Err(e) = state::forget_everywhere(&self.config.state_dir, uri) {
                    warn!("Failed to drop persisted state for {}: {:#}", uri, e);
                }
            }
            RemovalMode::Forget => {
                record.store.release();
            }
        }
        info!("Removed workspace {} ({:?})", uri, mode);
        true
    }

    /// Record the access and build the launch intent.
    pub fn open(&self, uri: &str) -> Result<OpenIntent> {
        let kind = match lock(&self.catalog, "catalog").get(uri) {
            Some(record) => record.kind,
            None => return Err(ScoutError::NotFound(PathBuf::from(uri))),
        };

        self.recovery.record_access(uri);
        let recorded = state::update::<UsageStats, _>(&self.config.state_dir, |stats| {
            stats.record_open(uri);
            (true, ())
        });
        if let Err(e) = recorded {
            warn!("Failed to record usage for {}: {:#}", uri, e);
        }

        let mut args = Vec::new();
        if self.config.new_window || kind == DescriptorKind::Folder {
            args.push("--new-window".to_string());
        }
        args.push(
            match kind {
                DescriptorKind::Folder => "--folder-uri",
                DescriptorKind::WorkspaceFile => "--file-uri",
            }
            .to_string(),
        );
        args.push(uri.to_string());

        Ok(OpenIntent {
            command: self.config.editor_command.clone(),
            args,
            uri: uri.to_string(),
        })
    }

    pub fn cancel(&self) {
        self.scheduler.cancel();
    }

    pub fn errors(&self) -> Vec<FailedItem> {
        self.scheduler.errors()
    }

    /// Re-enqueue only the failed paths and drain them.
    pub async fn retry_failed(&self) -> RunSummary {
        if self.scheduler.retry_failed() == 0 {
            return RunSummary::default();
        }
        self.scheduler.run().await
    }

    /// Idle-timer work: evict expired git entries and sweep stale broken workspaces.
    pub async fn idle_maintenance(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport {
            expired_git_entries: self.git.cache().sweep_expired(),
            ..MaintenanceReport::default()
        };

        let uris = lock(&self.catalog, "catalog").uris();
        for action in self.recovery.sweep_stale(&uris) {
            match action {
                SweepAction::AttemptRecovery(uri) => {
                    let target = lock(&self.catalog, "catalog")
                        .get(&uri)
                        .map(|r| (r.probe(), r.descriptor()));
                    let Some((probe, descriptor)) = target else {
                        continue;
                    };
                    if self.recovery.attempt_recovery(&probe, &descriptor).await {
                        report.recovered += 1;
                    }
                }
                SweepAction::Orphan(uri) => {
                    if self.quarantine(&uri).await {
                        report.quarantined += 1;
                    }
                }
            }
        }
        report
    }

    /// Move the store directory into the backup root and drop all live state.
    async fn quarantine(&self, uri: &str) -> bool {
        let removed = lock(&self.catalog, "catalog").remove(uri);
        let Some(record) = removed else {
            return false;
        };
        self.recovery.forget(uri);
        let backup_root = self.config.backup_root();
        match tokio::task::spawn_blocking(move || record.store.backup(&backup_root)).await {
            Ok(Ok(destination)) => {
                info!("Quarantined {} to {}", uri, destination.display());
            }
            Ok(Err(e)) => warn!("{}", e),
            Err(e) => warn!("Backup task for {} failed: {}", uri, e),
        }
        true
    }

    /// Change the git cache TTL; clears the cache.
    pub fn set_git_ttl(&self, secs: u64) {
        let secs = secs.clamp(60, 3600);
        self.git.cache().set_ttl(Duration::from_secs(secs));
    }

    /// Hand a store directory to the idle prefetcher.
    pub fn prefetch_idle(&self, store_dir: &Path) -> bool {
        self.prefetch.schedule(store_dir)
    }

    /// Back up every storage root to `<root>.bak`, delete its store
    /// directories and purge the catalog. Refuses when any backup exists.
    pub fn clear_all(&self) -> Result<ClearReport> {
        self.scheduler.cancel();

        let roots: Vec<PathBuf> = self
            .config
            .storage_roots
            .iter()
            .filter(|root| root.is_dir())
            .cloned()
            .collect();
        let backups: Vec<PathBuf> = roots.iter().map(|root| backup_path(root)).collect();

        if let Some(existing) = backups.iter().find(|b| b.exists()) {
            return Err(ScoutError::Backup {
                path: existing.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "backup already exists",
                ),
            });
        }

        let mut report = ClearReport::default();
        for (root, backup) in roots.iter().zip(&backups) {
            copy_tree(root, backup).map_err(|source| ScoutError::Backup {
                path: root.clone(),
                source,
            })?;
            report.backups.push(backup.clone());
        }

        // Release every handle before deleting, so no record aliases a deleted dir
        let drained = lock(&self.catalog, "catalog").drain();
        report.purged = drained.len();
        for record in drained {
            record.store.release();
        }

        for store in PathEnumerator::new(roots).store_dirs() {
            match StoreDir::new(&store).delete() {
                Ok(()) => report.deleted += 1,
                Err(e) => warn!("Failed to delete {}: {}", store.display(), e),
            }
        }
        self.queues.clear_prefetch();
        self.recovery.reset();
        self.git.cache().clear();

        info!(
            "Cleared {} store directories, backups at {:?}",
            report.deleted, report.backups
        );
        Ok(report)
    }
}

fn backup_path(root: &Path) -> PathBuf {
    let mut name = root.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Move a store directory to the trash on the blocking pool; failures are logged.
async fn trash_blocking(trash: &Trash, store: StoreDir) {
    let trash = trash.clone();
    let path = store.path().to_path_buf();
    match tokio::task::spawn_blocking(move || store.trash(&trash)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("{}", e),
        Err(e) => warn!("Trash task for {} failed: {}", path.display(), e),
    }
}
