//! Idle-time descriptor prefetch
//!
//! Speculatively reads descriptors of store directories the watcher reported,
//! so the next foreground refresh can commit them without touching the disk.
//! Always yields to a foreground run: the scheduler's running flag is checked
//! before the batch and before every item.

use crate::catalog::WorkspaceCatalog;
use crate::config::Config;
use crate::scheduler::PathQueues;
use crate::utils::lock;
use crate::workspace::{Descriptor, read_descriptor_bounded};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace};

pub struct PrefetchEngine {
    queues: Arc<PathQueues>,
    foreground: Arc<AtomicBool>,
    catalog: Arc<Mutex<WorkspaceCatalog>>,
    batch_size: usize,
    queue_limit: usize,
    idle_delay: Duration,
    armed: AtomicBool,
}

impl PrefetchEngine {
    pub fn new(
        queues: Arc<PathQueues>,
        foreground: Arc<AtomicBool>,
        catalog: Arc<Mutex<WorkspaceCatalog>>,
        config: &Config,
    ) -> Self {
        Self {
            queues,
            foreground,
            catalog,
            batch_size: config.prefetch_batch_size.max(1),
            queue_limit: config.prefetch_queue_limit.max(1),
            idle_delay: Duration::from_millis(config.prefetch_idle_delay_ms),
            armed: AtomicBool::new(false),
        }
    }

    /// Queue `path` for a speculative read and arm the idle timer.
    ///
    /// Returns `false` when the path is already committed, already known to
    /// the queues, or the prefetch queue is full.
    pub fn schedule(self: &Arc<Self>, path: &Path) -> bool {
        if lock(&self.catalog, "catalog").contains_store(path) {
            trace!("Skipping prefetch of committed store {}", path.display());
            return false;
        }
        if !self.queues.schedule_prefetch(path, self.queue_limit) {
            return false;
        }
        self.arm();
        true
    }

    /// One-shot debounced timer; re-arming while armed is a no-op.
    fn arm(self: &Arc<Self>) {
        if self.armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, prefetch timer not armed");
            self.armed.store(false, Ordering::SeqCst);
            return;
        };

        let engine = Arc::clone(self);
        handle.spawn(async move {
            tokio::time::sleep(engine.idle_delay).await;
            engine.armed.store(false, Ordering::SeqCst);
            engine.drain_batch().await;
            if engine.queues.prefetch_pending_len() > 0 {
                engine.arm();
            }
        });
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    fn foreground_active(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }

    /// Read up to one prefetch batch. Returns how many results were stored.
    pub async fn drain_batch(&self) -> usize {
        if self.foreground_active() {
            debug!("Foreground run active, prefetch deferred");
            return 0;
        }

        let mut pending: Vec<PathBuf> = self.queues.pop_prefetch(self.batch_size);
        pending.reverse();
        let mut stored = 0;

        while let Some(path) = pending.pop() {
            if self.foreground_active() {
                pending.push(path);
                pending.reverse();
                debug!("Foreground run started, returning {} paths to prefetch queue", pending.len());
                self.queues.requeue_prefetch(pending);
                break;
            }

            match read_descriptor_bounded(&path).await {
                Ok(Some(descriptor)) => {
                    if self.queues.store_prefetched(&path, descriptor) {
                        stored += 1;
                    }
                }
                Ok(None) => self.queues.abandon_prefetch(&path),
                Err(e) => {
                    // The foreground pass will hit and report the same error
                    debug!("Prefetch of {} failed: {}", path.display(), e);
                    self.queues.abandon_prefetch(&path);
                }
            }
        }

        if stored > 0 {
            debug!("Prefetched {} descriptors", stored);
        }
        stored
    }

    /// Consume a prefetched descriptor.
    pub fn take(&self, path: &Path) -> Option<Descriptor> {
        self.queues.take_prefetched(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with_descriptor(root: &Path, name: &str) -> PathBuf {
        let store = root.join(name);
        std::fs::create_dir_all(&store).unwrap();
        std::fs::write(
            store.join("workspace.json"),
            format!(r#"{{"folder":"file:///tmp/{}"}}"#, name),
        )
        .unwrap();
        store
    }

    fn engine(foreground: Arc<AtomicBool>) -> Arc<PrefetchEngine> {
        let config = Config {
            prefetch_batch_size: 2,
            ..Config::default()
        };
        Arc::new(PrefetchEngine::new(
            Arc::new(PathQueues::new()),
            foreground,
            Arc::new(Mutex::new(WorkspaceCatalog::new())),
            &config,
        ))
    }

    #[tokio::test]
    async fn test_drain_batch_respects_batch_size() {
        let dir = TempDir::new().unwrap();
        let engine = engine(Arc::new(AtomicBool::new(false)));
        let stores: Vec<PathBuf> = (0..3)
            .map(|i| store_with_descriptor(dir.path(), &format!("s{}", i)))
            .collect();
        for store in &stores {
            assert!(engine.schedule(store));
        }

        assert_eq!(engine.drain_batch().await, 2);
        assert_eq!(engine.drain_batch().await, 1);
        for store in &stores {
            assert!(engine.take(store).is_some());
            assert!(engine.take(store).is_none());
        }
    }

    #[tokio::test]
    async fn test_yields_to_foreground_run() {
        let dir = TempDir::new().unwrap();
        let foreground = Arc::new(AtomicBool::new(true));
        let engine = engine(foreground.clone());
        let store = store_with_descriptor(dir.path(), "s0");
        engine.schedule(&store);

        assert_eq!(engine.drain_batch().await, 0);
        assert_eq!(engine.queues.prefetch_pending_len(), 1);

        foreground.store(false, Ordering::SeqCst);
        assert_eq!(engine.drain_batch().await, 1);
    }

    #[tokio::test]
    async fn test_store_without_descriptor_is_dropped() {
        let dir = TempDir::new().unwrap();
        let engine = engine(Arc::new(AtomicBool::new(false)));
        let store = dir.path().join("empty");
        std::fs::create_dir_all(&store).unwrap();
        engine.schedule(&store);

        assert_eq!(engine.drain_batch().await, 0);
        assert_eq!(engine.queues.prefetch_pending_len(), 0);
        assert_eq!(engine.queues.prefetched_len(), 0);
    }
}
