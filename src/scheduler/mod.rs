//! Batch Scheduler
//!
//! Drains the processing queue in adaptively sized batches. Items inside a
//! batch are polled together on the caller's task (cooperative interleaving,
//! no extra threads), and batch N+1 never starts before every item of batch
//! N has completed. That single batch width is the only fan-out.
//!
//! # Run states
//!
//! `Idle -> Running -> {Draining (cancel requested), Idle (queue empty)}`.
//! At most one run loop is active; `run` while running returns immediately
//! and the active loop picks up whatever was enqueued. A loop that is
//! draining after `cancel` picks up nothing, so `run` waits for it to exit
//! and then starts a fresh one.

pub mod metrics;
pub mod pressure;
pub mod queues;

use crate::config::{Config, PerformanceMode};
use crate::error::{ErrorKind, ScoutError};
use crate::utils::lock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use metrics::{AdaptiveBatchSize, BatchMetrics, RollingWindow};
pub use pressure::{FixedPressure, PressureProbe, SystemPressure};
pub use queues::{EnqueueOutcome, PathQueues};

/// Per-item result reported back to the scheduler
#[derive(Debug, Clone, Default)]
pub struct ItemReport {
    /// Time spent resolving derived metadata, if any was resolved
    pub metadata_time: Option<Duration>,
}

/// The work done for one queued path
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, path: &Path) -> Result<ItemReport, ScoutError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    Draining,
}

/// Entry of the bounded error list
#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub path: PathBuf,
    pub message: String,
    pub kind: ErrorKind,
    pub retryable: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub failed: usize,
    pub batches: usize,
    pub batch_sizes: Vec<usize>,
    pub throttled: usize,
    pub cancelled: bool,
    /// Another run loop was already active; nothing was done here
    pub already_running: bool,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    /// Batch duration the controller steers towards
    pub target_batch_time: Duration,
    pub inter_batch_delay: Duration,
    pub throttle_delay: Duration,
    pub item_time_threshold: Duration,
    pub metadata_time_threshold: Duration,
    pub memory_pressure_threshold: f64,
    /// Halve the effective batch size
    pub memory_saver: bool,
    pub max_errors: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            min_batch_size: 2,
            max_batch_size: 10,
            target_batch_time: Duration::from_millis(100),
            inter_batch_delay: Duration::from_millis(100),
            throttle_delay: Duration::from_millis(250),
            item_time_threshold: Duration::from_millis(100),
            metadata_time_threshold: Duration::from_millis(50),
            memory_pressure_threshold: 0.8,
            memory_saver: false,
            max_errors: 100,
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_batch_size: config.min_batch_size,
            max_batch_size: config.max_batch_size,
            inter_batch_delay: config.inter_batch_delay(),
            memory_saver: config.performance_mode == PerformanceMode::MemorySaver,
            ..Self::default()
        }
    }
}

struct SchedulerState {
    phase: RunPhase,
    adaptive: AdaptiveBatchSize,
    metrics: BatchMetrics,
    errors: VecDeque<FailedItem>,
}

pub struct BatchScheduler<P: ItemProcessor> {
    processor: Arc<P>,
    queues: Arc<PathQueues>,
    settings: SchedulerSettings,
    pressure: Arc<dyn PressureProbe>,
    state: Mutex<SchedulerState>,
    running: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
    /// Signalled whenever a run loop exits
    finished: Notify,
}

/// Resets the run flags even if the run future is dropped mid-batch.
struct RunGuard<'a, P: ItemProcessor> {
    scheduler: &'a BatchScheduler<P>,
}

impl<P: ItemProcessor> Drop for RunGuard<'_, P> {
    fn drop(&mut self) {
        self.scheduler.queues.clear_in_flight();
        lock(&self.scheduler.state, "scheduler").phase = RunPhase::Idle;
        self.scheduler.running.store(false, Ordering::SeqCst);
        self.scheduler.finished.notify_waiters();
    }
}

impl<P: ItemProcessor> BatchScheduler<P> {
    pub fn new(
        processor: Arc<P>,
        queues: Arc<PathQueues>,
        settings: SchedulerSettings,
        pressure: Arc<dyn PressureProbe>,
    ) -> Self {
        let adaptive = AdaptiveBatchSize::new(settings.min_batch_size, settings.max_batch_size);
        Self {
            processor,
            queues,
            settings,
            pressure,
            state: Mutex::new(SchedulerState {
                phase: RunPhase::Idle,
                adaptive,
                metrics: BatchMetrics::default(),
                errors: VecDeque::new(),
            }),
            running: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
            finished: Notify::new(),
        }
    }

    pub fn queues(&self) -> &Arc<PathQueues> {
        &self.queues
    }

    /// Shared flag the prefetch engine watches to yield to foreground work
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> RunPhase {
        lock(&self.state, "scheduler").phase
    }

    pub fn adaptive_batch_size(&self) -> usize {
        lock(&self.state, "scheduler").adaptive.current()
    }

    pub fn metrics(&self) -> BatchMetrics {
        lock(&self.state, "scheduler").metrics.clone()
    }

    pub fn errors(&self) -> Vec<FailedItem> {
        lock(&self.state, "scheduler").errors.iter().cloned().collect()
    }

    pub fn enqueue(&self, path: &Path) -> EnqueueOutcome {
        self.queues.enqueue(path)
    }

    /// Request cooperative cancellation and drop everything still queued.
    pub fn cancel(&self) {
        lock(&self.cancel, "cancel token").cancel();
        let dropped = self.queues.clear_processing();
        let mut state = lock(&self.state, "scheduler");
        state.phase = if self.is_running() {
            RunPhase::Draining
        } else {
            RunPhase::Idle
        };
        info!("Processing cancelled, {} queued paths dropped", dropped);
    }

    /// Re-enqueue every path in the error list and clear it.
    pub fn retry_failed(&self) -> usize {
        let failed: Vec<FailedItem> = lock(&self.state, "scheduler").errors.drain(..).collect();
        let requeued = failed
            .iter()
            .filter(|item| self.queues.enqueue(&item.path) == EnqueueOutcome::Queued)
            .count();
        info!("Retrying {} failed paths", requeued);
        requeued
    }

    fn effective_batch_size(&self, queued: usize) -> usize {
        let adaptive = self.adaptive_batch_size();
        let mut size = adaptive.min(queued);
        if self.settings.memory_saver {
            size /= 2;
        }
        size.max(1)
    }

    /// Slow items, slow metadata, or too little free memory.
    pub fn should_shed_load(&self) -> bool {
        let (avg_item, avg_metadata) = {
            let state = lock(&self.state, "scheduler");
            (state.metrics.items.average(), state.metrics.metadata.average())
        };

        if avg_item.is_some_and(|avg| avg > self.settings.item_time_threshold) {
            debug!("Load shedding: average item time {:?}", avg_item);
            return true;
        }
        if avg_metadata.is_some_and(|avg| avg > self.settings.metadata_time_threshold) {
            debug!("Load shedding: average metadata time {:?}", avg_metadata);
            return true;
        }
        match self.pressure.memory_pressure() {
            Some(ratio) if ratio > self.settings.memory_pressure_threshold => {
                debug!("Load shedding: memory pressure {:.2}", ratio);
                true
            }
            _ => false,
        }
    }

    fn record_item(&self, path: &Path, result: Result<ItemReport, ScoutError>, elapsed: Duration) -> bool {
        let mut state = lock(&self.state, "scheduler");
        state.metrics.items.push(elapsed);

        match result {
            Ok(report) => {
                if let Some(metadata_time) = report.metadata_time {
                    state.metrics.metadata.push(metadata_time);
                }
                true
            }
            Err(ScoutError::NotFound(target)) => {
                debug!("Target vanished for {}: {}", path.display(), target.display());
                true
            }
            Err(e @ ScoutError::Timeout { .. }) => {
                debug!("Treating timeout as miss for {}: {}", path.display(), e);
                true
            }
            Err(e) => {
                warn!("Failed to process {}: {}", path.display(), e);
                if state.errors.len() >= self.settings.max_errors {
                    state.errors.pop_front();
                }
                state.errors.push_back(FailedItem {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                    kind: e.kind(),
                    retryable: e.is_retryable(),
                    at: Utc::now(),
                });
                false
            }
        }
    }

    /// Pause for `delay`, waking early on cancellation. Returns `false` if cancelled.
    async fn pause(token: &CancellationToken, delay: Duration) -> bool {
        if delay.is_zero() {
            return !token.is_cancelled();
        }
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Drain the processing queue. See the module docs for the guarantees.
    pub async fn run(&self) -> RunSummary {
        while self.running.swap(true, Ordering::SeqCst) {
            let draining = lock(&self.cancel, "cancel token").is_cancelled();
            if !draining {
                debug!("Run loop already active, queue will be drained there");
                return RunSummary {
                    already_running: true,
                    ..RunSummary::default()
                };
            }

            let finished = self.finished.notified();
            tokio::pin!(finished);
            finished.as_mut().enable();
            if self.is_running() {
                debug!("Waiting for the cancelled run loop to exit");
                finished.await;
            }
        }
        let _guard = RunGuard { scheduler: self };

        let token = {
            let mut current = lock(&self.cancel, "cancel token");
            *current = CancellationToken::new();
            current.clone()
        };
        lock(&self.state, "scheduler").phase = RunPhase::Running;

        let mut summary = RunSummary::default();
        let run_started = Instant::now();

        loop {
            if token.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let queued = self.queues.processing_len();
            if queued == 0 {
                break;
            }
            let size = self.effective_batch_size(queued);

            if self.should_shed_load() {
                summary.throttled += 1;
                if !Self::pause(&token, self.settings.throttle_delay).await {
                    summary.cancelled = true;
                    break;
                }
            }

            let batch = self.queues.take_batch(size);
            if batch.is_empty() {
                break;
            }

            let batch_started = Instant::now();
            let processor = &self.processor;
            let outcomes = join_all(batch.iter().map(|path| async move {
                let started = Instant::now();
                let result = processor.process(path).await;
                (path, result, started.elapsed())
            }))
            .await;
            let batch_elapsed = batch_started.elapsed();

            for (path, result, elapsed) in outcomes {
                self.queues.finish(path);
                if self.record_item(path, result, elapsed) {
                    summary.processed += 1;
                } else {
                    summary.failed += 1;
                }
            }

            let next_size = {
                let mut state = lock(&self.state, "scheduler");
                state.metrics.batches.push(batch_elapsed);
                state
                    .adaptive
                    .adjust(batch_elapsed, self.settings.target_batch_time)
            };
            summary.batches += 1;
            summary.batch_sizes.push(batch.len());
            debug!(
                "Batch of {} finished in {:?}, next batch size {}",
                batch.len(),
                batch_elapsed,
                next_size
            );

            if self.queues.processing_len() > 0
                && !Self::pause(&token, self.settings.inter_batch_delay).await
            {
                summary.cancelled = true;
                break;
            }
        }

        info!(
            "Processing run finished: {} processed, {} failed, {} batches in {:?}{}",
            summary.processed,
            summary.failed,
            summary.batches,
            run_started.elapsed(),
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        summary
    }
}
