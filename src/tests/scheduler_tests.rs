use crate::error::{ErrorKind, Result, ScoutError};
use crate::scheduler::{
    BatchScheduler, EnqueueOutcome, FixedPressure, ItemProcessor, ItemReport, PathQueues,
    RunPhase, SchedulerSettings,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sleeps for a fixed time per item and fails on request.
struct FakeProcessor {
    delay: Duration,
    failing: HashSet<PathBuf>,
    vanished: HashSet<PathBuf>,
    timed_out: HashSet<PathBuf>,
    processed: Mutex<Vec<PathBuf>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeProcessor {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            failing: HashSet::new(),
            vanished: HashSet::new(),
            timed_out: HashSet::new(),
            processed: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    fn processed(&self) -> usize {
        self.processed.lock().unwrap().len()
    }
}

#[async_trait]
impl ItemProcessor for FakeProcessor {
    async fn process(&self, path: &Path) -> Result<ItemReport> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.processed.lock().unwrap().push(path.to_path_buf());

        if self.failing.contains(path) {
            return Err(ScoutError::Permission(path.to_path_buf()));
        }
        if self.vanished.contains(path) {
            return Err(ScoutError::NotFound(path.to_path_buf()));
        }
        if self.timed_out.contains(path) {
            return Err(ScoutError::Timeout {
                operation: "descriptor read",
                after: Duration::from_secs(2),
            });
        }
        Ok(ItemReport::default())
    }
}

fn paths(n: usize) -> Vec<PathBuf> {
    (0..n).map(|i| PathBuf::from(format!("/store/{:02}", i))).collect()
}

fn scheduler(processor: FakeProcessor, settings: SchedulerSettings) -> Arc<BatchScheduler<FakeProcessor>> {
    Arc::new(BatchScheduler::new(
        Arc::new(processor),
        Arc::new(PathQueues::new()),
        settings,
        Arc::new(FixedPressure(None)),
    ))
}

fn settings() -> SchedulerSettings {
    SchedulerSettings {
        min_batch_size: 2,
        max_batch_size: 10,
        ..SchedulerSettings::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_first_batch_shrinks_next_batch() {
    let scheduler = scheduler(FakeProcessor::new(Duration::from_secs(5)), settings());
    for path in paths(12) {
        assert_eq!(scheduler.enqueue(&path), EnqueueOutcome::Queued);
    }

    let summary = scheduler.run().await;

    assert_eq!(summary.batch_sizes, vec![10, 2]);
    assert_eq!(summary.processed, 12);
    // 10 -> 8 after the first batch, 8 -> 6 after the second
    assert_eq!(scheduler.adaptive_batch_size(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_size_steps_down_across_batches() {
    let scheduler = scheduler(FakeProcessor::new(Duration::from_secs(5)), settings());
    for path in paths(20) {
        scheduler.enqueue(&path);
    }

    let summary = scheduler.run().await;
    assert_eq!(summary.batch_sizes, vec![10, 8, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bounded_by_batch_width() {
    let processor = Arc::new(FakeProcessor::new(Duration::from_millis(500)));
    let scheduler = BatchScheduler::new(
        processor.clone(),
        Arc::new(PathQueues::new()),
        settings(),
        Arc::new(FixedPressure(None)),
    );
    for path in paths(25) {
        scheduler.enqueue(&path);
    }

    let summary = scheduler.run().await;
    let widest = summary.batch_sizes.iter().copied().max().unwrap();
    assert_eq!(processor.max_active.load(Ordering::SeqCst), widest);
    assert!(widest <= 10);
    assert_eq!(processor.processed(), 25);
}

#[tokio::test(start_paused = true)]
async fn test_memory_saver_halves_batches() {
    let mut settings = settings();
    settings.memory_saver = true;
    let scheduler = scheduler(FakeProcessor::new(Duration::ZERO), settings);
    for path in paths(12) {
        scheduler.enqueue(&path);
    }

    let summary = scheduler.run().await;
    assert_eq!(summary.batch_sizes[0], 5);
    assert!(summary.batch_sizes.iter().all(|&size| size <= 5));
    assert_eq!(summary.processed, 12);
}

#[tokio::test(start_paused = true)]
async fn test_memory_pressure_throttles_every_batch() {
    let scheduler = Arc::new(BatchScheduler::new(
        Arc::new(FakeProcessor::new(Duration::ZERO)),
        Arc::new(PathQueues::new()),
        settings(),
        Arc::new(FixedPressure(Some(0.95))),
    ));
    for path in paths(15) {
        scheduler.enqueue(&path);
    }

    let summary = scheduler.run().await;
    assert!(scheduler.should_shed_load());
    assert_eq!(summary.throttled, summary.batches);
    assert_eq!(summary.processed, 15);
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_recorded_and_retryable() {
    let all = paths(6);
    let mut processor = FakeProcessor::new(Duration::from_millis(10));
    processor.failing.insert(all[2].clone());
    processor.vanished.insert(all[4].clone());
    let scheduler = scheduler(processor, settings());
    for path in &all {
        scheduler.enqueue(path);
    }

    let summary = scheduler.run().await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 5);

    let errors = scheduler.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].path, all[2]);
    assert_eq!(errors[0].kind, ErrorKind::Permission);
    assert!(errors[0].retryable);

    // Only the failed path comes back
    assert_eq!(scheduler.retry_failed(), 1);
    assert!(scheduler.errors().is_empty());
    let retry = scheduler.run().await;
    assert_eq!(retry.batch_sizes, vec![1]);
    assert_eq!(scheduler.errors().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_empties_queue_and_stops_after_current_batch() {
    let scheduler = scheduler(FakeProcessor::new(Duration::from_secs(5)), settings());
    for path in paths(30) {
        scheduler.enqueue(&path);
    }

    let running = scheduler.clone();
    let handle = tokio::spawn(async move { running.run().await });
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(scheduler.is_running());
    scheduler.cancel();
    assert_eq!(scheduler.queues().processing_len(), 0);
    assert_eq!(scheduler.phase(), RunPhase::Draining);

    let summary = handle.await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.processed, 10);
    assert_eq!(scheduler.phase(), RunPhase::Idle);
    assert_eq!(scheduler.queues().in_flight_len(), 0);

    // A fresh run is independent of the cancelled one
    scheduler.enqueue(Path::new("/store/late"));
    let fresh = scheduler.run().await;
    assert!(!fresh.cancelled);
    assert_eq!(fresh.processed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_after_cancel_waits_for_draining_loop() {
    let scheduler = scheduler(FakeProcessor::new(Duration::from_secs(5)), settings());
    for path in paths(30) {
        scheduler.enqueue(&path);
    }

    let running = scheduler.clone();
    let handle = tokio::spawn(async move { running.run().await });
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Cancel, then immediately queue new work while the first batch drains
    scheduler.cancel();
    scheduler.enqueue(Path::new("/store/late"));
    let fresh = scheduler.run().await;

    assert!(!fresh.already_running);
    assert!(!fresh.cancelled);
    assert_eq!(fresh.processed, 1);
    assert_eq!(scheduler.queues().processing_len(), 0);

    let cancelled = handle.await.unwrap();
    assert!(cancelled.cancelled);
    assert_eq!(cancelled.processed, 10);
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_miss() {
    let all = paths(4);
    let mut processor = FakeProcessor::new(Duration::from_millis(10));
    processor.timed_out.insert(all[1].clone());
    let scheduler = scheduler(processor, settings());
    for path in &all {
        scheduler.enqueue(path);
    }

    let summary = scheduler.run().await;

    assert_eq!(summary.processed, 4);
    assert_eq!(summary.failed, 0);
    assert!(scheduler.errors().is_empty());
    assert_eq!(scheduler.retry_failed(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_only_one_run_loop() {
    let scheduler = scheduler(FakeProcessor::new(Duration::from_secs(1)), settings());
    for path in paths(4) {
        scheduler.enqueue(&path);
    }

    let running = scheduler.clone();
    let handle = tokio::spawn(async move { running.run().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Enqueued while running: drained by the active loop
    for path in paths(8).into_iter().skip(4) {
        scheduler.enqueue(&path);
    }
    let second = scheduler.run().await;
    assert!(second.already_running);
    assert_eq!(second.processed, 0);

    let first = handle.await.unwrap();
    assert_eq!(first.processed, 8);
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_path_is_not_enqueued_twice() {
    let scheduler = scheduler(FakeProcessor::new(Duration::from_secs(1)), settings());
    let path = PathBuf::from("/store/one");
    scheduler.enqueue(&path);

    let running = scheduler.clone();
    let handle = tokio::spawn(async move { running.run().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(scheduler.enqueue(&path), EnqueueOutcome::InFlight);
    assert_eq!(handle.await.unwrap().processed, 1);
}
