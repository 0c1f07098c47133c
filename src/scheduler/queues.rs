//! Shared path queues
//!
//! One lock guards the processing queue, the in-flight set, the prefetch
//! queue and the prefetched results. A path lives in at most one of
//! {processing queue, in flight, prefetched results} at any time; every
//! transition between them happens under that lock.

use crate::utils::lock;
use crate::workspace::Descriptor;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// What `enqueue` did with a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    AlreadyQueued,
    InFlight,
    /// A prefetched result exists; consume it with `take_prefetched` instead
    Prefetched,
}

#[derive(Debug, Default)]
struct QueueState {
    processing: HashSet<PathBuf>,
    in_flight: HashSet<PathBuf>,
    prefetch_order: VecDeque<PathBuf>,
    prefetch_pending: HashSet<PathBuf>,
    /// Popped by the prefetch engine and currently being read
    prefetching: HashSet<PathBuf>,
    prefetched: HashMap<PathBuf, Descriptor>,
}

impl QueueState {
    fn is_foreground(&self, path: &Path) -> bool {
        self.processing.contains(path) || self.in_flight.contains(path)
    }
}

#[derive(Debug, Default)]
pub struct PathQueues {
    state: Mutex<QueueState>,
}

impl PathQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, path: &Path) -> EnqueueOutcome {
        let mut state = lock(&self.state, "queues");
        if state.prefetched.contains_key(path) {
            return EnqueueOutcome::Prefetched;
        }
        if state.in_flight.contains(path) {
            return EnqueueOutcome::InFlight;
        }
        if !state.processing.insert(path.to_path_buf()) {
            return EnqueueOutcome::AlreadyQueued;
        }
        // Foreground work supersedes a pending speculative read
        if state.prefetch_pending.remove(path) {
            state.prefetch_order.retain(|p| p != path);
        }
        EnqueueOutcome::Queued
    }

    /// Move up to `n` queued paths into the in-flight set.
    pub fn take_batch(&self, n: usize) -> Vec<PathBuf> {
        let mut state = lock(&self.state, "queues");
        let batch: Vec<PathBuf> = state.processing.iter().take(n).cloned().collect();
        for path in &batch {
            state.processing.remove(path);
            state.in_flight.insert(path.clone());
        }
        batch
    }

    pub fn finish(&self, path: &Path) {
        lock(&self.state, "queues").in_flight.remove(path);
    }

    pub fn clear_in_flight(&self) {
        lock(&self.state, "queues").in_flight.clear();
    }

    /// Drop every queued (not in-flight) path. Returns how many were dropped.
    pub fn clear_processing(&self) -> usize {
        let mut state = lock(&self.state, "queues");
        let count = state.processing.len();
        state.processing.clear();
        count
    }

    pub fn processing_len(&self) -> usize {
        lock(&self.state, "queues").processing.len()
    }

    pub fn in_flight_len(&self) -> usize {
        lock(&self.state, "queues").in_flight.len()
    }

    pub fn is_queued(&self, path: &Path) -> bool {
        lock(&self.state, "queues").processing.contains(path)
    }

    // ------------------------------------------------------------------
    // Prefetch side
    // ------------------------------------------------------------------

    /// Add to the prefetch queue unless the path is already known anywhere
    /// or the queue is at `limit`.
    pub fn schedule_prefetch(&self, path: &Path, limit: usize) -> bool {
        let mut state = lock(&self.state, "queues");
        if state.is_foreground(path)
            || state.prefetched.contains_key(path)
            || state.prefetching.contains(path)
            || state.prefetch_pending.contains(path)
            || state.prefetch_pending.len() >= limit
        {
            return false;
        }
        state.prefetch_pending.insert(path.to_path_buf());
        state.prefetch_order.push_back(path.to_path_buf());
        true
    }

    /// Pop up to `n` pending prefetch paths and mark them as being read.
    pub fn pop_prefetch(&self, n: usize) -> Vec<PathBuf> {
        let mut state = lock(&self.state, "queues");
        let mut popped = Vec::with_capacity(n);
        while popped.len() < n {
            let Some(path) = state.prefetch_order.pop_front() else {
                break;
            };
            state.prefetch_pending.remove(&path);
            state.prefetching.insert(path.clone());
            popped.push(path);
        }
        popped
    }

    /// Put unread paths back at the front of the prefetch queue.
    pub fn requeue_prefetch(&self, paths: Vec<PathBuf>) {
        let mut state = lock(&self.state, "queues");
        for path in paths.into_iter().rev() {
            state.prefetching.remove(&path);
            if state.is_foreground(&path) || state.prefetch_pending.contains(&path) {
                continue;
            }
            state.prefetch_pending.insert(path.clone());
            state.prefetch_order.push_front(path);
        }
    }

    /// Store a prefetched descriptor. Dropped if the path went foreground meanwhile.
    pub fn store_prefetched(&self, path: &Path, descriptor: Descriptor) -> bool {
        let mut state = lock(&self.state, "queues");
        state.prefetching.remove(path);
        if state.is_foreground(path) {
            return false;
        }
        state.prefetched.insert(path.to_path_buf(), descriptor);
        true
    }

    pub fn abandon_prefetch(&self, path: &Path) {
        lock(&self.state, "queues").prefetching.remove(path);
    }

    /// Consume a prefetched result.
    pub fn take_prefetched(&self, path: &Path) -> Option<Descriptor> {
        lock(&self.state, "queues").prefetched.remove(path)
    }

    pub fn has_prefetched(&self, path: &Path) -> bool {
        lock(&self.state, "queues").prefetched.contains_key(path)
    }

    pub fn prefetch_pending_len(&self) -> usize {
        lock(&self.state, "queues").prefetch_pending.len()
    }

    pub fn prefetched_len(&self) -> usize {
        lock(&self.state, "queues").prefetched.len()
    }

    /// Forget all speculative state, e.g. after clearing storage roots.
    pub fn clear_prefetch(&self) {
        let mut state = lock(&self.state, "queues");
        state.prefetch_order.clear();
        state.prefetch_pending.clear();
        state.prefetched.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::DescriptorKind;

    fn descriptor() -> Descriptor {
        Descriptor {
            uri: "file:///x".into(),
            kind: DescriptorKind::Folder,
        }
    }

    #[test]
    fn test_enqueue_is_a_set() {
        let queues = PathQueues::new();
        let p = Path::new("/s/1");
        assert_eq!(queues.enqueue(p), EnqueueOutcome::Queued);
        assert_eq!(queues.enqueue(p), EnqueueOutcome::AlreadyQueued);
        assert_eq!(queues.processing_len(), 1);
    }

    #[test]
    fn test_in_flight_paths_are_not_requeued() {
        let queues = PathQueues::new();
        let p = Path::new("/s/1");
        queues.enqueue(p);
        let batch = queues.take_batch(5);
        assert_eq!(batch.len(), 1);
        assert_eq!(queues.enqueue(p), EnqueueOutcome::InFlight);
        queues.finish(p);
        assert_eq!(queues.enqueue(p), EnqueueOutcome::Queued);
    }

    #[test]
    fn test_prefetched_paths_are_not_enqueued() {
        let queues = PathQueues::new();
        let p = Path::new("/s/1");
        assert!(queues.schedule_prefetch(p, 10));
        let popped = queues.pop_prefetch(10);
        assert_eq!(popped, vec![p.to_path_buf()]);
        assert!(queues.store_prefetched(p, descriptor()));

        assert_eq!(queues.enqueue(p), EnqueueOutcome::Prefetched);
        assert!(queues.take_prefetched(p).is_some());
        assert_eq!(queues.enqueue(p), EnqueueOutcome::Queued);
    }

    #[test]
    fn test_prefetch_result_dropped_when_path_went_foreground() {
        let queues = PathQueues::new();
        let p = Path::new("/s/1");
        queues.schedule_prefetch(p, 10);
        queues.pop_prefetch(1);
        queues.enqueue(p);

        assert!(!queues.store_prefetched(p, descriptor()));
        assert_eq!(queues.prefetched_len(), 0);
        assert!(queues.is_queued(p));
    }

    #[test]
    fn test_prefetch_queue_is_bounded() {
        let queues = PathQueues::new();
        assert!(queues.schedule_prefetch(Path::new("/a"), 2));
        assert!(queues.schedule_prefetch(Path::new("/b"), 2));
        assert!(!queues.schedule_prefetch(Path::new("/c"), 2));
        assert!(!queues.schedule_prefetch(Path::new("/a"), 2));
    }

    #[test]
    fn test_enqueue_cancels_pending_prefetch() {
        let queues = PathQueues::new();
        let p = Path::new("/s/1");
        queues.schedule_prefetch(p, 10);
        queues.enqueue(p);
        assert_eq!(queues.prefetch_pending_len(), 0);
        assert!(queues.pop_prefetch(10).is_empty());
    }
}
