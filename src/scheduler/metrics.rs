//! Rolling timing windows and the adaptive batch-size controller

use std::collections::VecDeque;
use std::time::Duration;

/// Samples kept per window
pub const WINDOW_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// In-memory only; drives the controller and load shedding
#[derive(Debug, Clone)]
pub struct BatchMetrics {
    pub items: RollingWindow,
    pub batches: RollingWindow,
    pub metadata: RollingWindow,
}

impl Default for BatchMetrics {
    fn default() -> Self {
        Self {
            items: RollingWindow::new(WINDOW_CAPACITY),
            batches: RollingWindow::new(WINDOW_CAPACITY),
            metadata: RollingWindow::new(WINDOW_CAPACITY),
        }
    }
}

/// Multiplicative controller: x0.8 when slow, x1.2 when fast, bounded to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveBatchSize {
    current: usize,
    min: usize,
    max: usize,
}

/// Deviation from target (in percent) tolerated before resizing
const TOLERANCE_PERCENT: u32 = 20;

impl AdaptiveBatchSize {
    /// Starts at `max`.
    pub fn new(min: usize, max: usize) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            current: max,
            min,
            max,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.min, self.max)
    }

    /// Feed one batch duration; returns the new size.
    pub fn adjust(&mut self, batch_duration: Duration, target: Duration) -> usize {
        let upper = target * (100 + TOLERANCE_PERCENT) / 100;
        let lower = target * (100 - TOLERANCE_PERCENT) / 100;

        if batch_duration > upper {
            // floor(current * 0.8)
            self.current = (self.current * 4 / 5).max(self.min);
        } else if batch_duration < lower {
            // ceil(current * 1.2)
            self.current = (self.current * 6).div_ceil(5).min(self.max);
        }
        self.current
    }
}
