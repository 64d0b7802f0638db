//! Worker selection strategies for dispatch

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

/// Chooses which worker receives the next job
pub trait WorkerSelector: Send + Sync + Debug {
    /// Return an index in `0..worker_count` (`worker_count` is never zero)
    fn select(&self, worker_count: usize) -> usize;
}

/// Uniform random fan-out
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSelector;

impl WorkerSelector for RandomSelector {
    fn select(&self, worker_count: usize) -> usize {
        rand::thread_rng().gen_range(0..worker_count)
    }
}

/// Cycles through the workers in order
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkerSelector for RoundRobinSelector {
    fn select(&self, worker_count: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % worker_count
    }
}
