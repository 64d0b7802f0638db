//! Completion latch (wait-group) for dispatched jobs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Counts outstanding jobs and wakes waiters when the count reaches zero
///
/// Owned by the orchestrator; every job holds a [`CompletionHandle`]. The
/// latch also tallies jobs whose handle was marked as succeeded.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    pending: AtomicUsize,
    succeeded: AtomicUsize,
    notify: Notify,
}

impl CompletionLatch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register one more outstanding job
    ///
    /// The job is complete when the returned handle is dropped, which
    /// guarantees exactly one signal per job whatever its outcome.
    pub fn add(self: &Arc<Self>) -> CompletionHandle {
        self.pending.fetch_add(1, Ordering::SeqCst);
        CompletionHandle {
            latch: Arc::clone(self),
        }
    }

    /// Number of jobs that have not completed yet
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Number of jobs marked as succeeded so far
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Wait until every registered job has completed
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent `done` is not missed
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn done(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}

/// Signals completion of one job when dropped
#[derive(Debug)]
pub struct CompletionHandle {
    latch: Arc<CompletionLatch>,
}

impl CompletionHandle {
    /// Record that the job produced a result
    pub fn succeed(&self) {
        self.latch.succeeded.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        self.latch.done();
    }
}
