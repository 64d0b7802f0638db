//! A single worker and its drain loop

use std::any::Any;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::job::Job;
use crate::error::ProcessError;
use crate::retry::RetryEngine;

/// Number of dispatched jobs that have not finished yet
///
/// Lock-free; decrements saturate at zero because `cleanup()` may reset the
/// counter while jobs are still draining.
#[derive(Debug, Default)]
pub(crate) struct InFlight(AtomicUsize);

impl InFlight {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn decrement(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub(crate) fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// An execution unit owning one bounded inbound queue
///
/// The pool holds the only long-lived sender. Dropping it closes the queue;
/// the drain task keeps running until every queued job is processed.
#[derive(Debug)]
pub struct Worker<T> {
    id: usize,
    capacity: usize,
    queue: mpsc::Sender<Job<T>>,
    handle: JoinHandle<()>,
}

impl<T> Worker<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    /// Create a worker and start its drain task
    pub(crate) fn spawn(
        id: usize,
        capacity: usize,
        engine: Arc<RetryEngine>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        // tokio channels need a non-zero buffer
        let capacity = capacity.max(1);
        let (queue, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(drain(id, rx, engine, in_flight));

        Self {
            id,
            capacity,
            queue,
            handle,
        }
    }
}

impl<T> Worker<T> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently waiting in the queue
    pub fn queued(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    pub(crate) fn queue(&self) -> &mpsc::Sender<Job<T>> {
        &self.queue
    }

    /// Whether the worker can be retired without stranding queued jobs
    pub(crate) fn is_idle(&self) -> bool {
        self.queue.is_closed() || self.queued() == 0
    }

    /// Close the queue and hand back the drain task
    pub(crate) fn close(self) -> JoinHandle<()> {
        let Worker { queue, handle, .. } = self;
        drop(queue);
        handle
    }
}

async fn drain<T>(
    id: usize,
    mut rx: mpsc::Receiver<Job<T>>,
    engine: Arc<RetryEngine>,
    in_flight: Arc<InFlight>,
) where
    T: Clone + Debug + Send + Sync + 'static,
{
    debug!(worker_id = id, "Worker started");

    while let Some(job) = rx.recv().await {
        let outcome = AssertUnwindSafe(engine.attempt(&job.ctx, &job.message, id, &job.results))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(ProcessError::Panicked(panic_message(payload))));

        match outcome {
            Ok(attempts) => {
                trace!(worker_id = id, message = ?job.message, attempts, "Message processed");
                job.mark_succeeded();
            }
            Err(e) => {
                warn!(
                    worker_id = id,
                    message = ?job.message,
                    code = e.code(),
                    "Message dead-lettered: {}",
                    e
                );
                job.dead_letters.push(job.message.clone());
            }
        }

        in_flight.decrement();
        drop(job);
    }

    debug!(worker_id = id, "Worker queue closed and drained");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::dead_letter::DeadLetterSink;
    use crate::retry::{AlwaysFail, FailureInjector, NeverFail, RetryPolicy};
    use crate::worker::{CompletionLatch, Processed};

    fn job(
        message: &'static str,
        ctx: &RequestContext,
        dead_letters: &Arc<DeadLetterSink<&'static str>>,
        results: &mpsc::Sender<Processed<&'static str>>,
        latch: &Arc<CompletionLatch>,
    ) -> Job<&'static str> {
        Job::new(
            message,
            ctx.clone(),
            Arc::clone(dead_letters),
            results.clone(),
            latch.add(),
        )
    }

    #[test]
    fn test_in_flight_never_negative() {
        let counter = InFlight::default();
        counter.increment();
        counter.reset();
        counter.decrement();
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_processes_fifo_and_drains_after_close() {
        let engine =
            Arc::new(RetryEngine::new(RetryPolicy::default()).with_failure_injector(NeverFail));
        let in_flight = Arc::new(InFlight::default());
        let worker = Worker::spawn(7, 4, engine, Arc::clone(&in_flight));
        assert_eq!(worker.id(), 7);
        assert_eq!(worker.capacity(), 4);

        let ctx = RequestContext::unbounded();
        let dead_letters = Arc::new(DeadLetterSink::new());
        let latch = CompletionLatch::new();
        let (tx, mut rx) = mpsc::channel(8);

        for message in ["a", "b", "c"] {
            in_flight.increment();
            worker
                .queue()
                .send(job(message, &ctx, &dead_letters, &tx, &latch))
                .await
                .unwrap();
        }
        drop(tx);

        // Closing with jobs still queued must not lose them
        worker.close().await.unwrap();
        latch.wait().await;

        let mut order = Vec::new();
        while let Some(processed) = rx.recv().await {
            assert_eq!(processed.worker_id, 7);
            order.push(processed.message);
        }
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(dead_letters.is_empty());
        assert_eq!(in_flight.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_dead_letters_failures() {
        let engine = Arc::new(RetryEngine::default().with_failure_injector(AlwaysFail));
        let in_flight = Arc::new(InFlight::default());
        let worker = Worker::spawn(0, 1, engine, Arc::clone(&in_flight));

        let ctx = RequestContext::unbounded();
        let dead_letters = Arc::new(DeadLetterSink::new());
        let latch = CompletionLatch::new();
        let (tx, mut rx) = mpsc::channel(1);

        in_flight.increment();
        worker
            .queue()
            .send(job("bad", &ctx, &dead_letters, &tx, &latch))
            .await
            .unwrap();
        drop(tx);
        latch.wait().await;

        assert_eq!(dead_letters.snapshot(), vec!["bad"]);
        assert!(rx.recv().await.is_none());
        assert_eq!(in_flight.get(), 0);
        assert!(worker.is_idle());
    }

    #[derive(Debug)]
    struct PanicOn(&'static str);

    impl FailureInjector for PanicOn {
        fn should_fail(&self, _attempt: u32) -> bool {
            panic!("injector blew up on {}", self.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_attempt_is_dead_lettered_and_worker_survives() {
        let engine = Arc::new(RetryEngine::default().with_failure_injector(PanicOn("any")));
        let in_flight = Arc::new(InFlight::default());
        let worker = Worker::spawn(0, 4, engine, Arc::clone(&in_flight));

        let ctx = RequestContext::unbounded();
        let dead_letters = Arc::new(DeadLetterSink::new());
        let latch = CompletionLatch::new();
        let (tx, mut rx) = mpsc::channel(4);

        for message in ["x", "y", "z"] {
            in_flight.increment();
            worker
                .queue()
                .send(job(message, &ctx, &dead_letters, &tx, &latch))
                .await
                .unwrap();
        }
        drop(tx);
        latch.wait().await;

        // Every job reached the sink and the queue is still open
        assert_eq!(dead_letters.snapshot(), vec!["x", "y", "z"]);
        assert_eq!(latch.succeeded(), 0);
        assert_eq!(in_flight.get(), 0);
        assert!(rx.recv().await.is_none());
        assert!(!worker.queue().is_closed());

        worker.close().await.unwrap();
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }
}
