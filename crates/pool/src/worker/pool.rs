//! Elastic worker pool
//!
//! Owns the worker set, dispatches jobs with backpressure, and resizes
//! itself while jobs are flowing.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::job::Job;
use super::selector::{RandomSelector, WorkerSelector};
use super::unit::{InFlight, Worker};
use crate::error::PoolError;
use crate::retry::{RetryEngine, RetryPolicy};

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Workers started at construction
    pub workers: usize,

    /// Capacity of each worker's inbound queue
    pub queue_capacity: usize,

    /// Retry policy applied to every message
    pub retry: RetryPolicy,

    /// How often `scale_down` re-checks for idle workers
    #[serde(with = "duration_millis")]
    pub scale_down_poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 10,
            retry: RetryPolicy::default(),
            scale_down_poll_interval: Duration::from_millis(50),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with `workers` queues of `queue_capacity` each
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            ..Default::default()
        }
    }

    /// Read the configuration from environment variables
    ///
    /// - `ELASTIC_POOL_WORKERS` (default 3)
    /// - `ELASTIC_POOL_QUEUE_CAPACITY` (default 10)
    /// - `ELASTIC_POOL_FAILURE_RATE` (default 0.2)
    /// - `ELASTIC_POOL_BASE_DELAY_MS` (default 200)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let workers = env_parse("ELASTIC_POOL_WORKERS").unwrap_or(defaults.workers);
        let queue_capacity =
            env_parse("ELASTIC_POOL_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity);

        let mut retry = defaults.retry.clone();
        if let Some(rate) = env_parse::<f64>("ELASTIC_POOL_FAILURE_RATE") {
            retry = retry.with_failure_probability(rate);
        }
        if let Some(millis) = env_parse::<u64>("ELASTIC_POOL_BASE_DELAY_MS") {
            retry = retry.with_initial_interval(Duration::from_millis(millis));
        }

        Self {
            workers,
            queue_capacity,
            retry,
            ..defaults
        }
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the scale-down polling interval
    pub fn with_scale_down_poll_interval(mut self, interval: Duration) -> Self {
        self.scale_down_poll_interval = interval;
        self
    }
}

fn env_parse<V: std::str::FromStr>(key: &str) -> Option<V> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Structural state, guarded by one lock
struct PoolState<T> {
    workers: Vec<Worker<T>>,
    alive: bool,
    next_id: usize,
}

/// Elastic pool of workers, each draining its own bounded queue
///
/// # Example
///
/// ```ignore
/// use elastic_pool::{PoolConfig, WorkerPool};
///
/// let pool = WorkerPool::<String>::new(PoolConfig::new(5, 10));
///
/// pool.scale_up(2, 10)?;          // 7 workers
/// pool.scale_down(2).await?;      // back to 5
///
/// pool.cleanup();
/// ```
pub struct WorkerPool<T> {
    config: PoolConfig,
    engine: Arc<RetryEngine>,
    selector: Arc<dyn WorkerSelector>,
    state: Mutex<PoolState<T>>,
    in_flight: Arc<InFlight>,
}

impl<T> WorkerPool<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    /// Create a pool with random dispatch and random simulated failures
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: PoolConfig) -> Self {
        let engine = RetryEngine::new(config.retry.clone());
        Self::with_parts(config, engine, RandomSelector)
    }

    /// Create a pool with an explicit retry engine and worker selector
    pub fn with_parts(
        config: PoolConfig,
        engine: RetryEngine,
        selector: impl WorkerSelector + 'static,
    ) -> Self {
        let engine = Arc::new(engine);
        let in_flight = Arc::new(InFlight::default());

        let workers = (0..config.workers)
            .map(|id| {
                Worker::spawn(
                    id,
                    config.queue_capacity,
                    Arc::clone(&engine),
                    Arc::clone(&in_flight),
                )
            })
            .collect();

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Self {
            state: Mutex::new(PoolState {
                workers,
                alive: true,
                next_id: config.workers,
            }),
            config,
            engine,
            selector: Arc::new(selector),
            in_flight,
        }
    }

    /// Send a job to one worker, chosen by the selector
    ///
    /// Waits while the chosen worker's queue is full. Returns the id of the
    /// worker that received the job.
    pub async fn dispatch(&self, job: Job<T>) -> Result<usize, PoolError> {
        let (worker_id, queue) = {
            let state = self.state.lock();
            if !state.alive {
                return Err(PoolError::PoolNotAlive);
            }
            if state.workers.is_empty() {
                return Err(PoolError::InsufficientWorkers {
                    requested: 1,
                    available: 0,
                });
            }

            let index = self.selector.select(state.workers.len()) % state.workers.len();
            let worker = &state.workers[index];
            (worker.id(), worker.queue().clone())
        };

        // Counted before the send so a fast worker can't decrement first
        self.in_flight.increment();
        if queue.send(job).await.is_err() {
            self.in_flight.decrement();
            warn!(worker_id, "Worker queue closed during dispatch");
            return Err(PoolError::PoolNotAlive);
        }

        debug!(worker_id, "Job dispatched");
        Ok(worker_id)
    }

    /// Add `n` workers, each with a queue of `capacity`
    ///
    /// Returns the new pool size.
    #[instrument(skip(self))]
    pub fn scale_up(&self, n: usize, capacity: usize) -> Result<usize, PoolError> {
        let mut state = self.state.lock();
        if !state.alive {
            warn!("Ignoring scale up on a torn-down pool");
            return Err(PoolError::PoolNotAlive);
        }

        for _ in 0..n {
            let id = state.next_id;
            state.next_id += 1;
            state.workers.push(Worker::spawn(
                id,
                capacity,
                Arc::clone(&self.engine),
                Arc::clone(&self.in_flight),
            ));
        }

        info!(added = n, size = state.workers.len(), "Added workers to the pool");
        Ok(state.workers.len())
    }

    /// Remove `n` workers by closing their queues
    ///
    /// Only idle workers (empty or closed queue) are retired. If fewer than
    /// `n` are idle, waits for busy ones to drain until enough qualify or the
    /// pool is torn down. Returns once every retired worker has finished its
    /// last job, with the number of workers actually removed.
    #[instrument(skip(self))]
    pub async fn scale_down(&self, n: usize) -> Result<usize, PoolError> {
        {
            let state = self.state.lock();
            if !state.alive {
                warn!("Ignoring scale down on a torn-down pool");
                return Err(PoolError::PoolNotAlive);
            }
            if n > state.workers.len() {
                warn!(
                    requested = n,
                    available = state.workers.len(),
                    "Scale down exceeds the worker count; use cleanup() instead"
                );
                return Err(PoolError::InsufficientWorkers {
                    requested: n,
                    available: state.workers.len(),
                });
            }
        }

        let mut retired = Vec::with_capacity(n);
        loop {
            {
                let mut state = self.state.lock();
                let mut index = 0;
                while retired.len() < n && index < state.workers.len() {
                    if state.workers[index].is_idle() {
                        let worker = state.workers.remove(index);
                        debug!(worker_id = worker.id(), "Closing worker queue");
                        retired.push(worker.close());
                    } else {
                        index += 1;
                    }
                }

                if retired.len() == n || !state.alive || state.workers.is_empty() {
                    break;
                }
            }

            debug!(
                closed = retired.len(),
                requested = n,
                "Waiting for busy workers to drain"
            );
            tokio::time::sleep(self.config.scale_down_poll_interval).await;
        }

        let closed = retired.len();
        for result in futures::future::join_all(retired).await {
            if let Err(e) = result {
                warn!("Worker task ended abnormally: {}", e);
            }
        }

        info!(closed, size = self.size(), "Removed workers from the pool");
        Ok(closed)
    }

    /// Tear the pool down: stop accepting work and close every queue
    ///
    /// Idempotent and non-blocking. Jobs already queued are still drained in
    /// the background.
    pub fn cleanup(&self) {
        let workers = {
            let mut state = self.state.lock();
            state.alive = false;
            std::mem::take(&mut state.workers)
        };
        self.in_flight.reset();

        if workers.is_empty() {
            return;
        }

        info!(count = workers.len(), "Closing all worker queues");
        for worker in workers {
            // Detached: the drain task exits on its own once the queue is empty
            drop(worker.close());
        }
    }
}

impl<T> WorkerPool<T> {
    /// Current number of workers
    pub fn size(&self) -> usize {
        self.state.lock().workers.len()
    }

    /// Whether the pool still accepts work
    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    /// Jobs dispatched but not finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    /// Worker ids in pool order
    pub fn worker_ids(&self) -> Vec<usize> {
        self.state.lock().workers.iter().map(Worker::id).collect()
    }

    /// Queue capacity of each worker, in pool order
    pub fn capacities(&self) -> Vec<usize> {
        self.state.lock().workers.iter().map(Worker::capacity).collect()
    }

    /// Jobs waiting in each worker's queue, in pool order
    pub fn queue_depths(&self) -> Vec<usize> {
        self.state.lock().workers.iter().map(Worker::queued).collect()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::dead_letter::DeadLetterSink;
    use crate::retry::NeverFail;
    use crate::worker::{CompletionLatch, Processed, RoundRobinSelector};
    use tokio::sync::mpsc;

    fn quiet_pool(workers: usize, capacity: usize) -> WorkerPool<String> {
        WorkerPool::with_parts(
            PoolConfig::new(workers, capacity),
            RetryEngine::default().with_failure_injector(NeverFail),
            RoundRobinSelector::new(),
        )
    }

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.workers, 3);
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.scale_down_poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_config_from_env() {
        std::env::set_var("ELASTIC_POOL_WORKERS", "7");
        std::env::set_var("ELASTIC_POOL_FAILURE_RATE", "0.5");
        std::env::set_var("ELASTIC_POOL_QUEUE_CAPACITY", "not-a-number");

        let config = PoolConfig::from_env();

        assert_eq!(config.workers, 7);
        assert_eq!(config.retry.failure_probability, 0.5);
        assert_eq!(config.queue_capacity, 10);

        std::env::remove_var("ELASTIC_POOL_WORKERS");
        std::env::remove_var("ELASTIC_POOL_FAILURE_RATE");
        std::env::remove_var("ELASTIC_POOL_QUEUE_CAPACITY");
    }

    #[test]
    fn test_config_serialization() {
        let config = PoolConfig::new(5, 20)
            .with_scale_down_poll_interval(Duration::from_millis(10));

        let json = serde_json::to_string(&config).unwrap();
        let parsed: PoolConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config, parsed);
    }

    #[tokio::test]
    async fn test_new_pool_shape() {
        let pool = quiet_pool(2, 2);

        assert_eq!(pool.size(), 2);
        assert_eq!(pool.worker_ids(), vec![0, 1]);
        assert_eq!(pool.capacities(), vec![2, 2]);
        assert!(pool.is_alive());
        assert_eq!(pool.in_flight(), 0);

        pool.cleanup();
    }

    #[tokio::test]
    async fn test_scale_up_continues_ids() {
        let pool = quiet_pool(5, 10);

        assert_eq!(pool.scale_up(5, 20).unwrap(), 10);
        assert_eq!(pool.worker_ids(), (0..10).collect::<Vec<_>>());
        assert_eq!(pool.capacities()[7], 20);

        pool.cleanup();
    }

    #[tokio::test]
    async fn test_scale_down_idle_workers() {
        let pool = quiet_pool(5, 10);

        assert_eq!(pool.scale_down(4).await.unwrap(), 4);
        assert_eq!(pool.size(), 1);

        // Ids are never reused
        pool.scale_up(1, 10).unwrap();
        assert_eq!(pool.worker_ids(), vec![4, 5]);

        pool.cleanup();
    }

    #[tokio::test]
    async fn test_scale_down_too_many_is_rejected() {
        let pool = quiet_pool(3, 10);

        let err = pool.scale_down(4).await.unwrap_err();

        assert_eq!(
            err,
            PoolError::InsufficientWorkers {
                requested: 4,
                available: 3
            }
        );
        assert_eq!(pool.size(), 3);

        pool.cleanup();
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let pool = quiet_pool(2, 2);

        pool.cleanup();
        pool.cleanup();

        assert!(!pool.is_alive());
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.scale_up(1, 1), Err(PoolError::PoolNotAlive));
        assert_eq!(pool.scale_down(2).await, Err(PoolError::PoolNotAlive));
        assert_eq!(pool.scale_down(0).await, Err(PoolError::PoolNotAlive));
    }

    #[tokio::test]
    async fn test_dispatch_after_cleanup_is_rejected() {
        let pool = quiet_pool(2, 2);
        pool.cleanup();

        let latch = CompletionLatch::new();
        let (tx, _rx) = mpsc::channel::<Processed<String>>(1);
        let job = Job::new(
            "late".to_string(),
            RequestContext::unbounded(),
            Arc::new(DeadLetterSink::new()),
            tx,
            latch.add(),
        );

        assert_eq!(pool.dispatch(job).await, Err(PoolError::PoolNotAlive));
        // The rejected job still counts as complete
        assert_eq!(latch.pending(), 0);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_round_robin() {
        let pool = quiet_pool(3, 4);
        let ctx = RequestContext::unbounded();
        let dead_letters = Arc::new(DeadLetterSink::new());
        let latch = CompletionLatch::new();
        let (tx, mut rx) = mpsc::channel(8);

        let mut targets = Vec::new();
        for i in 0..6 {
            let job = Job::new(
                format!("event-{i}"),
                ctx.clone(),
                Arc::clone(&dead_letters),
                tx.clone(),
                latch.add(),
            );
            targets.push(pool.dispatch(job).await.unwrap());
        }
        drop(tx);
        latch.wait().await;

        assert_eq!(targets, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(pool.in_flight(), 0);

        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 6);

        pool.cleanup();
    }
}
