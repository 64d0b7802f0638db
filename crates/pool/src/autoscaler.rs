//! Background control loops bound to one request
//!
//! - [`Autoscaler`] grows and shrinks the pool on a fixed cadence
//! - [`ProgressLogger`] reports the in-flight count periodically
//!
//! Neither ever blocks dispatch; structural errors are logged, not raised.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::worker::WorkerPool;

/// Autoscaler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoscalerConfig {
    /// Wait before scaling up, and again before scaling back down
    #[serde(with = "duration_millis")]
    pub interval: Duration,

    /// Workers added and then removed per cycle
    pub step: usize,

    /// Queue capacity of added workers
    pub capacity: usize,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            step: 2,
            capacity: 10,
        }
    }
}

impl AutoscalerConfig {
    /// Set the interval between scaling decisions
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the number of workers added and removed per cycle
    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    /// Set the queue capacity of added workers
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

/// Simulated load-responsive controller
///
/// Each cycle waits, adds `step` workers, waits, and removes `step` workers.
/// There is no real load sampling. A cycle that scaled up always scales back
/// down, even if the request is canceled in between, so the pool leaves the
/// request with the size it entered with.
pub struct Autoscaler;

impl Autoscaler {
    /// Run the control loop until `ctx` is canceled or the pool is torn down
    pub fn spawn<T>(
        pool: Arc<WorkerPool<T>>,
        ctx: RequestContext,
        config: AutoscalerConfig,
    ) -> JoinHandle<()>
    where
        T: Clone + Debug + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            loop {
                if ctx.is_canceled() || !pool.is_alive() {
                    break;
                }
                if ctx.sleep(config.interval).await {
                    break;
                }

                match pool.scale_up(config.step, config.capacity) {
                    Ok(size) => debug!(size, "Autoscaler scaled up"),
                    Err(e) => {
                        warn!("Autoscaler scale up failed: {}", e);
                        break;
                    }
                }

                let canceled = ctx.sleep(config.interval).await;

                match pool.scale_down(config.step).await {
                    Ok(closed) => debug!(closed, "Autoscaler scaled down"),
                    Err(e) => warn!("Autoscaler scale down failed: {}", e),
                }

                if canceled {
                    break;
                }
            }

            debug!("Autoscaler exited");
        })
    }
}

/// Periodic in-flight reporter
pub struct ProgressLogger;

impl ProgressLogger {
    /// Log the pool's in-flight count every `interval` until canceled
    pub fn spawn<T>(
        pool: Arc<WorkerPool<T>>,
        ctx: RequestContext,
        interval: Duration,
    ) -> JoinHandle<()>
    where
        T: Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !pool.is_alive() {
                            break;
                        }
                        info!(
                            in_flight = pool.in_flight(),
                            workers = pool.size(),
                            "Jobs in progress"
                        );
                    }
                    _ = ctx.canceled() => break,
                }
            }

            debug!("Progress logger exited");
        })
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
