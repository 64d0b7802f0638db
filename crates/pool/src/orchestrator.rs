//! Request orchestration: drive one batch through the pool under a deadline

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::autoscaler::{Autoscaler, AutoscalerConfig, ProgressLogger};
use crate::context::RequestContext;
use crate::dead_letter::DeadLetterSink;
use crate::error::PoolError;
use crate::worker::{CompletionLatch, Job, Processed, WorkerPool};

/// Per-request configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestConfig {
    /// Deadline for the whole request
    #[serde(with = "duration_millis")]
    pub deadline: Duration,

    /// Maximum jobs in flight at once
    pub max_parallelism: usize,

    /// Autoscaler settings (`None` disables autoscaling)
    pub autoscaler: Option<AutoscalerConfig>,

    /// How often progress is logged
    #[serde(with = "duration_millis")]
    pub progress_interval: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(5),
            max_parallelism: 10,
            autoscaler: Some(AutoscalerConfig::default()),
            progress_interval: Duration::from_millis(500),
        }
    }
}

impl RequestConfig {
    /// Set the request deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the in-flight ceiling
    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = max.max(1);
        self
    }

    /// Set the autoscaler configuration
    pub fn with_autoscaler(mut self, config: AutoscalerConfig) -> Self {
        self.autoscaler = Some(config);
        self
    }

    /// Disable autoscaling for this request
    pub fn without_autoscaler(mut self) -> Self {
        self.autoscaler = None;
        self
    }

    /// Set the progress logging interval
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

/// Summary of a finished request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestReport {
    /// Messages handed to the pool
    pub submitted: usize,
    /// Messages whose result was delivered
    pub succeeded: usize,
    /// Dead letters recorded during this request
    pub dead_lettered: usize,
    /// Whether the deadline elapsed before every job finished
    pub timed_out: bool,
    /// Wall time of the request
    pub elapsed: Duration,
}

impl RequestReport {
    /// Submitted messages that neither succeeded nor were dead-lettered
    ///
    /// Zero for every request that ran to completion on a live pool.
    pub fn unaccounted(&self) -> usize {
        self.submitted
            .saturating_sub(self.succeeded)
            .saturating_sub(self.dead_lettered)
    }
}

/// Process `messages` concurrently on `pool`
///
/// Results are sent on `results`; the stream closes once this returns and
/// every job has finished. Messages that fail permanently, or are canceled by
/// the deadline, land in `dead_letters`. Partial failure is reported, never
/// raised; only structural pool errors are returned as `Err`.
///
/// The caller must drain `results` concurrently unless its capacity covers
/// the whole batch; a full result sink holds jobs until the deadline.
#[instrument(skip_all, fields(messages = messages.len(), deadline_ms = config.deadline.as_millis() as u64))]
pub async fn process_request<T>(
    messages: Vec<T>,
    pool: &Arc<WorkerPool<T>>,
    config: &RequestConfig,
    results: mpsc::Sender<Processed<T>>,
    dead_letters: &Arc<DeadLetterSink<T>>,
) -> Result<RequestReport, PoolError>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    let start = Instant::now();
    let dead_letters_before = dead_letters.len();
    let ctx = RequestContext::with_timeout(config.deadline);

    let autoscaler = config
        .autoscaler
        .clone()
        .map(|autoscaler| Autoscaler::spawn(Arc::clone(pool), ctx.clone(), autoscaler));
    let logger = ProgressLogger::spawn(Arc::clone(pool), ctx.clone(), config.progress_interval);

    let admission = Arc::new(Semaphore::new(config.max_parallelism.max(1)));
    let latch = CompletionLatch::new();
    let mut submitted = 0;
    let mut dispatch_error = None;

    for message in messages {
        let permit = match Arc::clone(&admission).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break, // never closed
        };

        let job = Job::new(
            message,
            ctx.clone(),
            Arc::clone(dead_letters),
            results.clone(),
            latch.add(),
        )
        .with_permit(permit);

        if let Err(e) = pool.dispatch(job).await {
            warn!("Dispatch failed, abandoning the rest of the batch: {}", e);
            dispatch_error = Some(e);
            break;
        }
        submitted += 1;
    }
    drop(results);

    debug!(submitted, "All messages dispatched, waiting for completion");
    latch.wait().await;

    let timed_out = ctx.is_canceled();
    ctx.cancel();
    for handle in autoscaler.into_iter().chain(std::iter::once(logger)) {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    if let Some(e) = dispatch_error {
        return Err(e);
    }

    let report = RequestReport {
        submitted,
        succeeded: latch.succeeded(),
        dead_lettered: dead_letters.len().saturating_sub(dead_letters_before),
        timed_out,
        elapsed: start.elapsed(),
    };

    info!(
        submitted = report.submitted,
        succeeded = report.succeeded,
        dead_lettered = report.dead_lettered,
        timed_out = report.timed_out,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Request completed"
    );

    Ok(report)
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
