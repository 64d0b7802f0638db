//! Retry engine with bounded exponential backoff
//!
//! Each message gets one initial attempt plus up to `max_retries` retries.
//! The work itself is simulated: an attempt waits its backoff delay and then
//! asks a [`FailureInjector`] whether it failed.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::ProcessError;
use crate::worker::Processed;

/// Configuration for message retries
///
/// # Example
///
/// ```
/// use elastic_pool::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_max_retries(3)
///     .with_initial_interval(Duration::from_millis(200));
///
/// // Attempt 1 waits 200ms, attempt 2 waits 400ms, attempt 3 waits 800ms, ...
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
/// assert_eq!(policy.max_attempts(), 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt
    pub max_retries: u32,

    /// Simulated work duration of the first attempt
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound for a single attempt's delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier between attempts
    pub backoff_coefficient: f64,

    /// Probability (0.0-1.0) that an attempt fails, used by [`RandomFailure`]
    pub failure_probability: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            failure_probability: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default settings
    ///
    /// - 3 retries (4 attempts total)
    /// - 200ms initial interval, doubled on every retry
    /// - 20% simulated failure probability
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of retries after the initial attempt
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay of the first attempt
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum delay of a single attempt
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    /// Set the simulated failure probability (0.0-1.0)
    ///
    /// Out-of-range values are clamped and NaN is treated as 0.0.
    pub fn with_failure_probability(mut self, probability: f64) -> Self {
        self.failure_probability = sanitize_probability(probability);
        self
    }

    /// Total attempts allowed, initial attempt included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay of a given attempt (1-based)
    ///
    /// Capped at `max_interval`. A deserialized coefficient that yields a
    /// negative delay waits zero; one that yields NaN waits `max_interval`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        if delay.is_nan() {
            return self.max_interval;
        }
        let delay = delay.clamp(0.0, self.max_interval.as_secs_f64());
        Duration::try_from_secs_f64(delay).unwrap_or(self.max_interval)
    }
}

fn sanitize_probability(probability: f64) -> f64 {
    if probability.is_nan() {
        0.0
    } else {
        probability.clamp(0.0, 1.0)
    }
}

/// Decides whether a simulated attempt fails
///
/// Pluggable so tests can force deterministic outcomes.
pub trait FailureInjector: Send + Sync + Debug {
    /// Return `true` if the given attempt (1-based) should fail
    fn should_fail(&self, attempt: u32) -> bool;
}

/// Fails each attempt independently with a fixed probability
#[derive(Debug, Clone)]
pub struct RandomFailure {
    probability: f64,
}

impl RandomFailure {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: sanitize_probability(probability),
        }
    }
}

impl FailureInjector for RandomFailure {
    fn should_fail(&self, _attempt: u32) -> bool {
        rand::thread_rng().gen_bool(self.probability)
    }
}

/// Never fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverFail;

impl FailureInjector for NeverFail {
    fn should_fail(&self, _attempt: u32) -> bool {
        false
    }
}

/// Always fails
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFail;

impl FailureInjector for AlwaysFail {
    fn should_fail(&self, _attempt: u32) -> bool {
        true
    }
}

/// Fails the first `n` attempts of every message, then succeeds
#[derive(Debug, Clone, Copy)]
pub struct FailFirst(pub u32);

impl FailureInjector for FailFirst {
    fn should_fail(&self, attempt: u32) -> bool {
        attempt <= self.0
    }
}

/// Runs one message through the retry policy
#[derive(Debug, Clone)]
pub struct RetryEngine {
    policy: RetryPolicy,
    failure: Arc<dyn FailureInjector>,
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryEngine {
    /// Create an engine whose failures follow the policy's probability
    pub fn new(policy: RetryPolicy) -> Self {
        let failure = Arc::new(RandomFailure::new(policy.failure_probability));
        Self { policy, failure }
    }

    /// Replace the failure source
    pub fn with_failure_injector(mut self, failure: impl FailureInjector + 'static) -> Self {
        self.failure = Arc::new(failure);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempt `message` until it succeeds, the retry budget runs out, or the
    /// request is canceled
    ///
    /// On success the result is sent to `results` and the number of attempts
    /// used is returned. Cancellation is only checked before an attempt; an
    /// attempt that already started finishes its delay first.
    ///
    /// Delivery of the result also honors cancellation. If `results` stays
    /// full until the request is canceled, this returns `Canceled` even
    /// though the attempt itself succeeded, and the caller dead-letters the
    /// message. Keep `results` drained to avoid that.
    pub async fn attempt<T>(
        &self,
        ctx: &RequestContext,
        message: &T,
        worker_id: usize,
        results: &mpsc::Sender<Processed<T>>,
    ) -> Result<u32, ProcessError>
    where
        T: Clone + Debug + Send,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        loop {
            if ctx.is_canceled() {
                return Err(ProcessError::Canceled);
            }
            if attempt > max_attempts {
                return Err(ProcessError::RetryExhausted {
                    attempts: max_attempts,
                });
            }

            tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;

            if self.failure.should_fail(attempt) {
                debug!(?message, attempt, "Simulated failure, retrying");
                attempt += 1;
                continue;
            }

            let processed = Processed {
                message: message.clone(),
                worker_id,
                attempts: attempt,
            };

            // A full result sink must not outlive the request
            tokio::select! {
                biased;
                sent = results.send(processed) => {
                    if sent.is_err() {
                        warn!(?message, "Result receiver dropped, discarding result");
                    }
                    return Ok(attempt);
                }
                _ = ctx.canceled() => return Err(ProcessError::Canceled),
            }
        }
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
