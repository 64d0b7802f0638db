//! Request-scoped cancellation context
//!
//! A [`RequestContext`] carries the request deadline and a cancellation
//! signal. Every job of a request holds a clone; cancelling any clone cancels
//! all of them.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Deadline plus cancellation signal shared by one request
///
/// Cancellation is monotonic: once [`is_canceled`](Self::is_canceled) returns
/// `true` it never returns `false` again.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl RequestContext {
    /// Create a context that cancels itself once `timeout` has elapsed
    ///
    /// Spawns the single deadline timer for the request, so it must be
    /// called from within a tokio runtime.
    pub fn with_timeout(timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let token = CancellationToken::new();

        let timer_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("Request deadline elapsed");
                    timer_token.cancel();
                }
                _ = timer_token.cancelled() => {}
            }
        });

        Self {
            deadline: Some(deadline),
            token,
        }
    }

    /// Create a context without a deadline (only explicit cancellation)
    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    /// Check whether the request has been canceled or its deadline passed
    pub fn is_canceled(&self) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        // The timer task may not have run yet when the deadline is reached
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    /// Cancel the request. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait until the request is canceled
    pub async fn canceled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Sleep for `duration`, returning early with `true` if canceled first
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_canceled(),
            _ = self.canceled() => true,
        }
    }

    /// Get the deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline (`None` for unbounded contexts)
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_context() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(1));
        assert!(!ctx.is_canceled());

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert!(ctx.is_canceled());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_shared() {
        let ctx = RequestContext::unbounded();
        let clone = ctx.clone();

        clone.cancel();
        clone.cancel();

        assert!(ctx.is_canceled());
        assert!(ctx.deadline().is_none());
        ctx.canceled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_returns_early_on_cancel() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(100));
        let start = Instant::now();

        let canceled = ctx.sleep(Duration::from_secs(10)).await;

        assert!(canceled);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancel() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(10));
        assert!(!ctx.sleep(Duration::from_secs(1)).await);
        assert!(ctx.remaining().unwrap() <= Duration::from_secs(9));
    }
}
