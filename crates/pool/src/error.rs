//! Error types for message processing and pool structure

/// Why a single message could not be processed
///
/// These never escape a worker: the worker turns them into dead letters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    /// The request deadline elapsed or the request was canceled explicitly
    #[error("request canceled before the message was processed")]
    Canceled,

    /// Every attempt allowed by the retry policy failed
    #[error("retry budget exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// Processing the message panicked; the worker survives
    #[error("processing panicked: {0}")]
    Panicked(String),
}

impl ProcessError {
    /// Get a short error code for logging
    pub fn code(&self) -> &'static str {
        match self {
            ProcessError::Canceled => "CANCELED",
            ProcessError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            ProcessError::Panicked(_) => "PANICKED",
        }
    }
}

/// Errors reported by structural pool operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool has been torn down with `cleanup()`
    #[error("worker pool is not alive")]
    PoolNotAlive,

    /// The operation needs more workers than the pool currently holds
    #[error("requested {requested} workers but the pool only has {available}; use cleanup() for full teardown")]
    InsufficientWorkers { requested: usize, available: usize },
}
