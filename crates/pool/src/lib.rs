//! # Elastic Worker Pool
//!
//! An in-process worker pool that processes a batch of messages concurrently
//! under a global deadline.
//!
//! ## Features
//!
//! - **Fan-out dispatch**: jobs go to one of N bounded per-worker queues, with backpressure
//! - **Bounded retries**: exponential backoff, at most `max_retries` retries per message
//! - **Dead-lettering**: permanently failed or canceled messages are collected, not raised
//! - **Autoscaling**: the worker set grows and shrinks while jobs are in flight
//! - **Admission control**: a semaphore caps the number of jobs in flight
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    process_request                           │
//! │  (deadline context, admission semaphore, completion latch)  │
//! └─────────────────────────────────────────────────────────────┘
//!          │ dispatch                   │ spawn
//!          ▼                            ▼
//! ┌──────────────────────────┐  ┌──────────────────────────────┐
//! │        WorkerPool        │◄─│ Autoscaler / ProgressLogger  │
//! │  (workers, in-flight)    │  └──────────────────────────────┘
//! └──────────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Worker drain loops → RetryEngine                    │
//! │          results channel  |  DeadLetterSink                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use elastic_pool::prelude::*;
//!
//! let pool = Arc::new(WorkerPool::<String>::new(PoolConfig::new(5, 10)));
//! let dead_letters = Arc::new(DeadLetterSink::new());
//! let (tx, mut rx) = mpsc::channel(20);
//!
//! let messages: Vec<String> = (0..20).map(|i| format!("event-{i}")).collect();
//! let report = process_request(messages, &pool, &RequestConfig::default(), tx, &dead_letters).await?;
//!
//! while let Some(processed) = rx.recv().await {
//!     println!("{:?}", processed);
//! }
//! pool.cleanup();
//! ```

pub mod autoscaler;
pub mod context;
pub mod dead_letter;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::autoscaler::{Autoscaler, AutoscalerConfig, ProgressLogger};
    pub use crate::context::RequestContext;
    pub use crate::dead_letter::DeadLetterSink;
    pub use crate::error::{PoolError, ProcessError};
    pub use crate::orchestrator::{process_request, RequestConfig, RequestReport};
    pub use crate::retry::{
        AlwaysFail, FailFirst, FailureInjector, NeverFail, RandomFailure, RetryEngine, RetryPolicy,
    };
    pub use crate::worker::{
        Job, PoolConfig, Processed, RandomSelector, RoundRobinSelector, WorkerPool, WorkerSelector,
    };
    pub use std::sync::Arc;
    pub use tokio::sync::mpsc;
}

// Re-export key types at crate root
pub use autoscaler::{Autoscaler, AutoscalerConfig, ProgressLogger};
pub use context::RequestContext;
pub use dead_letter::DeadLetterSink;
pub use error::{PoolError, ProcessError};
pub use orchestrator::{process_request, RequestConfig, RequestReport};
pub use retry::{
    AlwaysFail, FailFirst, FailureInjector, NeverFail, RandomFailure, RetryEngine, RetryPolicy,
};
pub use worker::{
    CompletionLatch, Job, PoolConfig, Processed, RandomSelector, RoundRobinSelector, WorkerPool,
    WorkerSelector,
};
