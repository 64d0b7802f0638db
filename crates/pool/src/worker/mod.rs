//! Workers and the elastic worker pool
//!
//! This module provides:
//! - [`WorkerPool`] - Owns the workers, dispatches jobs, resizes while live
//! - [`Worker`] - One bounded inbound queue drained by one task
//! - [`Job`] / [`Processed`] - Unit of work and its result
//! - [`CompletionLatch`] - Wait-group signalled once per job
//! - [`WorkerSelector`] - Pluggable dispatch policy
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │   Mutex<workers, alive>         AtomicUsize in_flight        │
//! │         │                                                    │
//! │         ▼  dispatch (selector picks one queue)               │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐                    │
//! │  │ queue[C] │  │ queue[C] │  │ queue[C] │   ... scale_up     │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘       scale_down   │
//! │       ▼             ▼             ▼                          │
//! │   drain task    drain task    drain task                     │
//! │   (RetryEngine → results | dead letters, latch signal)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod completion;
mod job;
mod pool;
mod selector;
mod unit;

pub use completion::{CompletionHandle, CompletionLatch};
pub use job::{Job, Processed};
pub use pool::{PoolConfig, WorkerPool};
pub use selector::{RandomSelector, RoundRobinSelector, WorkerSelector};
pub use unit::Worker;
