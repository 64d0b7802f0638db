//! Units of work and their results

use std::sync::Arc;

use tokio::sync::{mpsc, OwnedSemaphorePermit};

use super::completion::CompletionHandle;
use crate::context::RequestContext;
use crate::dead_letter::DeadLetterSink;

/// A successfully processed message, as delivered on the result stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed<T> {
    /// The message that was processed
    pub message: T,
    /// Worker that processed it
    pub worker_id: usize,
    /// Attempts used, initial attempt included
    pub attempts: u32,
}

/// One dispatched message together with everything a worker needs to finish it
///
/// Dropping a job signals its completion handle and releases its admission
/// permit, so every job is accounted for exactly once whether it succeeded,
/// was dead-lettered, or never reached a worker.
#[derive(Debug)]
pub struct Job<T> {
    pub(crate) message: T,
    pub(crate) ctx: RequestContext,
    pub(crate) dead_letters: Arc<DeadLetterSink<T>>,
    pub(crate) results: mpsc::Sender<Processed<T>>,
    completion: CompletionHandle,
    _permit: Option<OwnedSemaphorePermit>,
}

impl<T> Job<T> {
    pub fn new(
        message: T,
        ctx: RequestContext,
        dead_letters: Arc<DeadLetterSink<T>>,
        results: mpsc::Sender<Processed<T>>,
        completion: CompletionHandle,
    ) -> Self {
        Self {
            message,
            ctx,
            dead_letters,
            results,
            completion,
            _permit: None,
        }
    }

    /// Hold an admission permit until the job is finished
    pub fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self._permit = Some(permit);
        self
    }

    pub fn message(&self) -> &T {
        &self.message
    }

    pub(crate) fn mark_succeeded(&self) {
        self.completion.succeed();
    }
}
