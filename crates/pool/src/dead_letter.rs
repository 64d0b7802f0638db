//! Dead-letter sink for messages that could not be processed

use parking_lot::Mutex;

/// Append-only, thread-safe collection of permanently failed messages
///
/// Shared by every worker of a request. Read it after the request completes
/// to decide whether to re-submit, alert, or accept partial completion.
#[derive(Debug)]
pub struct DeadLetterSink<T> {
    failed: Mutex<Vec<T>>,
}

impl<T> Default for DeadLetterSink<T> {
    fn default() -> Self {
        Self {
            failed: Mutex::new(Vec::new()),
        }
    }
}

impl<T> DeadLetterSink<T> {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed message
    pub fn push(&self, message: T) {
        self.failed.lock().push(message);
    }

    /// Number of dead letters recorded so far
    pub fn len(&self) -> usize {
        self.failed.lock().len()
    }

    /// Whether no message has been dead-lettered
    pub fn is_empty(&self) -> bool {
        self.failed.lock().is_empty()
    }
}

impl<T: Clone> DeadLetterSink<T> {
    /// Copy of the dead letters in the order they were recorded
    pub fn snapshot(&self) -> Vec<T> {
        self.failed.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_push_preserves_order() {
        let sink = DeadLetterSink::new();
        assert!(sink.is_empty());

        sink.push("a");
        sink.push("b");

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.snapshot(), vec!["a", "b"]);
    }

    #[test]
    fn test_concurrent_writers() {
        let sink = Arc::new(DeadLetterSink::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        sink.push(t * 100 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(sink.len(), 800);
    }
}
