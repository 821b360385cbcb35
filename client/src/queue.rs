//! Thread-safe FIFO queue with timed waiting, shared by the network workers

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

/// FIFO queue that producers push into from any thread and a single worker
/// drains after waiting for data.
///
/// Pushing never blocks and never fails. Waiting is bounded so the worker can
/// re-check its stop flag.
pub struct MessageQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        self.lock().push_back(item);
        self.notify.notify_one();
    }

    /// Removes the oldest item, if any.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Drains every queued item in the order they were pushed.
    pub fn pop_all(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Suspends until at least one item is queued or `timeout` elapses.
    /// Returns whether data is available.
    pub async fn wait_for_messages(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            if !self.is_empty() {
                return true;
            }

            // A permit left over from an already drained push wakes us early;
            // loop until the deadline instead of reporting a false positive.
            if timeout_at(deadline, self.notify.notified()).await.is_err() {
                return !self.is_empty();
            }
        }
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
