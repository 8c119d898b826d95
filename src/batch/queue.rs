//! Shared FIFO of pending jobs.

use std::collections::VecDeque;

use tokio::sync::Mutex;

/// FIFO queue shared by all workers.
///
/// Every item is handed out by [`claim`](Self::claim) at most once, no matter
/// how many workers race for it.
#[derive(Debug)]
pub struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> TaskQueue<T> {
    /// Remove and return the oldest item, or `None` once the queue is drained.
    pub async fn claim(&self) -> Option<T> {
        self.items.lock().await.pop_front()
    }
}

impl<T> FromIterator<T> for TaskQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: Mutex::new(iter.into_iter().collect()),
        }
    }
}
