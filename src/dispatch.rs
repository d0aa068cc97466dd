use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::ExecutionError;

/// Bounds how many jobs run at once and how many may wait for a slot.
#[derive(Debug)]
pub struct Dispatcher {
    slots: Semaphore,
    waiting: AtomicUsize,
    max_queued: usize,
}

impl Dispatcher {
    pub fn new(max_concurrent: usize, max_queued: usize) -> Self {
        Self {
            slots: Semaphore::new(max_concurrent),
            waiting: AtomicUsize::new(0),
            max_queued,
        }
    }

    /// Resolves once a slot is free, or fails with `Busy` if the wait queue is full.
    /// The slot is released when the permit is dropped.
    pub async fn admit(&self) -> Result<SemaphorePermit<'_>, ExecutionError> {
        if let Ok(permit) = self.slots.try_acquire() {
            return Ok(permit);
        }

        let queued = self.waiting.fetch_add(1, Ordering::AcqRel);
        let _ticket = QueueTicket(&self.waiting);
        if queued >= self.max_queued {
            tracing::warn!(waiting = queued, "execution queue full, rejecting job");
            return Err(ExecutionError::Busy);
        }
        tracing::debug!(position = queued + 1, "job queued for an execution slot");
        self.slots.acquire().await.map_err(|_| ExecutionError::Busy)
    }

    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

/// Leaves the queue on every path, including a dropped request future.
struct QueueTicket<'a>(&'a AtomicUsize);

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn free_slots_admit_immediately() {
        let dispatcher = Dispatcher::new(2, 0);
        let _a = dispatcher.admit().await.unwrap();
        let _b = dispatcher.admit().await.unwrap();
        assert_eq!(dispatcher.available(), 0);
        assert!(matches!(dispatcher.admit().await, Err(ExecutionError::Busy)));
        assert_eq!(dispatcher.queued(), 0);
    }

    #[tokio::test]
    async fn overflow_waits_then_runs() {
        let dispatcher = Arc::new(Dispatcher::new(1, 1));
        let first = dispatcher.admit().await.unwrap();

        let waiter = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let _permit = dispatcher.admit().await.unwrap();
            })
        };
        wait_until(|| dispatcher.queued() == 1).await;

        // queue of one is full
        assert!(matches!(dispatcher.admit().await, Err(ExecutionError::Busy)));
        assert_eq!(dispatcher.queued(), 1);

        drop(first);
        waiter.await.unwrap();
        assert_eq!(dispatcher.queued(), 0);
        assert_eq!(dispatcher.available(), 1);
    }

    #[tokio::test]
    async fn abandoned_waiter_leaves_queue() {
        let dispatcher = Dispatcher::new(1, 4);
        let _held = dispatcher.admit().await.unwrap();

        let attempt = tokio::time::timeout(Duration::from_millis(20), dispatcher.admit()).await;
        assert!(attempt.is_err());
        assert_eq!(dispatcher.queued(), 0);
    }
}
