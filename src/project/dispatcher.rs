//! Bounded execution worker pool.
//!
//! Jobs go into a fixed-capacity queue and are drained by a fixed number of
//! worker tasks. Submission never waits: a full queue is reported to the
//! caller, which decides what to roll back.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::SyncError;

/// A unit of execution work: run `task_id` (tracker ID) as `agent_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchJob {
    pub task_id: String,
    pub agent_id: String,
}

/// Fixed-size worker pool fed by a bounded queue.
pub struct Dispatcher<J> {
    tx: mpsc::Sender<J>,
    rx: Arc<Mutex<mpsc::Receiver<J>>>,
    workers: usize,
    capacity: usize,
}

impl<J: Send + 'static> Dispatcher<J> {
    /// Create a pool of `workers` with room for `capacity` queued jobs.
    /// Both are raised to at least 1.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            workers: workers.max(1),
            capacity,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Queue a job without waiting.
    pub fn try_submit(&self, job: J) -> Result<(), SyncError> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SyncError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SyncError::ShuttingDown,
        })
    }

    /// Spawn the workers on `tracker`. Each runs `handler` for one job at a
    /// time until `cancel` fires; a job already running is not interrupted.
    pub fn spawn_workers<F, Fut>(&self, tracker: &TaskTracker, cancel: &CancellationToken, handler: F)
    where
        F: Fn(J) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        for worker in 0..self.workers {
            let rx = Arc::clone(&self.rx);
            let cancel = cancel.clone();
            let handler = handler.clone();
            tracker.spawn(async move {
                tracing::debug!(worker, "Dispatch worker started");
                loop {
                    let job = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        job = async { rx.lock().await.recv().await } => job,
                    };
                    let Some(job) = job else { break };
                    handler(job).await;
                }
                tracing::debug!(worker, "Dispatch worker stopped");
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_full_queue_rejects() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new(1, 2);
        dispatcher.try_submit(1).unwrap();
        dispatcher.try_submit(2).unwrap();
        assert_eq!(dispatcher.queued(), 2);
        assert!(matches!(dispatcher.try_submit(3), Err(SyncError::QueueFull)));
    }

    #[test]
    fn test_zero_sizes_are_raised() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new(0, 0);
        assert_eq!(dispatcher.workers(), 1);
        dispatcher.try_submit(1).unwrap();
    }

    #[tokio::test]
    async fn test_workers_drain_queue_and_stop_on_cancel() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new(3, 16);
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let done = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&done);
        dispatcher.spawn_workers(&tracker, &cancel, move |_job| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        for job in 0..10 {
            dispatcher.try_submit(job).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while done.load(Ordering::SeqCst) < 10 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        tracker.close();
        tokio::time::timeout(Duration::from_secs(5), tracker.wait())
            .await
            .unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }
}
