//! Per-context FIFO task serializer.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

/// Serializes asynchronous work: tasks submitted to one queue run
/// strictly one at a time, in submission order, regardless of whether
/// earlier tasks succeed or fail.
///
/// Tokio's async `Mutex` is fair (waiters acquire in FIFO order), so the
/// order in which tasks are submitted is the order in which they
/// execute. The pool holds one queue per context; independent contexts
/// proceed in parallel.
#[derive(Default)]
pub struct SerialQueue {
    lock: Mutex<()>,
    pending: AtomicUsize,
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A claimed slot on a queue.
///
/// The queue counts as busy from the moment the permit exists, which
/// lets the pool reserve a slot while it still holds its registry lock:
/// a queue with an outstanding permit can never be swept away between
/// lookup and execution.
pub struct QueuePermit {
    queue: Arc<SerialQueue>,
}

impl QueuePermit {
    /// Runs the task once every earlier submission has finished.
    pub async fn run<F, T>(self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let _serial = self.queue.lock.lock().await;
        task.await
    }
}

impl Drop for QueuePermit {
    fn drop(&mut self) {
        self.queue.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SerialQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a slot; the queue reports busy until the permit is used
    /// or dropped.
    pub fn reserve(self: &Arc<Self>) -> QueuePermit {
        self.pending.fetch_add(1, Ordering::SeqCst);
        QueuePermit {
            queue: Arc::clone(self),
        }
    }

    /// Runs a task after every previously submitted task has finished.
    pub async fn run<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let _pending = PendingGuard(&self.pending);

        let _serial = self.lock.lock().await;
        task.await
    }

    /// True when no task is queued or running.
    pub fn is_idle(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let queue = Arc::new(SerialQueue::new());
        let markers: Arc<AsyncMutex<Vec<String>>> = Arc::new(AsyncMutex::new(Vec::new()));

        let first = {
            let queue = Arc::clone(&queue);
            let markers = Arc::clone(&markers);
            tokio::spawn(async move {
                queue
                    .run(async {
                        markers.lock().await.push("start:first".to_string());
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        markers.lock().await.push("end:first".to_string());
                    })
                    .await;
            })
        };

        // Give the first task time to reach the lock before the second.
        tokio::time::sleep(Duration::from_millis(5)).await;

        let second = {
            let queue = Arc::clone(&queue);
            let markers = Arc::clone(&markers);
            tokio::spawn(async move {
                queue
                    .run(async {
                        markers.lock().await.push("start:second".to_string());
                        markers.lock().await.push("end:second".to_string());
                    })
                    .await;
            })
        };

        first.await.unwrap();
        second.await.unwrap();

        let markers = markers.lock().await.clone();
        assert_eq!(
            markers,
            vec!["start:first", "end:first", "start:second", "end:second"]
        );
    }

    #[tokio::test]
    async fn test_is_idle_tracks_queued_and_running() {
        let queue = Arc::new(SerialQueue::new());
        assert!(queue.is_idle());

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .run(async {
                        let _ = release_rx.await;
                    })
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!queue.is_idle());

        release_tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_reserved_permit_marks_queue_busy() {
        let queue = Arc::new(SerialQueue::new());

        let permit = queue.reserve();
        assert!(!queue.is_idle());

        let out = permit.run(async { 7 }).await;
        assert_eq!(out, 7);
        assert!(queue.is_idle());

        // A dropped permit releases its slot without running anything.
        drop(queue.reserve());
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_failed_task_does_not_block_the_next() {
        let queue = Arc::new(SerialQueue::new());

        let failed: Result<(), &str> = queue.run(async { Err("boom") }).await;
        assert!(failed.is_err());

        let ok = queue.run(async { 42 }).await;
        assert_eq!(ok, 42);
        assert!(queue.is_idle());
    }
}
