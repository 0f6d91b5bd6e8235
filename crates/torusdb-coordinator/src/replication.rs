//! Bounded worker pool for fire-and-forget replica writes and read repair.
//!
//! The queue is bounded with a caller-runs overflow policy: when replicas
//! lag far enough to fill the queue, the submitting request runs the task
//! inline, backpressuring the hot path instead of growing memory or
//! dropping work.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use torusdb_core::{metrics, ReplicationSettings};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Dedicated pool for asynchronous replication work. Distinct from the
/// resharding pool to prevent head-of-line blocking between the two.
pub struct ReplicationPool {
    sender: mpsc::Sender<Task>,
    pending: Arc<AtomicI64>,
}

impl ReplicationPool {
    /// Starts `settings.workers` drain tasks over a queue of
    /// `settings.queue_depth` entries.
    #[must_use]
    pub fn new(settings: &ReplicationSettings) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<Task>(settings.queue_depth.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let pending = Arc::new(AtomicI64::new(0));

        for _ in 0..settings.workers.max(1) {
            let receiver = receiver.clone();
            let pending = pending.clone();
            tokio::spawn(async move {
                loop {
                    let task = { receiver.lock().await.recv().await };
                    let Some(task) = task else { break };
                    metrics::REPLICATION_QUEUE_DEPTH.dec();
                    task.await;
                    pending.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }

        Arc::new(Self { sender, pending })
    }

    /// Enqueues a task, running it inline when the queue is full.
    pub async fn submit(
        &self,
        kind: &'static str,
        task: impl Future<Output = ()> + Send + 'static,
    ) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.sender.try_send(Box::pin(task)) {
            Ok(()) => {
                metrics::REPLICATION_QUEUE_DEPTH.inc();
            }
            Err(mpsc::error::TrySendError::Full(task))
            | Err(mpsc::error::TrySendError::Closed(task)) => {
                metrics::REPLICATION_CALLER_RUNS
                    .with_label_values(&[kind])
                    .inc();
                task.await;
                self.pending.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Waits until every submitted task has finished. Used on shutdown and
    /// by tests asserting on eventually-consistent replica state.
    pub async fn quiesce(&self) {
        while self.pending.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn settings(workers: usize, queue_depth: usize) -> ReplicationSettings {
        ReplicationSettings {
            workers,
            queue_depth,
        }
    }

    #[tokio::test]
    async fn submitted_tasks_run() {
        let pool = ReplicationPool::new(&settings(2, 8));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit("test", async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }
        pool.quiesce().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn overflow_runs_on_the_caller() {
        // One worker parked on a blocker, queue of one: the third submit
        // must complete inline before returning.
        let pool = ReplicationPool::new(&settings(1, 1));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel();

        pool.submit("test", async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        })
        .await;
        started_rx.await.unwrap();

        pool.submit("test", async {}).await;

        let ran_inline = Arc::new(AtomicUsize::new(0));
        let flag = ran_inline.clone();
        pool.submit("test", async move {
            flag.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(ran_inline.load(Ordering::SeqCst), 1);

        let _ = release_tx.send(());
        pool.quiesce().await;
    }
}
