//! Worker pool draining the work queue.
//!
//! Each worker pops one item at a time and hands it to a
//! [`MessageHandler`]. The handler runs in its own task, so a panic is
//! contained to that one item and counted as a failure; the worker and the
//! rest of the pool keep going.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::Result;
use crate::queue::{PipelineStats, Pop, QueueItem, QueueReceiver};

/// Processes one dequeued message.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles `item`. An error marks the item failed; it is not requeued.
    fn handle(&self, item: QueueItem) -> impl Future<Output = Result<()>> + Send;
}

/// A fixed set of workers sharing one queue.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `count` workers.
    pub fn spawn<H: MessageHandler>(
        count: usize,
        queue: &QueueReceiver,
        handler: Arc<H>,
        stats: &Arc<PipelineStats>,
        pop_timeout: Duration,
    ) -> Self {
        stats.set_max_workers(count);
        let handles = (0..count)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    queue.clone(),
                    Arc::clone(&handler),
                    Arc::clone(stats),
                    pop_timeout,
                ))
            })
            .collect();
        info!(workers = count, "worker pool started");
        Self { handles }
    }

    /// Waits for the workers to drain the closed queue.
    ///
    /// The queue must be closed (every sender dropped) or this waits for the
    /// full timeout. Workers still running after `timeout` are aborted; an
    /// item already handed to its handler task still runs to completion.
    /// Returns true if every worker finished in time.
    pub async fn drain(mut self, timeout: Duration) -> bool {
        let finished = tokio::time::timeout(timeout, async {
            for handle in &mut self.handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "worker task ended abnormally");
                }
            }
        })
        .await
        .is_ok();

        if !finished {
            warn!(?timeout, "drain timed out, aborting remaining workers");
            for handle in &self.handles {
                handle.abort();
            }
        }
        finished
    }
}

async fn worker_loop<H: MessageHandler>(
    id: usize,
    queue: QueueReceiver,
    handler: Arc<H>,
    stats: Arc<PipelineStats>,
    pop_timeout: Duration,
) {
    debug!(worker = id, "worker started");
    loop {
        match queue.pop(pop_timeout).await {
            Pop::Item(item) => process(id, &handler, &stats, item).await,
            Pop::Empty => trace!(worker = id, "queue idle"),
            Pop::Closed => break,
        }
    }
    debug!(worker = id, "worker stopped");
}

async fn process<H: MessageHandler>(
    id: usize,
    handler: &Arc<H>,
    stats: &PipelineStats,
    item: QueueItem,
) {
    let uid = item.message.uid;
    let waited = chrono::Utc::now() - item.enqueued_at;
    debug!(worker = id, uid = %uid, waited_ms = waited.num_milliseconds(), "processing message");

    stats.worker_started();
    let handler = Arc::clone(handler);
    let task = tokio::spawn(async move { handler.handle(item).await });

    match task.await {
        Ok(Ok(())) => {
            stats.record_processed();
            debug!(worker = id, uid = %uid, "message processed");
        }
        Ok(Err(e)) => {
            stats.record_failed();
            warn!(worker = id, uid = %uid, error = %e, kind = ?e.kind(), "message failed");
        }
        Err(e) => {
            stats.record_failed();
            error!(worker = id, uid = %uid, error = %e, "message handler panicked");
        }
    }
    stats.worker_finished();
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use chrono::Utc;
    use mailingest_imap::Uid;

    use super::*;
    use crate::Error;
    use crate::queue::{RawMessage, work_queue};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
    }

    impl MessageHandler for Recorder {
        async fn handle(&self, item: QueueItem) -> Result<()> {
            let uid = item.message.uid.get();
            match uid {
                3 => Err(Error::Storage("disk full".to_string())),
                4 => panic!("handler bug"),
                _ => {
                    self.seen.lock().unwrap().push(uid);
                    Ok(())
                }
            }
        }
    }

    fn message(n: u32) -> RawMessage {
        RawMessage {
            uid: Uid::new(n).unwrap(),
            bytes: Bytes::new(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_isolated() {
        let stats = PipelineStats::shared();
        let (tx, rx) = work_queue(8, Arc::clone(&stats));
        let handler = Arc::new(Recorder::default());
        let pool = WorkerPool::spawn(2, &rx, Arc::clone(&handler), &stats, Duration::from_millis(20));

        for n in 1..=6 {
            tx.send(message(n)).await.unwrap();
        }
        drop(tx);
        assert!(pool.drain(Duration::from_secs(5)).await);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.enqueued, 6);
        assert_eq!(snapshot.processed, 4);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.queue_depth, 0);
        assert_eq!(snapshot.active_workers, 0);
        assert_eq!(snapshot.max_workers, 2);

        let mut seen = handler.seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 5, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_with_open_queue() {
        let stats = PipelineStats::shared();
        let (_tx, rx) = work_queue(1, Arc::clone(&stats));
        let pool = WorkerPool::spawn(1, &rx, Arc::new(Recorder::default()), &stats, Duration::from_millis(10));
        assert!(!pool.drain(Duration::from_millis(100)).await);
    }
}
