//! Bounded work queue between the poll monitor and the worker pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use mailingest_imap::Uid;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};

use crate::{Error, Result};

/// A fetched candidate message.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// IMAP UID. Unique within one `UIDVALIDITY` epoch.
    pub uid: Uid,
    /// Full RFC 5322 bytes.
    pub bytes: Bytes,
    /// Parsed `Date` header.
    pub received_at: DateTime<Utc>,
}

/// A queued message plus the time it was queued.
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// The message.
    pub message: RawMessage,
    /// When the monitor enqueued it.
    pub enqueued_at: DateTime<Utc>,
}

/// Pipeline counters shared by the monitor and every worker.
#[derive(Debug, Default)]
pub struct PipelineStats {
    enqueued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    queue_depth: AtomicUsize,
    active_workers: AtomicUsize,
    max_workers: AtomicUsize,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Messages accepted onto the queue.
    pub enqueued: u64,
    /// Messages handled successfully.
    pub processed: u64,
    /// Messages whose handling failed or panicked.
    pub failed: u64,
    /// Messages waiting in the queue.
    pub queue_depth: usize,
    /// Workers currently handling a message.
    pub active_workers: usize,
    /// Size of the worker pool.
    pub max_workers: usize,
}

impl PipelineStats {
    /// Creates zeroed counters wrapped for sharing.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Copies the current counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            max_workers: self.max_workers.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn worker_finished(&self) {
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn set_max_workers(&self, n: usize) {
        self.max_workers.store(n, Ordering::Relaxed);
    }
}

/// Creates a queue holding at most `capacity` items.
#[must_use]
pub fn work_queue(capacity: usize, stats: Arc<PipelineStats>) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueSender {
            tx,
            stats: Arc::clone(&stats),
        },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
            stats,
        },
    )
}

/// Producer half. Dropping every sender closes the queue.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<QueueItem>,
    stats: Arc<PipelineStats>,
}

impl QueueSender {
    /// Enqueues a message, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] if every receiver is gone.
    pub async fn send(&self, message: RawMessage) -> Result<()> {
        let permit = self.tx.reserve().await.map_err(|_| Error::QueueClosed)?;
        let item = QueueItem {
            message,
            enqueued_at: Utc::now(),
        };
        // Count before the item becomes visible so a fast worker never
        // drives the depth below zero.
        self.stats.queue_depth.fetch_add(1, Ordering::Relaxed);
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        permit.send(item);
        Ok(())
    }
}

/// Result of a bounded pop.
#[derive(Debug)]
pub enum Pop {
    /// An item arrived.
    Item(QueueItem),
    /// Nothing arrived within the timeout.
    Empty,
    /// The queue is closed and drained.
    Closed,
}

/// Consumer half, shared by all workers.
#[derive(Debug, Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<QueueItem>>>,
    stats: Arc<PipelineStats>,
}

impl QueueReceiver {
    /// Waits up to `timeout` for the next item.
    pub async fn pop(&self, timeout: Duration) -> Pop {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(item)) => {
                self.stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
                Pop::Item(item)
            }
            Ok(None) => Pop::Closed,
            Err(_) => Pop::Empty,
        }
    }
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
    use super::*;

    fn message(n: u32) -> RawMessage {
        RawMessage {
            uid: Uid::new(n).unwrap(),
            bytes: Bytes::from_static(b"Subject: x\r\n\r\nbody"),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_send_pop_updates_depth() {
        let stats = PipelineStats::shared();
        let (tx, rx) = work_queue(4, Arc::clone(&stats));

        tx.send(message(1)).await.unwrap();
        tx.send(message(2)).await.unwrap();
        assert_eq!(stats.snapshot().queue_depth, 2);
        assert_eq!(stats.snapshot().enqueued, 2);

        let Pop::Item(item) = rx.pop(Duration::from_secs(1)).await else {
            panic!("expected an item");
        };
        assert_eq!(item.message.uid.get(), 1);
        assert_eq!(stats.snapshot().queue_depth, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_times_out_then_closes() {
        let (tx, rx) = work_queue(1, PipelineStats::shared());
        assert!(matches!(rx.pop(Duration::from_millis(50)).await, Pop::Empty));
        drop(tx);
        assert!(matches!(rx.pop(Duration::from_millis(50)).await, Pop::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_blocks_sender() {
        let stats = PipelineStats::shared();
        let (tx, rx) = work_queue(1, Arc::clone(&stats));
        tx.send(message(1)).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(100), tx.send(message(2))).await;
        assert!(blocked.is_err());
        assert_eq!(stats.snapshot().queue_depth, 1);

        assert!(matches!(rx.pop(Duration::from_secs(1)).await, Pop::Item(_)));
        tx.send(message(3)).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let stats = PipelineStats::shared();
        let (tx, rx) = work_queue(1, Arc::clone(&stats));
        drop(rx);
        assert!(matches!(tx.send(message(1)).await, Err(Error::QueueClosed)));
        assert_eq!(stats.snapshot().queue_depth, 0);
    }
}
