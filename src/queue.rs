use crate::record::LogRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::time::{timeout, Duration};

/// One slot in the log queue: a record, or the shutdown marker.
#[derive(Debug)]
pub enum QueueItem {
    Record(Box<LogRecord>),
    /// Poison pill. Never handed to a sink.
    Sentinel,
}

/// Outcome of a dequeue attempt.
#[derive(Debug)]
pub enum Dequeue {
    Item(QueueItem),
    /// Nothing arrived within the wait (or, for `try_recv`, right now).
    Empty,
    /// Every sender is gone and the queue is drained.
    Closed,
}

/// Producer-side enqueue failure. The record is dropped.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("log queue is full")]
    Full,
    #[error("log queue is closed")]
    Closed,
}

/// Counters shared by both ends of a queue.
#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    handled: AtomicU64,
}

impl QueueStats {
    /// Records successfully pushed (sentinels excluded).
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Records rejected because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Records acknowledged by the consumer via `task_done`.
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Acquire)
    }

    /// Records enqueued but not yet acknowledged.
    pub fn unfinished(&self) -> u64 {
        self.enqueued().saturating_sub(self.handled())
    }
}

#[derive(Clone)]
enum Tx {
    Bounded(mpsc::Sender<QueueItem>),
    Unbounded(mpsc::UnboundedSender<QueueItem>),
}

enum Rx {
    Bounded(mpsc::Receiver<QueueItem>),
    Unbounded(mpsc::UnboundedReceiver<QueueItem>),
}

/// Cloneable, non-blocking producer end of the log queue.
#[derive(Clone)]
pub struct QueueSender {
    tx: Tx,
    stats: Arc<QueueStats>,
}

/// Single consumer end of the log queue.
pub struct QueueReceiver {
    rx: Rx,
    stats: Arc<QueueStats>,
}

/// Create a FIFO log queue.
///
/// `None` yields an unbounded queue. `Some(n)` bounds it to `n` slots
/// (at least one); a full bounded queue rejects new records instead of
/// blocking the producer.
pub fn log_queue(capacity: Option<usize>) -> (QueueSender, QueueReceiver) {
    let stats = Arc::new(QueueStats::default());
    let (tx, rx) = match capacity {
        Some(n) => {
            let (tx, rx) = mpsc::channel(n.max(1));
            (Tx::Bounded(tx), Rx::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Tx::Unbounded(tx), Rx::Unbounded(rx))
        }
    };
    (
        QueueSender { tx, stats: Arc::clone(&stats) },
        QueueReceiver { rx, stats },
    )
}

impl QueueSender {
    /// Push a record without waiting.
    pub fn try_send(&self, record: LogRecord) -> Result<(), EnqueueError> {
        match self.push(QueueItem::Record(Box::new(record))) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Push the shutdown marker without waiting.
    pub fn send_sentinel(&self) -> Result<(), EnqueueError> {
        self.push(QueueItem::Sentinel)
    }

    pub fn stats(&self) -> &Arc<QueueStats> {
        &self.stats
    }

    pub fn is_closed(&self) -> bool {
        match &self.tx {
            Tx::Bounded(tx) => tx.is_closed(),
            Tx::Unbounded(tx) => tx.is_closed(),
        }
    }

    fn push(&self, item: QueueItem) -> Result<(), EnqueueError> {
        match &self.tx {
            Tx::Bounded(tx) => tx.try_send(item).map_err(|e| match e {
                TrySendError::Full(_) => EnqueueError::Full,
                TrySendError::Closed(_) => EnqueueError::Closed,
            }),
            Tx::Unbounded(tx) => tx.send(item).map_err(|_| EnqueueError::Closed),
        }
    }
}

impl QueueReceiver {
    /// Wait up to `wait` for the next item.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Dequeue {
        let next = match &mut self.rx {
            Rx::Bounded(rx) => timeout(wait, rx.recv()).await,
            Rx::Unbounded(rx) => timeout(wait, rx.recv()).await,
        };
        match next {
            Ok(Some(item)) => Dequeue::Item(item),
            Ok(None) => Dequeue::Closed,
            Err(_elapsed) => Dequeue::Empty,
        }
    }

    /// Take the next item if one is already queued.
    pub fn try_recv(&mut self) -> Dequeue {
        let next = match &mut self.rx {
            Rx::Bounded(rx) => rx.try_recv(),
            Rx::Unbounded(rx) => rx.try_recv(),
        };
        match next {
            Ok(item) => Dequeue::Item(item),
            Err(TryRecvError::Empty) => Dequeue::Empty,
            Err(TryRecvError::Disconnected) => Dequeue::Closed,
        }
    }

    /// Acknowledge that a dequeued record has been fully handled.
    pub fn task_done(&self) {
        self.stats.handled.fetch_add(1, Ordering::Release);
    }

    /// Refuse further sends. Items already queued can still be received.
    pub fn close(&mut self) {
        match &mut self.rx {
            Rx::Bounded(rx) => rx.close(),
            Rx::Unbounded(rx) => rx.close(),
        }
    }

    pub fn stats(&self) -> &Arc<QueueStats> {
        &self.stats
    }
}
