use crate::level::Level;
use crate::queue::{EnqueueError, QueueSender, QueueStats};
use crate::record::LogRecord;
use crate::sink::{BoxError, LogSink};
use async_trait::async_trait;
use std::sync::Arc;

/// Producer-side adapter that turns a log call into a non-blocking enqueue.
///
/// `write` renders the record, strips everything that is not plain data and
/// pushes it onto the shared queue. It never waits on a sink. When the queue
/// is bounded and full, or already closed, the record is dropped, counted
/// in [`QueueStats::dropped`] and reported through `tracing`.
///
/// The handler also implements [`LogSink`] so it can be attached to a
/// [`Logger`](crate::registry::Logger) like any other destination.
#[derive(Clone)]
pub struct QueueHandler {
    sender: QueueSender,
    threshold: Level,
}

impl QueueHandler {
    pub fn new(sender: QueueSender) -> Self {
        Self::with_threshold(sender, Level::Debug)
    }

    pub fn with_threshold(sender: QueueSender, threshold: Level) -> Self {
        QueueHandler { sender, threshold }
    }

    /// Render `record` in place so that it only contains transportable data.
    pub fn prepare(&self, record: &mut LogRecord) {
        record.prepare();
    }

    /// Prepare and enqueue a record.
    ///
    /// Safe to call from any number of threads at once. Failures never
    /// reach the caller; use [`try_write`](Self::try_write) to observe them.
    pub fn write(&self, record: LogRecord) {
        if let Err(e) = self.try_write(record) {
            tracing::warn!(
                error = %e,
                dropped = self.sender.stats().dropped(),
                "dropping log record"
            );
        }
    }

    /// Like [`write`](Self::write) but hands the enqueue failure back.
    pub fn try_write(&self, mut record: LogRecord) -> Result<(), EnqueueError> {
        self.prepare(&mut record);
        self.sender.try_send(record)
    }

    pub fn stats(&self) -> &Arc<QueueStats> {
        self.sender.stats()
    }
}

#[async_trait]
impl LogSink for QueueHandler {
    fn threshold(&self) -> Level {
        self.threshold
    }

    async fn send(&self, record: &LogRecord) -> Result<(), BoxError> {
        self.try_write(record.clone())?;
        Ok(())
    }
}
