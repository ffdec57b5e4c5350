use crate::record::LogRecord;
use crate::sink::{BoxError, LogSink};
use async_trait::async_trait;

/// A sink that simply drops all records.
///
/// Useful for measuring the overhead of the queue and listener without any
/// external I/O, and for tests that don't care about persistence.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn send(&self, _record: &LogRecord) -> Result<(), BoxError> {
        Ok(())
    }
}
