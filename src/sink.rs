use crate::level::Level;
use crate::record::LogRecord;
use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;

/// Error type returned by sink operations.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Asynchronous destination for [`LogRecord`]s.
///
/// Implementations transport records to a concrete backend (console, file,
/// socket, ClickHouse, ...). The listener calls `send` from its own worker
/// and never on an application thread.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Minimal level this sink accepts. Defaults to [`Level::Debug`].
    fn threshold(&self) -> Level {
        Level::Debug
    }

    /// Whether a record of `level` should reach [`send`](LogSink::send).
    fn accepts(&self, level: Level) -> bool {
        level >= self.threshold()
    }

    /// Send a single log record to the underlying backend.
    ///
    /// **Returns**
    /// - `Ok(())` if the record was accepted by the backend.
    /// - `Err(..)` if the backend failed. The caller reports the failure
    ///   and carries on with the next sink; there is no retry.
    async fn send(&self, record: &LogRecord) -> Result<(), BoxError>;

    /// Flush any buffered records, if the backend implements buffering.
    ///
    /// Default implementation is a no-op.
    async fn flush(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Release the resources held by this sink (file handles, sockets).
    ///
    /// Default implementation flushes.
    async fn close(&self) -> Result<(), BoxError> {
        self.flush().await
    }
}

/// Identity comparison for shared sinks, ignoring vtable pointers.
pub fn same_sink(a: &Arc<dyn LogSink>, b: &Arc<dyn LogSink>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Offer `record` to every sink in order, skipping those whose threshold
/// rejects it. A failing sink is reported and does not stop the fan-out.
///
/// Returns the number of sinks that accepted the record without error.
pub async fn dispatch(sinks: &[Arc<dyn LogSink>], record: &LogRecord) -> usize {
    let mut delivered = 0;
    for sink in sinks {
        if !sink.accepts(record.level) {
            continue;
        }
        match sink.send(record).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                tracing::warn!(
                    logger = %record.logger_name,
                    level = %record.level,
                    error = %e,
                    "log sink write failed"
                );
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collect {
        threshold: Level,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LogSink for Collect {
        fn threshold(&self) -> Level {
            self.threshold
        }

        async fn send(&self, record: &LogRecord) -> Result<(), BoxError> {
            self.seen.lock().unwrap().push(record.get_message().into_owned());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl LogSink for Broken {
        async fn send(&self, _record: &LogRecord) -> Result<(), BoxError> {
            Err("sink is broken".into())
        }
    }

    fn collect(threshold: Level) -> Arc<Collect> {
        Arc::new(Collect { threshold, seen: Mutex::new(Vec::new()) })
    }

    #[test]
    fn accepts_follows_threshold() {
        let sink = collect(Level::Warning);
        for level in Level::ALL {
            assert_eq!(sink.accepts(level), level >= Level::Warning);
        }
    }

    #[tokio::test]
    async fn dispatch_skips_below_threshold() {
        let sink = collect(Level::Error);
        let sinks: Vec<Arc<dyn LogSink>> = vec![sink.clone()];
        let delivered = dispatch(&sinks, &LogRecord::new(Level::Debug, "x", "quiet")).await;
        assert_eq!(delivered, 0);
        assert!(sink.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_later_sinks() {
        let after = collect(Level::Debug);
        let sinks: Vec<Arc<dyn LogSink>> = vec![Arc::new(Broken), after.clone()];
        let delivered = dispatch(&sinks, &LogRecord::new(Level::Info, "x", "still here")).await;
        assert_eq!(delivered, 1);
        assert_eq!(*after.seen.lock().unwrap(), vec!["still here".to_string()]);
    }

    #[test]
    fn same_sink_compares_identity() {
        let a: Arc<dyn LogSink> = collect(Level::Debug);
        let b: Arc<dyn LogSink> = collect(Level::Debug);
        assert!(same_sink(&a, &a.clone()));
        assert!(!same_sink(&a, &b));
    }
}
