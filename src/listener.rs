use crate::queue::{Dequeue, QueueItem, QueueReceiver, QueueSender};
use crate::record::LogRecord;
use crate::sink::{dispatch, same_sink, LogSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;
use tokio::time::Duration;

/// Default bounded wait of one dequeue in the monitor loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const WORKER_THREAD_NAME: &str = "queue-monitor";

/// Lifecycle of a [`QueueListener`].
///
/// `Created -> Started -> Draining -> Stopped`. A stopped listener cannot be
/// started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Started,
    Draining,
    Stopped,
}

#[derive(thiserror::Error, Debug)]
pub enum ListenerError {
    #[error("queue listener is already started")]
    AlreadyStarted,

    #[error("queue listener was stopped and cannot be restarted")]
    AlreadyStopped,

    #[error("queue listener is still running")]
    StillRunning,

    #[error("failed to build listener runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("failed to spawn listener thread: {0}")]
    Spawn(#[source] std::io::Error),
}

type SinkList = Arc<RwLock<Vec<Arc<dyn LogSink>>>>;

struct Lifecycle {
    state: ListenerState,
    worker: Option<JoinHandle<()>>,
}

/// Consumer side of the log queue.
///
/// Owns the queue receiver and an ordered list of sinks. [`start`] moves
/// the receiver onto a dedicated OS thread running its own single-threaded
/// tokio runtime, so a slow or stuck sink can never stall producers or the
/// application's runtime. Each record is offered to every sink whose
/// threshold accepts it, in registration order; a failing sink is reported
/// and skipped.
///
/// [`start`]: QueueListener::start
pub struct QueueListener {
    sender: QueueSender,
    receiver: Mutex<Option<QueueReceiver>>,
    sinks: SinkList,
    stop_flag: Arc<AtomicBool>,
    poll_interval: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl QueueListener {
    /// Build a listener over both ends of a queue.
    ///
    /// The sender is only used to deliver the shutdown sentinel.
    pub fn new(sender: QueueSender, receiver: QueueReceiver, sinks: Vec<Arc<dyn LogSink>>) -> Self {
        QueueListener {
            sender,
            receiver: Mutex::new(Some(receiver)),
            sinks: Arc::new(RwLock::new(sinks)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            lifecycle: Mutex::new(Lifecycle { state: ListenerState::Created, worker: None }),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn state(&self) -> ListenerState {
        lock(&self.lifecycle).state
    }

    /// `true` once the worker thread has exited (or was never started).
    pub fn is_worker_finished(&self) -> bool {
        lock(&self.lifecycle)
            .worker
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Spawn the worker thread.
    ///
    /// Starting twice, or after [`stop`](Self::stop), is a caller error.
    pub fn start(&self) -> Result<(), ListenerError> {
        let mut lifecycle = lock(&self.lifecycle);
        match lifecycle.state {
            ListenerState::Created => {}
            ListenerState::Started | ListenerState::Draining => return Err(ListenerError::AlreadyStarted),
            ListenerState::Stopped => return Err(ListenerError::AlreadyStopped),
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ListenerError::Runtime)?;

        let receiver = lock(&self.receiver).take().ok_or(ListenerError::AlreadyStarted)?;
        let worker = Worker {
            receiver,
            sinks: Arc::clone(&self.sinks),
            stop_flag: Arc::clone(&self.stop_flag),
            poll_interval: self.poll_interval,
        };

        let spawned = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(worker.monitor()));

        match spawned {
            Ok(handle) => {
                lifecycle.worker = Some(handle);
                lifecycle.state = ListenerState::Started;
                tracing::debug!(poll_interval = ?self.poll_interval, "queue listener started");
                Ok(())
            }
            Err(e) => {
                // The receiver went down with the closure.
                lifecycle.state = ListenerState::Stopped;
                Err(ListenerError::Spawn(e))
            }
        }
    }

    /// Ask the worker to finish and wait for it.
    ///
    /// Sets the stop flag, enqueues exactly one sentinel and joins the
    /// worker, which first drains every record queued ahead of the sentinel.
    /// Blocks the calling thread until the drain completes. Calling it again,
    /// from any thread, is a no-op.
    pub fn stop(&self) {
        let worker = {
            let mut lifecycle = lock(&self.lifecycle);
            match lifecycle.state {
                ListenerState::Created => {
                    lifecycle.state = ListenerState::Stopped;
                    return;
                }
                ListenerState::Draining | ListenerState::Stopped => return,
                ListenerState::Started => {}
            }
            lifecycle.state = ListenerState::Draining;
            lifecycle.worker.take()
        };

        self.stop_flag.store(true, Ordering::Release);
        if let Err(e) = self.sender.send_sentinel() {
            // The worker still observes the stop flag within one poll interval.
            tracing::debug!(error = %e, "could not enqueue listener sentinel");
        }

        if let Some(handle) = worker {
            if handle.join().is_err() {
                tracing::error!("queue listener worker panicked");
            }
        }

        lock(&self.lifecycle).state = ListenerState::Stopped;
        tracing::debug!("queue listener stopped");
    }

    /// Register a sink. Adding the same sink twice has no effect.
    pub fn add_sink(&self, sink: Arc<dyn LogSink>) {
        let mut sinks = write(&self.sinks);
        if !sinks.iter().any(|s| same_sink(s, &sink)) {
            sinks.push(sink);
        }
    }

    /// Close `sink` and unregister it. Returns `false` if it was not registered.
    pub async fn remove_sink(&self, sink: &Arc<dyn LogSink>) -> bool {
        let registered = read(&self.sinks).iter().any(|s| same_sink(s, sink));
        if !registered {
            return false;
        }
        if let Err(e) = sink.close().await {
            tracing::warn!(error = %e, "failed to close removed log sink");
        }
        write(&self.sinks).retain(|s| !same_sink(s, sink));
        true
    }

    pub fn sinks(&self) -> Vec<Arc<dyn LogSink>> {
        read(&self.sinks).clone()
    }

    /// Close every registered sink. Only allowed once the worker is gone,
    /// so nothing can write to a closed resource.
    pub async fn close_sinks(&self) -> Result<(), ListenerError> {
        match self.state() {
            ListenerState::Started | ListenerState::Draining => return Err(ListenerError::StillRunning),
            ListenerState::Created | ListenerState::Stopped => {}
        }
        for sink in self.sinks() {
            if let Err(e) = sink.close().await {
                tracing::warn!(error = %e, "failed to close log sink");
            }
        }
        Ok(())
    }
}

impl Drop for QueueListener {
    fn drop(&mut self) {
        // Let a still-running worker finish on its own; never block in drop.
        if lock(&self.lifecycle).state == ListenerState::Started {
            self.stop_flag.store(true, Ordering::Release);
            let _ = self.sender.send_sentinel();
        }
    }
}

struct Worker {
    receiver: QueueReceiver,
    sinks: SinkList,
    stop_flag: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl Worker {
    async fn monitor(mut self) {
        while !self.stop_flag.load(Ordering::Acquire) {
            match self.receiver.recv_timeout(self.poll_interval).await {
                Dequeue::Item(QueueItem::Record(record)) => self.handle(&record).await,
                Dequeue::Item(QueueItem::Sentinel) | Dequeue::Closed => break,
                Dequeue::Empty => continue,
            }
        }

        // Whatever is still queued ahead of a sentinel gets delivered.
        let mut drained = 0usize;
        while let Dequeue::Item(QueueItem::Record(record)) = self.receiver.try_recv() {
            self.handle(&record).await;
            drained += 1;
        }
        tracing::debug!(drained, "queue listener drained");
    }

    async fn handle(&self, record: &LogRecord) {
        let sinks = read(&self.sinks).clone();
        dispatch(&sinks, record).await;
        self.receiver.task_done();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use crate::queue::log_queue;
    use crate::sink::BoxError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct MemorySink {
        threshold: Level,
        seen: Mutex<Vec<(Level, String)>>,
        closed: AtomicBool,
    }

    impl MemorySink {
        fn new(threshold: Level) -> Arc<Self> {
            Arc::new(MemorySink { threshold, seen: Mutex::new(Vec::new()), closed: AtomicBool::new(false) })
        }

        fn messages(&self) -> Vec<String> {
            self.seen.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
        }
    }

    #[async_trait]
    impl LogSink for MemorySink {
        fn threshold(&self) -> Level {
            self.threshold
        }

        async fn send(&self, record: &LogRecord) -> Result<(), BoxError> {
            self.seen.lock().unwrap().push((record.level, record.get_message().into_owned()));
            Ok(())
        }

        async fn close(&self) -> Result<(), BoxError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl LogSink for FailingSink {
        async fn send(&self, _record: &LogRecord) -> Result<(), BoxError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err("disk on fire".into())
        }
    }

    fn listener_with(sinks: Vec<Arc<dyn LogSink>>) -> (crate::handler::QueueHandler, QueueListener) {
        let (tx, rx) = log_queue(None);
        let handler = crate::handler::QueueHandler::new(tx.clone());
        let listener = QueueListener::new(tx, rx, sinks).with_poll_interval(Duration::from_millis(20));
        (handler, listener)
    }

    #[test]
    fn critical_reaches_console_and_file_thresholds() {
        let console = MemorySink::new(Level::Warning);
        let file = MemorySink::new(Level::Debug);
        let (handler, listener) = listener_with(vec![console.clone(), file.clone()]);

        listener.start().unwrap();
        handler.write(LogRecord::new(Level::Critical, "rotateLog", "Look Out!!!!"));
        listener.stop();

        assert_eq!(console.messages(), vec!["Look Out!!!!"]);
        assert_eq!(file.messages(), vec!["Look Out!!!!"]);
    }

    #[test]
    fn debug_never_reaches_error_sink() {
        let sink = MemorySink::new(Level::Error);
        let (handler, listener) = listener_with(vec![sink.clone()]);

        listener.start().unwrap();
        handler.write(LogRecord::new(Level::Debug, "mainLog", "some debug message"));
        listener.stop();

        assert!(sink.messages().is_empty());
        assert_eq!(handler.stats().handled(), 1);
    }

    #[test]
    fn threshold_filter_holds_for_every_level_pair() {
        for threshold in Level::ALL {
            let sink = MemorySink::new(threshold);
            let (handler, listener) = listener_with(vec![sink.clone()]);
            listener.start().unwrap();
            for level in Level::ALL {
                handler.write(LogRecord::new(level, "x", level.as_str()));
            }
            listener.stop();

            let expected: Vec<String> = Level::ALL
                .iter()
                .filter(|l| **l >= threshold)
                .map(|l| l.as_str().to_string())
                .collect();
            assert_eq!(sink.messages(), expected, "threshold {threshold}");
        }
    }

    #[test]
    fn stop_drains_records_queued_before_it() {
        let sink = MemorySink::new(Level::Debug);
        let (handler, listener) = listener_with(vec![sink.clone()]);

        for i in 0..5 {
            handler.write(LogRecord::new(Level::Info, "x", format!("record {i}")));
        }
        listener.start().unwrap();
        listener.stop();

        assert_eq!(
            sink.messages(),
            (0..5).map(|i| format!("record {i}")).collect::<Vec<_>>()
        );
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert!(listener.is_worker_finished());
    }

    #[test]
    fn preserves_producer_order() {
        let sink = MemorySink::new(Level::Debug);
        let (handler, listener) = listener_with(vec![sink.clone()]);

        listener.start().unwrap();
        for i in 0..200 {
            handler.write(LogRecord::new(Level::Info, "x", i.to_string()));
        }
        listener.stop();

        assert_eq!(sink.messages(), (0..200).map(|i| i.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn sentinel_alone_ends_worker_without_handling() {
        let sink = MemorySink::new(Level::Debug);
        let (handler, listener) = listener_with(vec![sink.clone()]);

        listener.sender.send_sentinel().unwrap();
        listener.start().unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !listener.is_worker_finished() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        assert!(listener.is_worker_finished());
        assert!(sink.messages().is_empty());
        assert_eq!(handler.stats().handled(), 0);
        listener.stop();
    }

    #[test]
    fn stop_is_idempotent_and_start_after_stop_fails() {
        let (_handler, listener) = listener_with(vec![]);
        listener.start().unwrap();
        assert!(matches!(listener.start(), Err(ListenerError::AlreadyStarted)));

        listener.stop();
        listener.stop();
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert!(matches!(listener.start(), Err(ListenerError::AlreadyStopped)));
    }

    #[test]
    fn stop_from_another_thread() {
        let sink = MemorySink::new(Level::Debug);
        let (handler, listener) = listener_with(vec![sink.clone()]);
        let listener = Arc::new(listener);
        listener.start().unwrap();
        handler.write(LogRecord::new(Level::Info, "x", "cross-thread"));

        let remote = Arc::clone(&listener);
        std::thread::spawn(move || remote.stop()).join().unwrap();

        assert_eq!(listener.state(), ListenerState::Stopped);
        assert_eq!(sink.messages(), vec!["cross-thread"]);
    }

    #[test]
    fn failing_sink_is_isolated() {
        let failing = Arc::new(FailingSink { attempts: AtomicUsize::new(0) });
        let healthy = MemorySink::new(Level::Debug);
        let (handler, listener) = listener_with(vec![failing.clone(), healthy.clone()]);

        listener.start().unwrap();
        handler.write(LogRecord::new(Level::Error, "x", "one"));
        handler.write(LogRecord::new(Level::Error, "x", "two"));
        listener.stop();

        assert_eq!(failing.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(healthy.messages(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn add_is_idempotent_and_remove_closes() {
        let sink = MemorySink::new(Level::Debug);
        let as_dyn: Arc<dyn LogSink> = sink.clone();
        let (_handler, listener) = listener_with(vec![]);

        listener.add_sink(Arc::clone(&as_dyn));
        listener.add_sink(Arc::clone(&as_dyn));
        assert_eq!(listener.sinks().len(), 1);

        assert!(listener.remove_sink(&as_dyn).await);
        assert!(sink.closed.load(Ordering::SeqCst));
        assert!(listener.sinks().is_empty());
        assert!(!listener.remove_sink(&as_dyn).await);
    }

    #[tokio::test]
    async fn close_sinks_requires_stopped_worker() {
        let sink = MemorySink::new(Level::Debug);
        let (_handler, listener) = listener_with(vec![sink.clone()]);

        listener.start().unwrap();
        assert!(matches!(listener.close_sinks().await, Err(ListenerError::StillRunning)));
        listener.stop();
        listener.close_sinks().await.unwrap();
        assert!(sink.closed.load(Ordering::SeqCst));
    }
}
