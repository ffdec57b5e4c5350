use crate::env::{env_parse, LOG_LEVEL_ENV, LOG_QUEUE_CAPACITY_ENV, LOG_QUEUE_POLL_MS_ENV};
use crate::handler::QueueHandler;
use crate::layer::QueueLayer;
use crate::level::Level;
use crate::listener::{ListenerError, QueueListener, DEFAULT_POLL_INTERVAL};
use crate::queue::log_queue;
use crate::sink::LogSink;
use std::sync::Arc;
use tokio::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the queue pipeline.
///
/// **Fields**
/// - `queue_capacity`: `None` for an unbounded queue, `Some(n)` to drop
///   records once `n` are waiting.
/// - `poll_interval`: longest single dequeue wait of the listener; bounds
///   how long a stop request can go unnoticed.
/// - `min_level`: events below this level are not enqueued at all.
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is
///   stacked on top of [`QueueLayer`] so events are also printed.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub queue_capacity: Option<usize>,
    pub poll_interval: Duration,
    pub min_level: Level,
    pub enable_stdout: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            min_level: Level::Debug,
            enable_stdout: true,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `LOG_QUEUE_CAPACITY`, `LOG_QUEUE_POLL_MS` and
    /// `LOGLEVEL` where those are set and valid.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_capacity: env_parse::<usize>(LOG_QUEUE_CAPACITY_ENV).filter(|n| *n > 0),
            poll_interval: env_parse::<u64>(LOG_QUEUE_POLL_MS_ENV)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            min_level: env_parse::<Level>(LOG_LEVEL_ENV).unwrap_or(defaults.min_level),
            ..defaults
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to install global tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// A producer handle plus the listener draining its queue.
pub struct Pipeline {
    handler: QueueHandler,
    listener: Arc<QueueListener>,
}

impl Pipeline {
    /// Build a queue and a listener over `sinks`, without starting it.
    pub fn new(sinks: Vec<Arc<dyn LogSink>>, config: &PipelineConfig) -> Self {
        let (tx, rx) = log_queue(config.queue_capacity);
        let handler = QueueHandler::new(tx.clone());
        let listener = QueueListener::new(tx, rx, sinks).with_poll_interval(config.poll_interval);
        Pipeline { handler, listener: Arc::new(listener) }
    }

    pub fn handler(&self) -> &QueueHandler {
        &self.handler
    }

    pub fn listener(&self) -> &Arc<QueueListener> {
        &self.listener
    }

    pub fn start(&self) -> Result<(), ListenerError> {
        self.listener.start()
    }

    /// Stop the listener (draining what is queued), then close its sinks.
    pub async fn shutdown(&self) {
        let listener = Arc::clone(&self.listener);
        // Joining the worker blocks; keep it off the async executor.
        if let Err(e) = tokio::task::spawn_blocking(move || listener.stop()).await {
            tracing::error!(error = %e, "queue listener shutdown task failed");
        }
        if let Err(e) = self.listener.close_sinks().await {
            tracing::warn!(error = %e, "could not close pipeline sinks");
        }
    }
}

/// Build and start a pipeline over `sinks` and install it as the global
/// `tracing` subscriber.
///
/// **Effects**
///
/// This installs a [`Registry`] combined with [`QueueLayer`] (and, with
/// `enable_stdout`, a `fmt` layer) as the global default subscriber, so all
/// `tracing` events in the process flow into the queue. Keep the returned
/// [`Pipeline`] and call [`Pipeline::shutdown`] before exiting.
pub fn init_pipeline(sinks: Vec<Arc<dyn LogSink>>, config: PipelineConfig) -> Result<Pipeline, InitError> {
    let pipeline = Pipeline::new(sinks, &config);
    pipeline.start()?;

    let layer = QueueLayer::new(pipeline.handler().clone(), config.min_level);

    let installed = if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)
    };

    if let Err(e) = installed {
        pipeline.listener().stop();
        return Err(e.into());
    }
    Ok(pipeline)
}

/// Initialize the pipeline with [`PipelineConfig::from_env`].
pub fn init_pipeline_from_env(sinks: Vec<Arc<dyn LogSink>>) -> Result<Pipeline, InitError> {
    init_pipeline(sinks, PipelineConfig::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noop_sink::NoopSink;
    use crate::record::LogRecord;

    #[test]
    fn default_config_is_unbounded() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue_capacity, None);
        assert_eq!(config.min_level, Level::Debug);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_drains_and_stops() {
        let config = PipelineConfig { poll_interval: Duration::from_millis(10), ..Default::default() };
        let pipeline = Pipeline::new(vec![Arc::new(NoopSink)], &config);
        pipeline.start().unwrap();

        for i in 0..50 {
            pipeline.handler().write(LogRecord::new(Level::Info, "x", i.to_string()));
        }
        pipeline.shutdown().await;

        assert_eq!(pipeline.handler().stats().handled(), 50);
        assert_eq!(pipeline.listener().state(), crate::listener::ListenerState::Stopped);
    }
}
