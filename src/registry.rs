use crate::level::Level;
use crate::record::{LogArg, LogRecord, ROOT_LOGGER};
use crate::sink::{dispatch, same_sink, LogSink};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Level the root logger starts with.
pub const DEFAULT_ROOT_LEVEL: Level = Level::Warning;

/// Inspects and optionally enriches a record before it is dispatched.
///
/// Returning `false` drops the record.
pub trait RecordFilter: Send + Sync {
    fn filter(&self, record: &mut LogRecord) -> bool;
}

/// Attaches `user`, `ip` and `host` extra fields to every record.
#[derive(Debug, Clone)]
pub struct ContextFilter {
    pub user: String,
    pub ip: String,
    pub host: String,
}

impl ContextFilter {
    pub fn new(user: impl Into<String>, ip: impl Into<String>, host: impl Into<String>) -> Self {
        ContextFilter { user: user.into(), ip: ip.into(), host: host.into() }
    }
}

impl RecordFilter for ContextFilter {
    fn filter(&self, record: &mut LogRecord) -> bool {
        record.fields.insert("user".into(), self.user.clone().into());
        record.fields.insert("ip".into(), self.ip.clone().into());
        record.fields.insert("host".into(), self.host.clone().into());
        true
    }
}

/// A named node in the logger hierarchy.
///
/// Records handled by a logger go to its own sinks and then, while
/// `propagate` is set, to the sinks of each ancestor up to the root.
pub struct Logger {
    name: String,
    parent: Option<Arc<Logger>>,
    level: RwLock<Option<Level>>,
    sinks: RwLock<Vec<Arc<dyn LogSink>>>,
    filters: RwLock<Vec<Arc<dyn RecordFilter>>>,
    propagate: AtomicBool,
}

impl Logger {
    fn new(name: String, parent: Option<Arc<Logger>>, level: Option<Level>) -> Self {
        Logger {
            name,
            parent,
            level: RwLock::new(level),
            sinks: RwLock::new(Vec::new()),
            filters: RwLock::new(Vec::new()),
            propagate: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<Logger>> {
        self.parent.as_ref()
    }

    /// The level set on this logger itself, if any.
    pub fn level(&self) -> Option<Level> {
        *read(&self.level)
    }

    /// Set (`Some`) or clear (`None`) this logger's own level.
    pub fn set_level(&self, level: Option<Level>) {
        *write(&self.level) = level;
    }

    /// The nearest level set on this logger or one of its ancestors.
    pub fn effective_level(&self) -> Level {
        let mut current = Some(self);
        while let Some(logger) = current {
            if let Some(level) = logger.level() {
                return level;
            }
            current = logger.parent.as_deref();
        }
        DEFAULT_ROOT_LEVEL
    }

    pub fn is_enabled_for(&self, level: Level) -> bool {
        level >= self.effective_level()
    }

    pub fn propagate(&self) -> bool {
        self.propagate.load(Ordering::Relaxed)
    }

    pub fn set_propagate(&self, propagate: bool) {
        self.propagate.store(propagate, Ordering::Relaxed);
    }

    /// Attach a sink. Attaching the same sink twice has no effect.
    ///
    /// Returns `true` if the sink was not attached before.
    pub fn add_sink(&self, sink: Arc<dyn LogSink>) -> bool {
        let mut sinks = write(&self.sinks);
        if sinks.iter().any(|s| same_sink(s, &sink)) {
            return false;
        }
        sinks.push(sink);
        true
    }

    /// Close `sink` and detach it. Returns `false` if it was not attached.
    pub async fn remove_sink(&self, sink: &Arc<dyn LogSink>) -> bool {
        let attached = read(&self.sinks).iter().any(|s| same_sink(s, sink));
        if !attached {
            return false;
        }
        if let Err(e) = sink.close().await {
            tracing::warn!(logger = %self.name, error = %e, "failed to close removed log sink");
        }
        self.unlink_sink(sink)
    }

    fn unlink_sink(&self, sink: &Arc<dyn LogSink>) -> bool {
        let mut sinks = write(&self.sinks);
        let before = sinks.len();
        sinks.retain(|s| !same_sink(s, sink));
        sinks.len() != before
    }

    pub fn sinks(&self) -> Vec<Arc<dyn LogSink>> {
        read(&self.sinks).clone()
    }

    pub fn add_filter(&self, filter: Arc<dyn RecordFilter>) {
        write(&self.filters).push(filter);
    }

    /// Create a record for this logger and handle it, if `level` is enabled.
    pub async fn log<I, A>(&self, level: Level, message: impl Into<String>, args: I)
    where
        I: IntoIterator<Item = A>,
        A: Into<LogArg>,
    {
        if !self.is_enabled_for(level) {
            return;
        }
        let record = LogRecord::new(level, self.name.clone(), message).with_args(args);
        self.handle(record).await;
    }

    pub async fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message, None::<LogArg>).await;
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message, None::<LogArg>).await;
    }

    pub async fn warning(&self, message: impl Into<String>) {
        self.log(Level::Warning, message, None::<LogArg>).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message, None::<LogArg>).await;
    }

    pub async fn critical(&self, message: impl Into<String>) {
        self.log(Level::Critical, message, None::<LogArg>).await;
    }

    /// Run this logger's filters, then dispatch to the sinks of this logger
    /// and, while propagation holds, of its ancestors.
    ///
    /// The logger level is not consulted here; only sink thresholds apply.
    /// Returns the number of successful sink deliveries.
    pub async fn handle(&self, mut record: LogRecord) -> usize {
        let filters = read(&self.filters).clone();
        if !filters.iter().all(|f| f.filter(&mut record)) {
            return 0;
        }

        let mut delivered = 0;
        let mut current = Some(self);
        while let Some(logger) = current {
            let sinks = logger.sinks();
            delivered += dispatch(&sinks, &record).await;
            if !logger.propagate() {
                break;
            }
            current = logger.parent.as_deref();
        }
        delivered
    }

    /// Temporarily override the level and/or attach an extra sink.
    ///
    /// Dropping the returned guard restores the previous level and detaches
    /// the sink, unless the sink was already attached before the guard was
    /// taken. With `close` set a sink the guard attached is also closed: on
    /// the current tokio runtime if there is one, otherwise synchronously on
    /// a short-lived runtime.
    pub fn scoped(
        self: &Arc<Self>,
        level: Option<Level>,
        sink: Option<Arc<dyn LogSink>>,
        close: bool,
    ) -> LoggingContext {
        let previous_level = level.map(|level| {
            let previous = self.level();
            self.set_level(Some(level));
            previous
        });
        // A sink that was already attached stays attached after the scope.
        let sink = sink.filter(|sink| self.add_sink(Arc::clone(sink)));
        LoggingContext { logger: Arc::clone(self), previous_level, sink, close }
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("level", &self.level())
            .field("sinks", &read(&self.sinks).len())
            .field("propagate", &self.propagate())
            .finish()
    }
}

/// Guard returned by [`Logger::scoped`].
#[must_use = "the override is reverted as soon as the guard is dropped"]
pub struct LoggingContext {
    logger: Arc<Logger>,
    previous_level: Option<Option<Level>>,
    /// Only set when this guard attached the sink itself.
    sink: Option<Arc<dyn LogSink>>,
    close: bool,
}

impl Drop for LoggingContext {
    fn drop(&mut self) {
        if let Some(previous) = self.previous_level.take() {
            self.logger.set_level(previous);
        }
        let Some(sink) = self.sink.take() else {
            return;
        };
        self.logger.unlink_sink(&sink);
        if !self.close {
            return;
        }
        let close = async move {
            if let Err(e) = sink.close().await {
                tracing::warn!(error = %e, "failed to close scoped log sink");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(close);
            }
            Err(_) => match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime.block_on(close),
                Err(e) => tracing::warn!(error = %e, "no runtime to close scoped log sink"),
            },
        }
    }
}

/// Process-wide table of named loggers.
///
/// Build one at startup, share it by `Arc`, and call
/// [`shutdown`](Self::shutdown) when the application exits.
pub struct LoggerRegistry {
    root: Arc<Logger>,
    loggers: RwLock<HashMap<String, Arc<Logger>>>,
}

impl Default for LoggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggerRegistry {
    pub fn new() -> Self {
        Self::with_root_level(DEFAULT_ROOT_LEVEL)
    }

    pub fn with_root_level(level: Level) -> Self {
        LoggerRegistry {
            root: Arc::new(Logger::new(ROOT_LOGGER.to_string(), None, Some(level))),
            loggers: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> Arc<Logger> {
        Arc::clone(&self.root)
    }

    /// Fetch the logger called `name`, creating it and any missing
    /// ancestors (`a`, `a.b` for `a.b.c`). An empty name or `"root"` yields
    /// the root logger.
    pub fn get(&self, name: &str) -> Arc<Logger> {
        if name.is_empty() || name == ROOT_LOGGER {
            return self.root();
        }
        if let Some(logger) = read(&self.loggers).get(name) {
            return Arc::clone(logger);
        }

        let mut loggers = write(&self.loggers);
        let mut parent = Arc::clone(&self.root);
        let mut end = 0;
        for part in name.split('.') {
            end += part.len();
            let prefix = &name[..end];
            let logger = loggers
                .entry(prefix.to_string())
                .or_insert_with(|| Arc::new(Logger::new(prefix.to_string(), Some(Arc::clone(&parent)), None)));
            parent = Arc::clone(logger);
            end += 1;
        }
        parent
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.loggers).keys().cloned().collect();
        names.sort();
        names
    }

    /// Route a record to the logger it names, or to `override_name`.
    pub async fn dispatch(&self, record: LogRecord, override_name: Option<&str>) -> usize {
        let name = override_name.unwrap_or(record.logger_name.as_str()).to_string();
        self.get(&name).handle(record).await
    }

    /// Detach and close every sink attached anywhere in the registry.
    /// A sink shared by several loggers is closed once.
    pub async fn shutdown(&self) {
        let mut loggers: Vec<Arc<Logger>> = read(&self.loggers).values().cloned().collect();
        loggers.push(self.root());

        let mut unique: Vec<Arc<dyn LogSink>> = Vec::new();
        for logger in &loggers {
            let detached = std::mem::take(&mut *write(&logger.sinks));
            for sink in detached {
                if !unique.iter().any(|s| same_sink(s, &sink)) {
                    unique.push(sink);
                }
            }
        }
        for sink in unique {
            if let Err(e) = sink.close().await {
                tracing::warn!(error = %e, "failed to close log sink during shutdown");
            }
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
