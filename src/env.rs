//! Environment variable names used by this crate for convenient
//! configuration of the pipeline and the receiver.
//!
//! These are purely helpers; the core queue, listener and receiver types
//! remain decoupled from environment access.

/// Default minimal level for the queue layer and built-in sinks.
pub const LOG_LEVEL_ENV: &str = "LOGLEVEL";

/// Path of the default file sink.
pub const LOG_FILE_ENV: &str = "LOGFILE";

/// Queue capacity; unset, empty or `0` means unbounded.
pub const LOG_QUEUE_CAPACITY_ENV: &str = "LOG_QUEUE_CAPACITY";

/// Listener dequeue wait in milliseconds.
pub const LOG_QUEUE_POLL_MS_ENV: &str = "LOG_QUEUE_POLL_MS";

/// Host the record receiver binds to.
pub const LOG_RECEIVER_HOST_ENV: &str = "LOG_RECEIVER_HOST";

/// Port the record receiver binds to.
pub const LOG_RECEIVER_PORT_ENV: &str = "LOG_RECEIVER_PORT";

/// Default file name used when `LOGFILE` is not set.
pub const DEFAULT_LOG_FILE: &str = "watchedLog.log";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an environment variable, `None` when unset or invalid.
pub fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
