//! Queue-mediated log pipeline.
//!
//! Producers write [`record::LogRecord`]s into a queue through a
//! [`handler::QueueHandler`] without ever blocking on I/O. A
//! [`listener::QueueListener`] drains that queue on its own thread and
//! dispatches each record to a set of [`sink::LogSink`]s. Records can also
//! arrive over TCP as length-prefixed frames, handled by
//! [`receiver::StreamReceiver`] behind a [`server::ReceiverServer`].

pub mod level;
pub mod record;
pub mod format;
pub mod sink;
pub mod layer;

pub mod noop_sink;
pub mod console_sink;
pub mod file_sink;
pub mod socket_sink;

#[cfg(feature = "clickhouse")]
pub mod clickhouse;

pub mod queue;
pub mod handler;
pub mod listener;
pub mod registry;

pub mod frame;
pub mod receiver;
pub mod server;

pub mod backend;
pub mod env;
pub mod init;

pub use handler::QueueHandler;
pub use level::Level;
pub use listener::QueueListener;
pub use record::LogRecord;
pub use sink::LogSink;
