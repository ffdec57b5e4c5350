use std::sync::Arc;

use crate::console_sink::{ConsoleSink, ConsoleTarget};
use crate::env::{env_or, DEFAULT_LOG_FILE, LOG_FILE_ENV};
use crate::file_sink::{FileSink, Rotation};
use crate::format::Format;
use crate::level::Level;
use crate::noop_sink::NoopSink;
use crate::sink::LogSink;
use crate::socket_sink::SocketSink;

/// Supported sink kinds that can be selected via DSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Noop,
    Console,
    File,
    Tcp,
    Clickhouse,
}

/// Sink selection parsed from a DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Selected sink implementation.
    pub kind: BackendKind,
    /// Everything after `scheme://`, percent-decoded, without the query.
    pub target: String,
    /// `key=value` pairs from the query string, in order.
    pub options: Vec<(String, String)>,
    /// Raw DSN that was used to construct this config.
    pub dsn: String,
}

impl BackendConfig {
    fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn option_u64(&self, key: &str) -> Result<Option<u64>, DsnError> {
        self.option(key)
            .map(|v| {
                v.parse().map_err(|_| DsnError::InvalidOption {
                    key: key.to_string(),
                    value: v.to_string(),
                })
            })
            .transpose()
    }
}

/// Parse a DSN string and infer the sink kind from its scheme.
///
/// Examples:
/// - "noop://"
/// - "console://stdout", "console://stderr"
/// - "file:///var/log/mylo/main.log"
/// - "file://rotate.log?max_bytes=500&backups=5"
/// - "file://watchedLog.log?watch=true"
/// - "tcp://localhost:9020"
/// - "clickhouse://127.0.0.1:8123/default/logs"
pub fn parse_dsn(dsn: &str) -> Result<BackendConfig, DsnError> {
    let (scheme, rest) = dsn.split_once("://").ok_or(DsnError::MissingScheme)?;

    let kind = match scheme.to_ascii_lowercase().as_str() {
        "noop" => BackendKind::Noop,
        "console" => BackendKind::Console,
        "file" => BackendKind::File,
        "tcp" => BackendKind::Tcp,
        "clickhouse" => BackendKind::Clickhouse,
        other => return Err(DsnError::UnknownScheme(other.to_string())),
    };

    let (target, query) = match rest.split_once('?') {
        Some((target, query)) => (target, query),
        None => (rest, ""),
    };
    let target = urlencoding::decode(target)
        .map_err(|_| DsnError::InvalidEncoding)?
        .into_owned();

    let mut options = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(value).map_err(|_| DsnError::InvalidEncoding)?;
        options.push((key.to_string(), value.into_owned()));
    }

    if matches!(kind, BackendKind::File | BackendKind::Tcp | BackendKind::Clickhouse) && target.is_empty() {
        return Err(DsnError::MissingTarget(kind));
    }

    Ok(BackendConfig { kind, target, options, dsn: dsn.to_string() })
}

/// Error type returned when parsing a DSN.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DsnError {
    #[error("DSN has no scheme")]
    MissingScheme,

    #[error("unknown or unsupported DSN scheme: {0}")]
    UnknownScheme(String),

    #[error("DSN for {0:?} needs a target")]
    MissingTarget(BackendKind),

    #[error("DSN contains invalid percent-encoding")]
    InvalidEncoding,

    #[error("invalid value {value:?} for DSN option {key}")]
    InvalidOption { key: String, value: String },
}

/// Error type returned when building a sink from configuration.
#[derive(thiserror::Error, Debug)]
pub enum BackendBuildError {
    #[error("clickhouse feature is not enabled")]
    ClickhouseFeatureDisabled,

    #[error(transparent)]
    Dsn(#[from] DsnError),
}

/// Create a concrete [`LogSink`] from a [`BackendConfig`].
///
/// This is the main entry point for applications that want to select
/// a sink using a single DSN string instead of constructing it manually.
pub fn make_sink_from_config(cfg: &BackendConfig, threshold: Level) -> Result<Arc<dyn LogSink>, BackendBuildError> {
    match cfg.kind {
        BackendKind::Noop => Ok(Arc::new(NoopSink)),
        BackendKind::Console => {
            let target = match cfg.target.as_str() {
                "stdout" => ConsoleTarget::Stdout,
                _ => ConsoleTarget::Stderr,
            };
            Ok(Arc::new(ConsoleSink::new(target, threshold, Format::Thread)))
        }
        BackendKind::File => {
            let rotation = Rotation {
                max_bytes: cfg.option_u64("max_bytes")?.unwrap_or(0),
                backup_count: cfg.option_u64("backups")?.unwrap_or(0) as u32,
            };
            let watch = matches!(cfg.option("watch"), Some("1" | "true"));
            Ok(Arc::new(
                FileSink::rotating(&cfg.target, threshold, Format::Verbose, rotation).with_watch(watch),
            ))
        }
        BackendKind::Tcp => Ok(Arc::new(SocketSink::new(cfg.target.clone(), threshold))),
        BackendKind::Clickhouse => {
            #[cfg(feature = "clickhouse")]
            {
                use crate::clickhouse::{ClickHouseConfig, ClickHouseSink};

                // Expect DSN format: clickhouse://host:port/database/table
                let mut parts = cfg.target.splitn(3, '/');
                let host = parts.next().unwrap_or("127.0.0.1:8123");
                let database = parts.next().filter(|s| !s.is_empty()).unwrap_or("default");
                let table = parts.next().filter(|s| !s.is_empty()).unwrap_or("logs");

                let config = ClickHouseConfig {
                    url: format!("http://{host}"),
                    database: database.to_string(),
                    table: table.to_string(),
                    service_name: cfg.option("service").map(str::to_string),
                    user: cfg.option("user").map(str::to_string),
                    password: cfg.option("password").map(str::to_string),
                    threshold,
                };
                Ok(Arc::new(ClickHouseSink::new(config)))
            }

            #[cfg(not(feature = "clickhouse"))]
            {
                let _ = (cfg, threshold);
                Err(BackendBuildError::ClickhouseFeatureDisabled)
            }
        }
    }
}

/// Parse `dsn` and build its sink in one step.
pub fn make_sink(dsn: &str, threshold: Level) -> Result<Arc<dyn LogSink>, BackendBuildError> {
    make_sink_from_config(&parse_dsn(dsn)?, threshold)
}

/// Watched file sink writing to `$LOGFILE` (or `watchedLog.log`).
pub fn default_file_sink(threshold: Level) -> Arc<dyn LogSink> {
    Arc::new(FileSink::watched(env_or(LOG_FILE_ENV, DEFAULT_LOG_FILE), threshold, Format::Verbose))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rotating_file_dsn() {
        let cfg = parse_dsn("file://rotate%20dir/rotate.log?max_bytes=500&backups=5").unwrap();
        assert_eq!(cfg.kind, BackendKind::File);
        assert_eq!(cfg.target, "rotate dir/rotate.log");
        assert_eq!(cfg.option("max_bytes"), Some("500"));
        assert_eq!(cfg.option_u64("backups").unwrap(), Some(5));
    }

    #[test]
    fn watch_option_builds_a_file_sink() {
        let cfg = parse_dsn("file://watchedLog.log?watch=true").unwrap();
        assert_eq!(cfg.option("watch"), Some("true"));
        assert!(make_sink_from_config(&cfg, Level::Debug).is_ok());
    }

    #[test]
    fn rejects_unknown_and_incomplete_dsns() {
        assert_eq!(parse_dsn("syslog:///dev/log"), Err(DsnError::UnknownScheme("syslog".into())));
        assert_eq!(parse_dsn("localhost:9020"), Err(DsnError::MissingScheme));
        assert_eq!(parse_dsn("tcp://"), Err(DsnError::MissingTarget(BackendKind::Tcp)));
    }

    #[test]
    fn bad_option_value_is_reported() {
        let err = make_sink("file://x.log?max_bytes=lots", Level::Debug).err().unwrap();
        assert!(matches!(err, BackendBuildError::Dsn(DsnError::InvalidOption { .. })));
    }

    #[test]
    fn builds_sinks_with_threshold() {
        let sink = make_sink("tcp://127.0.0.1:9020", Level::Error).unwrap();
        assert!(!sink.accepts(Level::Warning));
        assert!(sink.accepts(Level::Critical));

        let console = make_sink("console://stdout", Level::Info).unwrap();
        assert_eq!(console.threshold(), Level::Info);
    }
}
