use crate::record::LogRecord;
use std::borrow::Cow;
use std::fmt::Write as _;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Line layouts available to the built-in sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// `time - name: LEVEL message`
    #[default]
    Simple,
    /// `time process name LEVEL message`
    Verbose,
    /// `thread threadName: time - message`
    Thread,
    /// Process header, thread line and message on separate lines.
    Process,
    /// Simple layout plus the `host`, `ip` and `user` fields.
    UserInfo,
    /// The whole record as a single JSON object.
    Json,
}

impl Format {
    /// Render one line. An unprepared record is rendered from a prepared
    /// copy, so arguments and an attached error are never lost.
    pub fn render(&self, record: &LogRecord) -> String {
        let prepared = prepared(record);
        let record: &LogRecord = &prepared;
        let time = record.timestamp.format(TIME_FORMAT);
        let message = record.get_message();
        let thread = record.thread_name.as_deref().unwrap_or("-");

        let mut line = match self {
            Format::Simple => {
                format!("{time} - {:<12}: {:<8} {message}", record.logger_name, record.level)
            }
            Format::Verbose => format!(
                "{time} {:<10} {} {:<8} {message}",
                record.process_id, record.logger_name, record.level
            ),
            Format::Thread => format!("{} {thread}: {time} - {message}", record.thread_id),
            Format::Process => format!(
                "{time} {}\n{} {thread} {} {:<8}\n{message}",
                record.process_id, record.thread_id, record.logger_name, record.level
            ),
            Format::UserInfo => format!(
                "{time:<15} {:<5} {:<8} HOST: {} IP: {:<15} User: {:<8} {message}",
                record.logger_name,
                record.level,
                field(record, "host"),
                field(record, "ip"),
                field(record, "user"),
            ),
            Format::Json => {
                return serde_json::to_string(record).unwrap_or_else(|_| message.into_owned());
            }
        };

        if let Some(exc) = &record.exc_text {
            let _ = write!(line, "\n{exc}");
        }
        line
    }
}

fn prepared(record: &LogRecord) -> Cow<'_, LogRecord> {
    if record.is_prepared() {
        return Cow::Borrowed(record);
    }
    let mut owned = record.clone();
    owned.prepare();
    Cow::Owned(owned)
}

fn field(record: &LogRecord, key: &str) -> String {
    match record.fields.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "-".to_string(),
    }
}
