use crate::level::Level;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// Name used when a record does not carry a logger name.
pub const ROOT_LOGGER: &str = "root";

/// A positional formatting operand.
///
/// Arguments are arbitrary `Display` values and are never serialized; they
/// only live until [`LogRecord::prepare`] renders them into the message.
#[derive(Clone)]
pub struct LogArg(Arc<dyn fmt::Display + Send + Sync>);

impl LogArg {
    pub fn new(value: impl fmt::Display + Send + Sync + 'static) -> Self {
        LogArg(Arc::new(value))
    }
}

impl<T> From<T> for LogArg
where
    T: fmt::Display + Send + Sync + 'static,
{
    fn from(value: T) -> Self {
        LogArg::new(value)
    }
}

impl fmt::Debug for LogArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogArg({})", self.0)
    }
}

/// One structured log event.
///
/// Records are built by the logging call, rendered once by
/// [`prepare`](LogRecord::prepare) before they cross a thread or network
/// boundary, and then consumed by exactly one fan-out.
///
/// The serialized form is the payload of a receiver frame. Deserialization
/// is lenient so that foreign producers can send a minimal mapping such as
/// `{"level": "INFO", "logger": "x", "message": "a"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    #[serde(default = "root_logger", alias = "logger", alias = "name")]
    pub logger_name: String,
    /// Message template; `{}` placeholders are filled from `args`.
    #[serde(default, alias = "msg")]
    pub message: String,
    #[serde(skip)]
    pub args: Vec<LogArg>,
    #[serde(default)]
    pub rendered_message: Option<String>,
    /// Raw error attached by the caller. Cleared by `prepare`.
    #[serde(skip)]
    pub error: Option<Arc<dyn Error + Send + Sync>>,
    #[serde(default)]
    pub exc_text: Option<String>,
    #[serde(default)]
    pub process_id: u32,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub thread_name: Option<String>,
    #[serde(default)]
    pub module_path: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

fn root_logger() -> String {
    ROOT_LOGGER.to_string()
}

impl LogRecord {
    /// Create a record stamped with the current time, process and thread.
    pub fn new(level: Level, logger_name: impl Into<String>, message: impl Into<String>) -> Self {
        let thread = std::thread::current();
        LogRecord {
            timestamp: Utc::now(),
            level,
            logger_name: logger_name.into(),
            message: message.into(),
            args: Vec::new(),
            rendered_message: None,
            error: None,
            exc_text: None,
            process_id: std::process::id(),
            thread_id: format!("{:?}", thread.id()),
            thread_name: thread.name().map(str::to_string),
            module_path: None,
            file: None,
            line: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<LogArg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_error(mut self, error: impl Error + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(error));
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// The final message text: the cached rendering if present, otherwise
    /// the template rendered against the current arguments.
    pub fn get_message(&self) -> Cow<'_, str> {
        match &self.rendered_message {
            Some(rendered) => Cow::Borrowed(rendered.as_str()),
            None if self.args.is_empty() => Cow::Borrowed(self.message.as_str()),
            None => Cow::Owned(render_template(&self.message, &self.args)),
        }
    }

    /// Render the message and strip everything that is not plain data.
    ///
    /// After this call `args` is empty, `error` is `None`, the rendered text
    /// is cached in `rendered_message` (and mirrored into `message`) and any
    /// error chain lives in `exc_text`.
    pub fn prepare(&mut self) {
        let rendered = self.get_message().into_owned();
        if let Some(error) = self.error.take() {
            let text = format_error_chain(&*error);
            self.exc_text = Some(match self.exc_text.take() {
                Some(previous) => format!("{previous}\n{text}"),
                None => text,
            });
        }
        self.message = rendered.clone();
        self.rendered_message = Some(rendered);
        self.args.clear();
    }

    /// `true` once the record holds only transportable data.
    pub fn is_prepared(&self) -> bool {
        self.rendered_message.is_some() && self.args.is_empty() && self.error.is_none()
    }
}

/// Substitute `{}` placeholders in `template` with `args`, in order.
///
/// `{{` and `}}` produce literal braces. Placeholders without a matching
/// argument are left as `{}`; surplus arguments are ignored.
pub fn render_template(template: &str, args: &[LogArg]) -> String {
    let mut out = String::with_capacity(template.len() + args.len() * 8);
    let mut args = args.iter();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        let next = chars.peek().copied();
        match (c, next) {
            ('{', Some('{')) => {
                chars.next();
                out.push('{');
            }
            ('}', Some('}')) => {
                chars.next();
                out.push('}');
            }
            ('{', Some('}')) => {
                chars.next();
                match args.next() {
                    Some(arg) => {
                        let _ = write!(out, "{}", arg.0);
                    }
                    None => out.push_str("{}"),
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Render an error and its `source()` chain, one cause per line.
pub fn format_error_chain(error: &(dyn Error + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(text, "\nCaused by: {cause}");
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    #[derive(Debug, thiserror::Error)]
    #[error("write failed")]
    struct WriteFailed(#[source] DiskFull);

    #[test]
    fn renders_positional_args() {
        let args = vec![LogArg::from("WARNING"), LogArg::from(2), LogArg::from("some parameters")];
        let text = render_template("A message at {} level with {} {}", &args);
        assert_eq!(text, "A message at WARNING level with 2 some parameters");
    }

    #[test]
    fn keeps_escapes_and_missing_placeholders() {
        let args = vec![LogArg::from(1)];
        assert_eq!(render_template("{{x}} = {} and {}", &args), "{x} = 1 and {}");
    }

    #[test]
    fn prepare_strips_non_transportable_fields() {
        let mut record = LogRecord::new(Level::Critical, "usersLog", "another critical message with {} and user info")
            .with_args(["Using options"])
            .with_error(WriteFailed(DiskFull));

        record.prepare();

        assert!(record.is_prepared());
        assert!(record.args.is_empty());
        assert!(record.error.is_none());
        assert_eq!(
            record.rendered_message.as_deref(),
            Some("another critical message with Using options and user info")
        );
        assert_eq!(record.message, record.rendered_message.clone().unwrap());
        assert_eq!(record.exc_text.as_deref(), Some("write failed\nCaused by: disk full"));
    }

    #[test]
    fn prepare_is_stable_when_repeated() {
        let mut record = LogRecord::new(Level::Info, "x", "value {}").with_args([7]);
        record.prepare();
        record.prepare();
        assert_eq!(record.get_message(), "value 7");
    }

    #[test]
    fn deserializes_minimal_mapping() {
        let record: LogRecord =
            serde_json::from_str(r#"{"level":"INFO","logger":"x","message":"a"}"#).unwrap();
        assert_eq!(record.level, Level::Info);
        assert_eq!(record.logger_name, "x");
        assert_eq!(record.get_message(), "a");
        assert!(record.fields.is_empty());
    }
}
