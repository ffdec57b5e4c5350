use crate::format::Format;
use crate::level::Level;
use crate::record::LogRecord;
use crate::sink::{BoxError, LogSink};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleTarget {
    Stdout,
    #[default]
    Stderr,
}

/// Writes one formatted line per record to stdout or stderr.
pub struct ConsoleSink {
    target: ConsoleTarget,
    threshold: Level,
    format: Format,
    // Serializes concurrent writers so lines never interleave.
    lock: Mutex<()>,
}

impl ConsoleSink {
    pub fn new(target: ConsoleTarget, threshold: Level, format: Format) -> Self {
        ConsoleSink { target, threshold, format, lock: Mutex::new(()) }
    }

    pub fn stderr(threshold: Level) -> Self {
        Self::new(ConsoleTarget::Stderr, threshold, Format::Thread)
    }

    pub fn stdout(threshold: Level) -> Self {
        Self::new(ConsoleTarget::Stdout, threshold, Format::Thread)
    }
}

#[async_trait]
impl LogSink for ConsoleSink {
    fn threshold(&self) -> Level {
        self.threshold
    }

    async fn send(&self, record: &LogRecord) -> Result<(), BoxError> {
        let mut line = self.format.render(record);
        line.push('\n');

        let _guard = self.lock.lock().await;
        match self.target {
            ConsoleTarget::Stdout => {
                let mut out = tokio::io::stdout();
                out.write_all(line.as_bytes()).await?;
                out.flush().await?;
            }
            ConsoleTarget::Stderr => {
                let mut out = tokio::io::stderr();
                out.write_all(line.as_bytes()).await?;
                out.flush().await?;
            }
        }
        Ok(())
    }
}
