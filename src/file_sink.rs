use crate::format::Format;
use crate::level::Level;
use crate::record::LogRecord;
use crate::sink::{BoxError, LogSink};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Size-based rotation settings for [`FileSink`].
///
/// Rotation happens when a write would push the file past `max_bytes`;
/// `path` becomes `path.1`, `path.1` becomes `path.2`, and so on up to
/// `backup_count`. Either value set to zero disables rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rotation {
    pub max_bytes: u64,
    pub backup_count: u32,
}

impl Rotation {
    fn enabled(&self) -> bool {
        self.max_bytes > 0 && self.backup_count > 0
    }
}

struct OpenFile {
    file: File,
    len: u64,
    identity: Option<(u64, u64)>,
}

/// Device and inode of an open file, where the platform exposes them.
#[cfg(unix)]
fn identity(meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn identity(_meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    None
}

/// Appends formatted records to a file, optionally rotating it by size.
///
/// The file is opened lazily on the first write and reopened after
/// [`close`](LogSink::close) if more records arrive. A watched sink also
/// reopens its path when the file was deleted or replaced by someone else,
/// e.g. an external log rotator.
pub struct FileSink {
    path: PathBuf,
    threshold: Level,
    format: Format,
    rotation: Rotation,
    watch: bool,
    state: Mutex<Option<OpenFile>>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, threshold: Level, format: Format) -> Self {
        FileSink {
            path: path.into(),
            threshold,
            format,
            rotation: Rotation::default(),
            watch: false,
            state: Mutex::new(None),
        }
    }

    /// A sink that follows its path when the file is moved or deleted.
    pub fn watched(path: impl Into<PathBuf>, threshold: Level, format: Format) -> Self {
        Self::new(path, threshold, format).with_watch(true)
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn rotating(path: impl Into<PathBuf>, threshold: Level, format: Format, rotation: Rotation) -> Self {
        FileSink { rotation, ..Self::new(path, threshold, format) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> std::io::Result<OpenFile> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let meta = file.metadata().await?;
        Ok(OpenFile { file, len: meta.len(), identity: identity(&meta) })
    }

    /// `true` when `path` no longer names the file that is open.
    async fn replaced(&self, open: &OpenFile) -> bool {
        match fs::metadata(&self.path).await {
            Ok(meta) => identity(&meta) != open.identity,
            Err(_) => true,
        }
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    async fn rollover(&self) -> std::io::Result<()> {
        for index in (1..self.rotation.backup_count).rev() {
            let from = self.backup_path(index);
            if fs::try_exists(&from).await? {
                fs::rename(&from, self.backup_path(index + 1)).await?;
            }
        }
        fs::rename(&self.path, self.backup_path(1)).await
    }
}

#[async_trait]
impl LogSink for FileSink {
    fn threshold(&self) -> Level {
        self.threshold
    }

    async fn send(&self, record: &LogRecord) -> Result<(), BoxError> {
        let mut line = self.format.render(record);
        line.push('\n');

        let mut state = self.state.lock().await;

        if self.watch {
            if let Some(open) = state.as_mut() {
                if self.replaced(open).await {
                    open.file.flush().await?;
                    *state = None;
                }
            }
        }

        if let Some(open) = state.as_mut() {
            if self.rotation.enabled() && open.len > 0 && open.len + line.len() as u64 > self.rotation.max_bytes {
                open.file.flush().await?;
                *state = None;
                self.rollover().await?;
            }
        }

        if state.is_none() {
            *state = Some(self.open().await?);
        }

        if let Some(open) = state.as_mut() {
            open.file.write_all(line.as_bytes()).await?;
            open.len += line.len() as u64;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), BoxError> {
        if let Some(open) = self.state.lock().await.as_mut() {
            open.file.flush().await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        let mut state = self.state.lock().await;
        if let Some(mut open) = state.take() {
            open.file.flush().await?;
            open.file.sync_all().await?;
        }
        Ok(())
    }
}
