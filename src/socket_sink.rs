use crate::frame::encode_frame;
use crate::level::Level;
use crate::record::LogRecord;
use crate::sink::{BoxError, LogSink};
use async_trait::async_trait;
use std::borrow::Cow;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Ships records to a remote receiver as length-prefixed frames.
///
/// The connection is established lazily. When a write fails the
/// connection is dropped and the next record reconnects.
pub struct SocketSink {
    addr: String,
    threshold: Level,
    stream: Mutex<Option<TcpStream>>,
}

impl SocketSink {
    /// `addr` is anything `TcpStream::connect` accepts, e.g. `"localhost:9020"`.
    pub fn new(addr: impl Into<String>, threshold: Level) -> Self {
        SocketSink { addr: addr.into(), threshold, stream: Mutex::new(None) }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl LogSink for SocketSink {
    fn threshold(&self) -> Level {
        self.threshold
    }

    async fn send(&self, record: &LogRecord) -> Result<(), BoxError> {
        let record = if record.is_prepared() {
            Cow::Borrowed(record)
        } else {
            let mut owned = record.clone();
            owned.prepare();
            Cow::Owned(owned)
        };
        let frame = encode_frame(&record)?;

        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            let stream = TcpStream::connect(&self.addr).await?;
            stream.set_nodelay(true)?;
            *guard = Some(stream);
        }

        if let Some(stream) = guard.as_mut() {
            if let Err(e) = stream.write_all(&frame).await {
                *guard = None;
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), BoxError> {
        if let Some(stream) = self.stream.lock().await.as_mut() {
            stream.flush().await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        if let Some(mut stream) = self.stream.lock().await.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}
