use crate::frame::{read_frame, FrameError, DEFAULT_MAX_FRAME_LEN};
use crate::registry::LoggerRegistry;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;

/// Handles one accepted connection from start to finish.
///
/// A single handler instance serves every connection of a
/// [`ReceiverServer`](crate::server::ReceiverServer), each call on its own
/// task, so per-connection state must live inside the call.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr);
}

/// Decodes length-prefixed records from a stream and dispatches them to
/// the logger they name (or to a fixed override logger).
///
/// A bad frame ends the connection it arrived on; nothing else is affected.
pub struct StreamReceiver {
    registry: Arc<LoggerRegistry>,
    logger_override: Option<String>,
    max_frame_len: u32,
}

impl StreamReceiver {
    pub fn new(registry: Arc<LoggerRegistry>) -> Self {
        StreamReceiver { registry, logger_override: None, max_frame_len: DEFAULT_MAX_FRAME_LEN }
    }

    /// Route every received record to `name` instead of its own logger.
    pub fn with_logger_override(mut self, name: Option<String>) -> Self {
        self.logger_override = name;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: u32) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Read frames until a clean end of stream, dispatching each record in
    /// arrival order.
    ///
    /// **Returns**
    /// - `Ok(n)` with the number of records dispatched once the peer closes
    ///   the stream between frames.
    /// - `Err(..)` on the first malformed or truncated frame; records before
    ///   it have already been dispatched.
    pub async fn receive<R>(&self, reader: &mut R) -> Result<u64, FrameError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut received = 0u64;
        while let Some(record) = read_frame(reader, self.max_frame_len).await? {
            self.registry
                .dispatch(record, self.logger_override.as_deref())
                .await;
            received += 1;
        }
        Ok(received)
    }
}

#[async_trait]
impl ConnectionHandler for StreamReceiver {
    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        match self.receive(&mut stream).await {
            Ok(records) => tracing::debug!(%peer, records, "log connection closed"),
            Err(e) => tracing::warn!(%peer, error = %e, "closing log connection after bad frame"),
        }
    }
}
