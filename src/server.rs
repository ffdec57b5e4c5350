use crate::env::{env_or, LOG_RECEIVER_HOST_ENV, LOG_RECEIVER_PORT_ENV};
use crate::frame::DEFAULT_MAX_FRAME_LEN;
use crate::receiver::{ConnectionHandler, StreamReceiver};
use crate::registry::LoggerRegistry;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};

/// Historic default port for streamed log records.
pub const DEFAULT_TCP_LOGGING_PORT: u16 = 9020;

/// Port tried once when the configured one is already in use.
pub const FALLBACK_PORT: u16 = 9010;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings for a [`ReceiverServer`].
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub host: String,
    pub port: u16,
    pub fallback_port: u16,
    /// Upper bound on how long a stop request can go unnoticed.
    pub poll_timeout: Duration,
    /// Route all received records to this logger instead of their own.
    pub logger_override: Option<String>,
    pub max_frame_len: u32,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            host: "localhost".to_string(),
            port: DEFAULT_TCP_LOGGING_PORT,
            fallback_port: FALLBACK_PORT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            logger_override: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ReceiverConfig {
    /// Defaults, with host and port taken from the environment when set.
    /// An unparsable port falls back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let port = env_or(LOG_RECEIVER_PORT_ENV, &defaults.port.to_string())
            .parse()
            .unwrap_or(defaults.port);
        ReceiverConfig {
            host: env_or(LOG_RECEIVER_HOST_ENV, &defaults.host),
            port,
            ..defaults
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("failed to bind log receiver on {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read bound address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Cloneable switch that asks a running server loop to exit.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// TCP server that hands every accepted connection to its own task.
pub struct ReceiverServer<H> {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<H>,
    poll_timeout: Duration,
    stop: StopHandle,
}

impl ReceiverServer<StreamReceiver> {
    /// Bind a server that decodes record frames into `registry`.
    pub async fn for_registry(config: &ReceiverConfig, registry: Arc<LoggerRegistry>) -> Result<Self, ServerError> {
        let receiver = StreamReceiver::new(registry)
            .with_logger_override(config.logger_override.clone())
            .with_max_frame_len(config.max_frame_len);
        Self::bind(config, Arc::new(receiver)).await
    }
}

impl<H: ConnectionHandler> ReceiverServer<H> {
    /// Bind `config.host:config.port`.
    ///
    /// If that address is already in use, `config.fallback_port` is tried
    /// once; a second failure is returned to the caller.
    pub async fn bind(config: &ReceiverConfig, handler: Arc<H>) -> Result<Self, ServerError> {
        let listener = match TcpListener::bind((config.host.as_str(), config.port)).await {
            Ok(listener) => listener,
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                tracing::warn!(
                    port = config.port,
                    fallback = config.fallback_port,
                    "log receiver port in use, trying fallback"
                );
                TcpListener::bind((config.host.as_str(), config.fallback_port))
                    .await
                    .map_err(|source| ServerError::Bind {
                        host: config.host.clone(),
                        port: config.fallback_port,
                        source,
                    })?
            }
            Err(source) => {
                return Err(ServerError::Bind { host: config.host.clone(), port: config.port, source });
            }
        };

        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
        tracing::info!(%local_addr, "log receiver listening");

        Ok(ReceiverServer {
            listener,
            local_addr,
            handler,
            poll_timeout: config.poll_timeout.max(Duration::from_millis(1)),
            stop: StopHandle::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// Accept connections until a stop is requested.
    ///
    /// Each wait for a pending connection lasts at most one poll timeout,
    /// after which the stop flag is checked again. Connections already being
    /// handled are left to finish on their own. Returns the number of
    /// connections accepted.
    pub async fn serve_until_stopped(&self) -> u64 {
        let mut accepted = 0u64;
        while !self.stop.is_stop_requested() {
            match timeout(self.poll_timeout, self.listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    accepted += 1;
                    tracing::debug!(%peer, "accepted log connection");
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        handler.handle_connection(stream, peer).await;
                    });
                }
                Ok(Err(e)) => self.back_off_after_accept_error(&e).await,
                Err(_elapsed) => tracing::trace!("no pending log connection"),
            }
        }
        tracing::info!(local_addr = %self.local_addr, accepted, "log receiver stopped");
        accepted
    }

    // Errors such as EMFILE persist for a while; retrying at once would spin.
    async fn back_off_after_accept_error(&self, error: &std::io::Error) {
        tracing::warn!(error = %error, retry_in = ?self.poll_timeout, "failed to accept log connection");
        tokio::time::sleep(self.poll_timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpStream;

    #[derive(Default)]
    struct Counting {
        connections: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionHandler for Counting {
        async fn handle_connection(&self, _stream: TcpStream, _peer: SocketAddr) {
            self.connections.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn loopback(port: u16) -> ReceiverConfig {
        ReceiverConfig {
            host: "127.0.0.1".into(),
            port,
            poll_timeout: Duration::from_millis(20),
            ..ReceiverConfig::default()
        }
    }

    #[tokio::test]
    async fn stop_is_observed_within_a_poll() {
        let server = Arc::new(ReceiverServer::bind(&loopback(0), Arc::new(Counting::default())).await.unwrap());
        let running = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.serve_until_stopped().await }
        });

        server.request_stop();
        let accepted = timeout(Duration::from_secs(2), running).await.unwrap().unwrap();
        assert_eq!(accepted, 0);
    }

    #[tokio::test]
    async fn each_connection_reaches_the_handler() {
        let handler = Arc::new(Counting::default());
        let server = Arc::new(ReceiverServer::bind(&loopback(0), Arc::clone(&handler)).await.unwrap());
        let addr = server.local_addr();
        let stop = server.stop_handle();
        let running = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.serve_until_stopped().await }
        });

        for _ in 0..3 {
            TcpStream::connect(addr).await.unwrap();
        }
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while handler.connections.load(Ordering::SeqCst) < 3 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        stop.request_stop();
        assert_eq!(running.await.unwrap(), 3);
        assert_eq!(handler.connections.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn accept_errors_pause_for_a_poll_interval() {
        let server = ReceiverServer::bind(&loopback(0), Arc::new(Counting::default())).await.unwrap();
        let error = std::io::Error::from_raw_os_error(24);

        let started = tokio::time::Instant::now();
        server.back_off_after_accept_error(&error).await;
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn non_conflict_bind_errors_are_not_retried() {
        let config = ReceiverConfig { host: "definitely-not-a-host.invalid".into(), ..loopback(0) };
        let err = ReceiverServer::bind(&config, Arc::new(Counting::default())).await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { port: 0, .. }));
    }
}
