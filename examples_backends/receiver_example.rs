use std::sync::Arc;

use tokio::time::Duration;
use tracing_log_queue::{
    console_sink::ConsoleSink,
    level::Level,
    record::LogRecord,
    registry::LoggerRegistry,
    server::{ReceiverConfig, ReceiverServer},
    sink::{BoxError, LogSink},
    socket_sink::SocketSink,
};

/// Runs a record receiver and feeds it from a [`SocketSink`] in the same
/// process. Received records are printed to stderr by the root logger.
#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let registry = Arc::new(LoggerRegistry::with_root_level(Level::Debug));
    registry.root().add_sink(Arc::new(ConsoleSink::stderr(Level::Debug)));

    let config = ReceiverConfig {
        host: "127.0.0.1".to_string(),
        poll_timeout: Duration::from_millis(200),
        ..ReceiverConfig::from_env()
    };
    let server = Arc::new(ReceiverServer::for_registry(&config, Arc::clone(&registry)).await?);
    let serving = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve_until_stopped().await }
    });

    let remote = SocketSink::new(server.local_addr().to_string(), Level::Debug);
    for i in 0..3 {
        let record = LogRecord::new(Level::Info, "remote.worker", "tick {} of {}").with_args([i, 3]);
        remote.send(&record).await?;
    }
    remote.close().await?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    server.request_stop();
    let accepted = serving.await?;
    println!("receiver accepted {accepted} connection(s)");

    registry.shutdown().await;
    Ok(())
}
