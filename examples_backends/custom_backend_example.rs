use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};
use tracing_log_queue::{
    format::Format,
    init::{init_pipeline, PipelineConfig},
    level::Level,
    record::LogRecord,
    sink::{BoxError, LogSink},
};

/// Example of integrating a completely custom backend by implementing
/// the `LogSink` trait directly. Imagine this talks to some
/// proprietary DB for which this crate does not provide a built-in
/// sink.
struct MyCustomDbSink;

#[async_trait]
impl LogSink for MyCustomDbSink {
    fn threshold(&self) -> Level {
        Level::Info
    }

    async fn send(&self, record: &LogRecord) -> Result<(), BoxError> {
        // Here you would call your own client library for the target DB.
        println!("[my-custom-db] {}", Format::Json.render(record));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sink: Arc<dyn LogSink> = Arc::new(MyCustomDbSink);
    let config = PipelineConfig { enable_stdout: false, ..Default::default() };
    let pipeline = init_pipeline(vec![sink], config)?;

    info!("custom backend example started");
    error!(db = "my-custom-db", "simulated error sent via custom backend");

    pipeline.shutdown().await;
    Ok(())
}
