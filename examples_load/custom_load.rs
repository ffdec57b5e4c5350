use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;
use tracing::error;

use tracing_log_queue::init::{init_pipeline, PipelineConfig};
use tracing_log_queue::level::Level;
use tracing_log_queue::noop_sink::NoopSink;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Bounded queue: a burst larger than the capacity is dropped, not awaited.
    let config = PipelineConfig {
        queue_capacity: Some(50_000),
        poll_interval: Duration::from_millis(200),
        min_level: Level::Info,
        enable_stdout: false,
    };
    let pipeline = init_pipeline(vec![Arc::new(NoopSink)], config)?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let elapsed = start.elapsed();
    println!("custom config: enqueued {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    pipeline.shutdown().await;
    let stats = pipeline.handler().stats();
    println!("handled {} dropped {}", stats.handled(), stats.dropped());
    Ok(())
}
