use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use tracing_log_queue::init::{init_pipeline, PipelineConfig};
use tracing_log_queue::noop_sink::NoopSink;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = PipelineConfig { enable_stdout: false, ..Default::default() };
    let pipeline = init_pipeline(vec![Arc::new(NoopSink)], config)?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("default config: enqueued {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    pipeline.shutdown().await;
    let stats = pipeline.handler().stats();
    println!("handled {} dropped {}", stats.handled(), stats.dropped());
    Ok(())
}
