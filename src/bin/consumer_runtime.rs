//! Consumer Runtime - counter-aggregation pipeline entry point
//!
//! This binary wires the pipeline together:
//! - Connects to RabbitMQ (fatal on failure) and declares the counter queue
//! - Builds the Elasticsearch bulk sink
//! - Runs the single-worker consumer loop as a background task
//! - Shuts down on CTRL+C, closing the connection so the loop final-flushes
//!
//! Usage:
//!   cargo run --release --bin consumer_runtime
//!
//! Environment variables:
//!   AMQP_URL          - RabbitMQ URL (required)
//!   ES_URL            - Elasticsearch base URL (default: http://localhost:9200)
//!   ES_ARTICLE_INDEX  - Target index (default: articles)
//!   COUNTER_QUEUE     - Queue name (default: es_update_queue)
//!   BATCH_SIZE        - Size flush threshold (default: 100)
//!   FLUSH_INTERVAL_MS - Time flush threshold (default: 5000)
//!   PREFETCH_COUNT    - In-flight message limit (default: 1)

use countflow::pipeline::{
    config::PipelineConfig,
    consumer::run_consumer_loop,
    queue::{self, RabbitDeltaSource},
    sink::{CounterSink, EsBulkSink},
};
use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::init();

    info!("🚀 Counter Consumer Runtime");

    // Load configuration
    let config = PipelineConfig::from_env()?;

    info!("✅ Configuration loaded");
    info!("   ├─ Queue: {}", config.queue_name);
    info!("   ├─ Index: {} @ {}", config.es_index, config.es_url);
    info!("   ├─ Batch size: {} events", config.batch_size);
    info!("   ├─ Flush interval: {}ms", config.flush_interval_ms);
    info!("   └─ Prefetch: {}", config.prefetch_count);

    // Connect to the broker - startup failure here is fatal: the consumer
    // must not run in a broken state.
    let connection = queue::connect(&config.amqp_url).await?;
    info!("✅ Connected to RabbitMQ");

    let source = Box::new(
        RabbitDeltaSource::new(&connection, &config.queue_name, config.prefetch_count).await?,
    );

    let sink: Arc<dyn CounterSink> = Arc::new(EsBulkSink::new(&config.es_url, &config.es_index)?);
    info!("✅ Elasticsearch bulk sink ready");

    // Run the consumer loop in the background
    let batch_size = config.batch_size;
    let flush_interval = config.flush_interval_ms;
    let consumer_handle = tokio::spawn(async move {
        run_consumer_loop(source, sink, batch_size, flush_interval).await;
    });

    info!("🔄 Press CTRL+C to shutdown gracefully");

    // Wait for CTRL+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    // Closing the connection ends the delivery stream; the loop performs
    // its final flush and exits.
    if let Err(e) = connection.close(200, "shutdown").await {
        error!("❌ Error closing RabbitMQ connection: {}", e);
    }

    match tokio::time::timeout(tokio::time::Duration::from_secs(5), consumer_handle).await {
        Ok(_) => info!("✅ Consumer runtime stopped"),
        Err(_) => error!("❌ Consumer loop did not stop within 5s, exiting anyway"),
    }

    Ok(())
}
