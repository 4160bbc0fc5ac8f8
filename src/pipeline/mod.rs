//! # Counter-Aggregation Pipeline
//!
//! Background consumer that drains counter delta events (view/like/comment
//! increments emitted by the blog's write paths) from a durable RabbitMQ
//! queue and reconciles them into the Elasticsearch article index with one
//! bulk scripted update per flush.
//!
//! ## Architecture
//!
//! **Key principle:** many small events, few index writes.
//!
//! 1. Write paths publish `CounterEvent`s onto the durable queue
//! 2. The consumer loop receives with prefetch 1 (one in-flight message)
//! 3. Decoded events are acked and join the in-memory batch
//! 4. The batch flushes on size threshold OR flush interval, whichever
//!    fires first; the timer re-arms on every flush
//! 5. The aggregator collapses the batch to net deltas per (article, field)
//! 6. One `_bulk` call applies every delta server-side (painless script),
//!    with `refresh=true` so listing pages see fresh counters
//!
//! Delivery is at-least-once up to the ack; past it, a failed bulk write
//! drops that batch's deltas (logged, not retried). Counters are soft data:
//! the trade is documented in DESIGN.md.
//!
//! ## Module Organization
//!
//! - `types` - event model, wire contract, decoder
//! - `batch` - pending event sequence + size trigger
//! - `aggregator` - per-(article, field) delta summation
//! - `source` - queue-side traits the loop consumes
//! - `queue` - lapin-backed source and write-path publisher
//! - `sink` - Elasticsearch `_bulk` scripted-update sink
//! - `consumer` - the orchestrating select loop
//! - `config` - environment configuration

pub mod aggregator;
pub mod batch;
pub mod config;
pub mod consumer;
pub mod queue;
pub mod sink;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use aggregator::aggregate;
pub use batch::BatchAccumulator;
pub use config::{ConfigError, PipelineConfig};
pub use consumer::run_consumer_loop;
pub use queue::{DeltaPublisher, RabbitDeltaSource};
pub use sink::{CounterSink, EsBulkSink, SinkError};
pub use source::{DeltaSource, InboundMessage, MessageAck, QueueError};
pub use types::{AggregatedUpdate, CounterEvent, CounterField, DecodeError};
