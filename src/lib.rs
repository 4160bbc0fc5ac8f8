//! countflow - asynchronous counter-aggregation pipeline
//!
//! The blog backend's read-heavy article listing is served from an
//! Elasticsearch index whose view/like/comment counters lag writes on
//! purpose: request handlers only enqueue small delta events, and this crate
//! owns the background consumer that batches and reconciles them into the
//! index. See [`pipeline`] for the data flow.
//!
//! Run the consumer with:
//! ```sh
//! cargo run --release --bin consumer_runtime
//! ```

pub mod pipeline;
