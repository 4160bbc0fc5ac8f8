//! Consumer loop - single-worker select over message arrival and flush timer
//!
//! The only steady state is waiting; everything else (decode, accumulate,
//! flush) runs inline before the loop blocks again. Combined with the
//! broker-side prefetch window there is exactly one message in flight, so no
//! locking is needed anywhere in the pipeline.
//!
//! Per-message handling:
//! - decode failure: reject without requeue (poison messages are dropped,
//!   never retried), keep going
//! - decode success: ack first (the durability boundary - the queue may now
//!   discard the message), then append to the batch
//! - size threshold reached: flush immediately and re-arm the flush timer
//!
//! Timer ticks with an empty batch are inert. A failed bulk write is logged
//! and its aggregated deltas are dropped: the events were already acked, and
//! soft counters are not worth a retry queue (see DESIGN.md). While a bulk
//! write is in flight the loop accepts nothing new, so a slow index
//! backpressures straight into queue depth.

use super::aggregator::aggregate;
use super::batch::BatchAccumulator;
use super::sink::CounterSink;
use super::source::DeltaSource;
use super::types::decode;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Run the consumer loop until the source closes
///
/// Drains deliveries from `source`, batches decoded events, and flushes to
/// `sink` when `batch_size` events are pending or `flush_interval_ms`
/// elapses with a non-empty batch - whichever comes first. On source close
/// (connection shutdown) any pending events are flushed before returning.
pub async fn run_consumer_loop(
    mut source: Box<dyn DeltaSource>,
    sink: Arc<dyn CounterSink>,
    batch_size: usize,
    flush_interval_ms: u64,
) {
    log::info!("🚀 Starting counter consumer loop");
    log::info!("   ├─ Batch size: {} events", batch_size);
    log::info!("   └─ Flush interval: {}ms", flush_interval_ms);

    let mut batch = BatchAccumulator::new(batch_size);
    let mut flush_timer = interval(Duration::from_millis(flush_interval_ms));
    flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            inbound = source.recv() => {
                let Some(message) = inbound else {
                    // Source closed (shutdown): flush whatever is pending.
                    log::info!("🔄 Source closed, performing final flush...");
                    flush_batch(&mut batch, sink.as_ref()).await;
                    break;
                };

                match decode(&message.payload) {
                    Ok(event) => {
                        // Ack before aggregation: from here on the queue may
                        // discard the message even if the flush later fails.
                        if let Err(e) = message.handle.ack().await {
                            log::error!("❌ Failed to ack delivery: {}", e);
                        }

                        if batch.append(event) {
                            flush_batch(&mut batch, sink.as_ref()).await;
                            flush_timer.reset();
                        }
                    }
                    Err(e) => {
                        log::error!("❌ Dropping poison message: {}", e);
                        if let Err(e) = message.handle.reject(false).await {
                            log::error!("❌ Failed to reject delivery: {}", e);
                        }
                    }
                }
            }

            _ = flush_timer.tick() => {
                if !batch.is_empty() {
                    flush_batch(&mut batch, sink.as_ref()).await;
                }
            }
        }
    }

    log::info!("✅ Consumer loop stopped");
}

/// Drain, aggregate, and write the current batch
///
/// Success or failure, the batch is gone afterwards: a sink failure drops
/// the already-acknowledged deltas and the loop moves on.
async fn flush_batch(batch: &mut BatchAccumulator, sink: &dyn CounterSink) {
    let events = batch.drain();
    if events.is_empty() {
        return;
    }

    let event_count = events.len();
    let update = aggregate(&events);

    match sink.apply_bulk(&update).await {
        Ok(()) => {
            log::debug!(
                "✅ Flushed {} events as {} document updates",
                event_count,
                update.len()
            );
        }
        Err(e) => {
            log::error!(
                "❌ Bulk update failed, dropping {} aggregated deltas ({} events): {}",
                update.len(),
                event_count,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sink::SinkError;
    use crate::pipeline::source::{InboundMessage, MessageAck, QueueError};
    use crate::pipeline::types::{AggregatedUpdate, CounterField};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct AckLog {
        acked: usize,
        rejected: usize,
    }

    struct MockAck {
        log: Arc<Mutex<AckLog>>,
    }

    #[async_trait]
    impl MessageAck for MockAck {
        async fn ack(self: Box<Self>) -> Result<(), QueueError> {
            self.log.lock().unwrap().acked += 1;
            Ok(())
        }

        async fn reject(self: Box<Self>, _requeue: bool) -> Result<(), QueueError> {
            self.log.lock().unwrap().rejected += 1;
            Ok(())
        }
    }

    struct MockSource {
        rx: mpsc::Receiver<Vec<u8>>,
        log: Arc<Mutex<AckLog>>,
    }

    #[async_trait]
    impl DeltaSource for MockSource {
        async fn recv(&mut self) -> Option<InboundMessage> {
            let payload = self.rx.recv().await?;
            Some(InboundMessage {
                payload,
                handle: Box::new(MockAck {
                    log: self.log.clone(),
                }),
            })
        }
    }

    struct MockSink {
        calls: Arc<Mutex<Vec<AggregatedUpdate>>>,
        fail: bool,
    }

    #[async_trait]
    impl CounterSink for MockSink {
        async fn apply_bulk(&self, update: &AggregatedUpdate) -> Result<(), SinkError> {
            self.calls.lock().unwrap().push(update.clone());
            if self.fail {
                Err(SinkError::Rejected("index unavailable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        tx: mpsc::Sender<Vec<u8>>,
        ack_log: Arc<Mutex<AckLog>>,
        calls: Arc<Mutex<Vec<AggregatedUpdate>>>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_loop(batch_size: usize, flush_interval_ms: u64, fail_sink: bool) -> Harness {
        let (tx, rx) = mpsc::channel(100);
        let ack_log = Arc::new(Mutex::new(AckLog::default()));
        let calls = Arc::new(Mutex::new(Vec::new()));

        let source = Box::new(MockSource {
            rx,
            log: ack_log.clone(),
        });
        let sink: Arc<dyn CounterSink> = Arc::new(MockSink {
            calls: calls.clone(),
            fail: fail_sink,
        });

        let handle = tokio::spawn(async move {
            run_consumer_loop(source, sink, batch_size, flush_interval_ms).await;
        });

        Harness {
            tx,
            ack_log,
            calls,
            handle,
        }
    }

    fn payload(article_id: &str, field: &str, delta: i64) -> Vec<u8> {
        format!(
            r#"{{"article_id": "{}", "field": "{}", "delta": {}}}"#,
            article_id, field, delta
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn test_time_triggered_flush_aggregates_batch() {
        // Test: the documented example - two view events for A and one like
        // for B, flushed by the timer, produce one bulk call with two
        // document updates
        let harness = spawn_loop(100, 60_000, false);

        harness.tx.send(payload("A", "views", 1)).await.unwrap();
        harness.tx.send(payload("A", "views", 1)).await.unwrap();
        harness.tx.send(payload("B", "likes", 1)).await.unwrap();

        // Closing the source triggers the final flush deterministically
        // (same path as a timer fire with a non-empty batch)
        drop(harness.tx);
        harness.handle.await.unwrap();

        let calls = harness.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[0]["A"][&CounterField::Views], 2);
        assert_eq!(calls[0]["B"][&CounterField::Likes], 1);

        let log = harness.ack_log.lock().unwrap();
        assert_eq!(log.acked, 3);
        assert_eq!(log.rejected, 0);
    }

    #[tokio::test]
    async fn test_size_trigger_precedence() {
        // Test: threshold 2 with three quick events flushes A and B only,
        // leaving C pending for the next trigger
        let harness = spawn_loop(2, 60_000, false);

        harness.tx.send(payload("A", "views", 1)).await.unwrap();
        harness.tx.send(payload("B", "likes", 1)).await.unwrap();
        harness.tx.send(payload("C", "comments", 1)).await.unwrap();

        // Wait for the size-triggered flush (timer is far away at 60s)
        for _ in 0..50 {
            if !harness.calls.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        {
            let calls = harness.calls.lock().unwrap();
            assert_eq!(calls.len(), 1);
            assert!(calls[0].contains_key("A"));
            assert!(calls[0].contains_key("B"));
            assert!(!calls[0].contains_key("C"));
        }

        // C rides the final flush on shutdown
        drop(harness.tx);
        harness.handle.await.unwrap();

        let calls = harness.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1]["C"][&CounterField::Comments], 1);
    }

    #[tokio::test]
    async fn test_poison_message_is_rejected_and_isolated() {
        // Test: a malformed payload never enters the batch and never blocks
        // the messages behind it
        let harness = spawn_loop(100, 60_000, false);

        harness.tx.send(b"{not json".to_vec()).await.unwrap();
        harness
            .tx
            .send(payload("A", "shares", 1)) // unknown field: also poison
            .await
            .unwrap();
        harness.tx.send(payload("A", "views", 1)).await.unwrap();

        drop(harness.tx);
        harness.handle.await.unwrap();

        let log = harness.ack_log.lock().unwrap();
        assert_eq!(log.rejected, 2);
        assert_eq!(log.acked, 1);

        let calls = harness.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 1);
        assert_eq!(calls[0]["A"][&CounterField::Views], 1);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stall_the_loop() {
        // Test: a failed bulk write drops the batch but the loop keeps
        // accepting and flushing subsequent messages
        let harness = spawn_loop(1, 60_000, true);

        harness.tx.send(payload("A", "views", 1)).await.unwrap();
        harness.tx.send(payload("B", "likes", 1)).await.unwrap();

        drop(harness.tx);
        harness.handle.await.unwrap();

        // Both events were acked and both flushes were attempted
        let log = harness.ack_log.lock().unwrap();
        assert_eq!(log.acked, 2);

        let calls = harness.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["A"][&CounterField::Views], 1);
        assert_eq!(calls[1]["B"][&CounterField::Likes], 1);
    }

    #[tokio::test]
    async fn test_empty_timer_ticks_are_inert() {
        // Test: ticks with no pending events perform no sink call
        let harness = spawn_loop(100, 20, false);

        // Let several empty ticks pass
        tokio::time::sleep(Duration::from_millis(150)).await;

        drop(harness.tx);
        harness.handle.await.unwrap();

        assert!(harness.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timer_flushes_pending_batch() {
        // Test: a batch below the size threshold is flushed by the interval
        let harness = spawn_loop(100, 50, false);

        harness.tx.send(payload("A", "views", 1)).await.unwrap();

        // Wait for a timer-driven flush while the source stays open
        for _ in 0..50 {
            if !harness.calls.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        {
            let calls = harness.calls.lock().unwrap();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0]["A"][&CounterField::Views], 1);
        }

        drop(harness.tx);
        harness.handle.await.unwrap();

        // Nothing was pending at shutdown, so no extra call
        assert_eq!(harness.calls.lock().unwrap().len(), 1);
    }
}
