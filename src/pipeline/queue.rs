//! RabbitMQ adapters - lapin-backed source and publisher
//!
//! Both sides declare the same durable queue before use, so whichever
//! process starts first creates it. The consumer channel runs with a
//! prefetch window (default 1): the broker never pushes a second
//! unacknowledged message, which serializes processing and makes queue
//! depth the backpressure signal when the sink is slow.

use super::source::{DeltaSource, InboundMessage, MessageAck, QueueError};
use super::types::CounterEvent;
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};

/// Connect to the broker
///
/// Startup-fatal on failure (ConnectionError taxonomy): callers must not
/// fall through into a consumer that silently processes nothing.
pub async fn connect(amqp_url: &str) -> Result<Connection, QueueError> {
    Connection::connect(amqp_url, ConnectionProperties::default())
        .await
        .map_err(|e| QueueError::Connection(format!("Failed to connect to RabbitMQ: {}", e)))
}

/// Declare the counter delta queue: durable, non-exclusive, non-auto-delete
async fn declare_counter_queue(channel: &Channel, queue: &str) -> Result<(), QueueError> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                exclusive: false,
                auto_delete: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| QueueError::Connection(format!("Failed to declare queue {}: {}", queue, e)))?;
    Ok(())
}

struct RabbitAckHandle {
    delivery: Delivery,
}

#[async_trait]
impl MessageAck for RabbitAckHandle {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.delivery.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), QueueError> {
        self.delivery
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await?;
        Ok(())
    }
}

/// Lapin-backed [`DeltaSource`]
///
/// Owns a dedicated channel with the configured prefetch window and a manual
/// -ack consumer on the counter queue.
pub struct RabbitDeltaSource {
    consumer: Consumer,
}

impl RabbitDeltaSource {
    pub async fn new(
        connection: &Connection,
        queue: &str,
        prefetch: u16,
    ) -> Result<Self, QueueError> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to create channel: {}", e)))?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to set prefetch: {}", e)))?;

        declare_counter_queue(&channel, queue).await?;

        let consumer = channel
            .basic_consume(
                queue,
                "countflow-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to start consumer: {}", e)))?;

        log::info!(
            "✅ Consuming from queue '{}' (prefetch: {})",
            queue,
            prefetch
        );

        Ok(Self { consumer })
    }
}

#[async_trait]
impl DeltaSource for RabbitDeltaSource {
    async fn recv(&mut self) -> Option<InboundMessage> {
        loop {
            match self.consumer.next().await {
                Some(Ok(mut delivery)) => {
                    let payload = std::mem::take(&mut delivery.data);
                    return Some(InboundMessage {
                        payload,
                        handle: Box::new(RabbitAckHandle { delivery }),
                    });
                }
                // Transient delivery error on an open stream: skip and keep
                // consuming rather than tearing the loop down.
                Some(Err(e)) => {
                    log::error!("❌ Delivery error from broker: {}", e);
                    continue;
                }
                None => return None,
            }
        }
    }
}

/// Write-path producer for counter deltas
///
/// Handed to the CRUD handlers (outside this crate's scope) so a view/like/
/// comment can enqueue its increment. Messages are persistent so they
/// survive a broker restart along with the durable queue.
pub struct DeltaPublisher {
    channel: Channel,
    queue: String,
}

impl DeltaPublisher {
    pub async fn new(connection: &Connection, queue: &str) -> Result<Self, QueueError> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to create channel: {}", e)))?;

        declare_counter_queue(&channel, queue).await?;

        Ok(Self {
            channel,
            queue: queue.to_string(),
        })
    }

    pub async fn publish(&self, event: &CounterEvent) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(event)?;

        self.channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // persistent
                    .with_content_type("application/json".into()),
            )
            .await?;

        log::debug!(
            "Published delta: article={} field={} delta={}",
            event.article_id,
            event.field,
            event.delta
        );
        Ok(())
    }
}
