//! Message source trait - the consumer loop's view of the queue
//!
//! The loop only ever sees [`InboundMessage`]s: a raw payload plus an
//! acknowledge handle. Production uses the lapin-backed source in
//! `queue.rs`; tests drive the loop with channel-backed mocks.

use async_trait::async_trait;

#[derive(Debug)]
pub enum QueueError {
    /// Could not establish the connection, channel, or queue at startup.
    /// Fatal: the consumer must not run in a broken state.
    Connection(String),
    /// Broker protocol failure on an established channel (ack, reject,
    /// publish).
    Protocol(lapin::Error),
    Serialization(serde_json::Error),
}

impl From<lapin::Error> for QueueError {
    fn from(err: lapin::Error) -> Self {
        QueueError::Protocol(err)
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err)
    }
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Connection(msg) => write!(f, "Queue connection error: {}", msg),
            QueueError::Protocol(e) => write!(f, "Queue protocol error: {}", e),
            QueueError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for QueueError {}

/// Per-message acknowledge handle
///
/// Consumed exactly once: either `ack` (the durability boundary - the queue
/// may discard the message afterwards) or `reject`. With `requeue: false`
/// a rejected message is dropped for good, which is how poison messages are
/// kept from looping forever.
#[async_trait]
pub trait MessageAck: Send {
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;
    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), QueueError>;
}

/// One delivery handed to the consumer loop
pub struct InboundMessage {
    pub payload: Vec<u8>,
    pub handle: Box<dyn MessageAck>,
}

/// At-least-once delivery stream
///
/// `recv` blocks until the next delivery; `None` means the source is closed
/// (connection shut down) and the loop should final-flush and exit.
#[async_trait]
pub trait DeltaSource: Send {
    async fn recv(&mut self) -> Option<InboundMessage>;
}
