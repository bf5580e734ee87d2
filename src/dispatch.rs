//! Bounded FIFO queue between HTTP handlers and the IRC connection manager.
//!
//! Any number of [`QueueSender`] clones feed exactly one [`QueueReceiver`].
//! Enqueueing into a full queue suspends the producer until the consumer
//! frees a slot; messages are never dropped by the queue itself.

use std::fmt;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::debug;

/// Number of messages the queue holds before producers start waiting.
pub const QUEUE_CAPACITY: usize = 10;

/// Length of generated message identifiers.
const MESSAGE_ID_LEN: usize = 6;

/// Alphabet used for message identifiers.
const MESSAGE_ID_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Correlation identifier attached to every outbound message for log tracing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a random identifier.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..MESSAGE_ID_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..MESSAGE_ID_CHARS.len());
                char::from(MESSAGE_ID_CHARS[idx])
            })
            .collect();
        Self(id)
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A rendered notification bound for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    id: MessageId,
    destination: String,
    lines: Vec<String>,
}

impl OutboundMessage {
    /// Build a message with a fresh correlation identifier.
    pub fn new(destination: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            id: MessageId::generate(),
            destination: destination.into(),
            lines,
        }
    }

    /// Correlation identifier.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Destination channel.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Lines in emission order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// The consumer side went away; the process is shutting down.
#[derive(Debug, thiserror::Error)]
#[error("dispatch queue is closed")]
pub struct QueueClosed;

/// Create a bounded queue with [`QUEUE_CAPACITY`] slots.
pub fn bounded() -> (QueueSender, QueueReceiver) {
    with_capacity(QUEUE_CAPACITY)
}

/// Create a bounded queue with an explicit capacity.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn with_capacity(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueSender { tx }, QueueReceiver { rx })
}

/// Producer handle. Cheap to clone; one per HTTP handler.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<OutboundMessage>,
}

impl QueueSender {
    /// Append a message, waiting for space when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] when the receiver has been dropped.
    pub async fn enqueue(&self, msg: OutboundMessage) -> Result<(), QueueClosed> {
        debug!(
            msg_id = %msg.id,
            channel = %msg.destination,
            lines = msg.lines.len(),
            "enqueueing message"
        );
        self.tx.send(msg).await.map_err(|_| QueueClosed)
    }

    /// Total slot count of the queue.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

/// Consumer handle, owned by the connection manager.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<OutboundMessage>,
}

impl QueueReceiver {
    /// Take the oldest message, waiting while the queue is empty.
    ///
    /// Returns `None` once every sender has been dropped and the queue is drained.
    pub async fn dequeue(&mut self) -> Option<OutboundMessage> {
        self.rx.recv().await
    }
}
