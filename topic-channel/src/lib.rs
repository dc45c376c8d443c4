//! In-process topic/subscription message channel.
//!
//! This crate is the messaging collaborator boundary for the demo application:
//! it defines the [`Sender`] and [`Receiver`] capabilities, a push-style
//! [`Processor`] that delivers messages to registered handlers, and a
//! [`MemoryChannel`] implementation that fans messages out from a topic to its
//! subscriptions. Transport, retry, and redelivery policy are out of scope.
//!
//! # Example
//!
//! ```ignore
//! let channel = MemoryChannel::connect("memory://demo")?;
//! let sender = channel.sender("demotopic");
//! let receiver = channel.receiver("demotopic", "demosub");
//!
//! sender.send("hello".to_string()).await?;
//! for delivery in receiver.receive(10, Duration::from_secs(5)).await? {
//!     receiver.complete(delivery.id).await?;
//! }
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod memory;
pub mod processor;

pub use memory::{MemoryChannel, MemoryReceiver, MemorySender};
pub use processor::{Processor, ProcessorError, ProcessorFault, ProcessorOptions};

/// Channel-assigned identifier of a delivered message, unique per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed to a consumer. Immutable; ownership stays with the
/// channel until [`Receiver::complete`] is called with its id.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: MessageId,
    pub body: String,
    /// UTC instant at which the channel accepted the message.
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid channel endpoint: {0:?}")]
    InvalidEndpoint(String),
    #[error("channel is closed")]
    Closed,
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("message {0} is not awaiting completion")]
    UnknownDelivery(MessageId),
}

/// Capability to send text messages to a topic.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, body: String) -> Result<(), ChannelError>;
}

/// Capability to pull batches of messages from a subscription and to
/// acknowledge them.
#[async_trait]
pub trait Receiver: Send + Sync {
    /// Returns up to `max_messages` deliveries, waiting at most `max_wait`
    /// for the first one. An empty batch is a normal outcome, not an error.
    async fn receive(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<Delivery>, ChannelError>;

    /// Marks a delivery as processed so the channel will not redeliver it.
    async fn complete(&self, id: MessageId) -> Result<(), ChannelError>;
}
