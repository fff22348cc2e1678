pub mod memory;

pub use memory::InMemoryBroker;

use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;
use uuid::Uuid;

use futures_core::Stream;

use crate::error::PipelineResult;

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Acknowledgment handle for a consumed message.
///
/// Makes the broker's mutual-exclusion guarantee explicit: exactly one
/// consumer holds a given message until it is acked, so the router's
/// correctness argument never depends on broker internals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckToken(pub String);

impl AckToken {
    /// Generate a new unique ack token
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AckToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed to a consumer, with its acknowledgment handle
#[derive(Debug)]
pub struct Delivery {
    /// Queue the message was consumed from
    pub queue: String,

    /// Raw wire bytes - decoding is the consumer's job
    pub bytes: Vec<u8>,

    /// Handle to release the message once its outcome is settled
    pub ack_token: AckToken,
}

/// Broker transport boundary.
///
/// The pipeline never manages wire-level reconnection itself; connection loss
/// surfaces as `TransportFault` and unacknowledged messages are the broker's
/// to redeliver.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a queue. Idempotent - declaring an existing queue is a no-op.
    async fn declare_queue(&self, queue: &str) -> PipelineResult<()>;

    /// Publish raw bytes to a declared queue
    async fn publish(&self, queue: &str, bytes: Vec<u8>) -> PipelineResult<()>;

    /// Attach a consumer to a queue, receiving deliveries as a stream
    async fn consume(&self, queue: &str) -> PipelineResult<BoxStream<Delivery>>;

    /// Acknowledge a delivery, removing it from its source queue
    async fn ack(&self, token: AckToken) -> PipelineResult<()>;
}
