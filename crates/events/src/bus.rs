//! Message broker abstraction (mechanics only).
//!
//! The broker owns queue state; the process only holds the deliveries it is
//! currently processing and resolves each one with exactly one of
//! [`Delivery::ack`], [`Delivery::nack`] or [`Delivery::dead_letter`].
//!
//! ## Routing
//!
//! - `publish(destination, body)` delivers `body` to every queue bound to
//!   `destination`. When nothing is bound, `destination` is treated as a
//!   queue name and the queue is declared on demand, so messages for a
//!   consumer that is not running yet wait in its queue.
//! - `bind(queue, destination)` adds a queue to a destination's audience.
//!
//! ## Delivery guarantees
//!
//! At-least-once. A delivery that is negatively acknowledged with requeue goes
//! back to the head of its queue with its delivery count incremented, so the
//! queue keeps broker order for its single consumer.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use multiroom_core::ServiceError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown delivery '{tag}' on queue '{queue}'")]
    UnknownDelivery { queue: String, tag: String },

    #[error("broker closed")]
    Closed,
}

impl From<BrokerError> for ServiceError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Connection(msg) => ServiceError::unavailable(msg),
            other => ServiceError::internal(other.to_string()),
        }
    }
}

/// Settles deliveries on behalf of a broker implementation.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, queue: &str, tag: &str) -> Result<(), BrokerError>;

    async fn nack(&self, queue: &str, tag: &str, requeue: bool) -> Result<(), BrokerError>;

    /// Reject without requeue and route the message to the queue's dead-letter queue.
    async fn dead_letter(&self, queue: &str, tag: &str) -> Result<(), BrokerError>;
}

/// One message handed to a consumer.
pub struct Delivery {
    queue: String,
    tag: String,
    body: Vec<u8>,
    delivery_count: u32,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        queue: impl Into<String>,
        tag: impl Into<String>,
        body: Vec<u8>,
        delivery_count: u32,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            queue: queue.into(),
            tag: tag.into(),
            body,
            delivery_count,
            acker,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// How many times this message has been handed out, this delivery included.
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack(&self.queue, &self.tag).await
    }

    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(&self.queue, &self.tag, requeue).await
    }

    pub async fn dead_letter(self) -> Result<(), BrokerError> {
        self.acker.dead_letter(&self.queue, &self.tag).await
    }
}

impl core::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("tag", &self.tag)
            .field("bytes", &self.body.len())
            .field("delivery_count", &self.delivery_count)
            .finish()
    }
}

/// Stream of deliveries from one queue.
#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next delivery. `None` means the broker closed the consumer.
    async fn next(&mut self) -> Option<Result<Delivery, BrokerError>>;
}

/// Transport-agnostic broker (in-memory, Redis, ...).
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, destination: &str, body: &[u8]) -> Result<(), BrokerError>;

    async fn bind(&self, queue: &str, destination: &str) -> Result<(), BrokerError>;

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>, BrokerError>;
}

#[async_trait]
impl<B> MessageBroker for Arc<B>
where
    B: MessageBroker + ?Sized,
{
    async fn publish(&self, destination: &str, body: &[u8]) -> Result<(), BrokerError> {
        (**self).publish(destination, body).await
    }

    async fn bind(&self, queue: &str, destination: &str) -> Result<(), BrokerError> {
        (**self).bind(queue, destination).await
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>, BrokerError> {
        (**self).consume(queue).await
    }
}
