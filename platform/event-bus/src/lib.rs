//! # EventBus Abstraction
//!
//! Platform-level abstraction for the durable event log the payment saga
//! runs on. Every service publishes through its transactional outbox and
//! consumes named topics (`payments.requested`, `risk.approved`, ...) via
//! this trait, so the transport can be swapped by configuration:
//!
//! - **NatsBus**: production implementation using NATS
//! - **InMemoryBus**: test/dev implementation using in-memory channels
//!
//! The delivery contract the saga core relies on is at-least-once; effective
//! once-ness is reconstructed by each consumer's inbox table, not by the bus.
//!
//! ```rust,no_run
//! use event_bus::{EventBus, InMemoryBus, NatsBus};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Production: NATS
//! let client = async_nats::connect("nats://localhost:4222").await?;
//! let bus: Arc<dyn EventBus> = Arc::new(NatsBus::new(client));
//!
//! // Dev/Test: in-memory
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//!
//! bus.publish("payments.requested", b"{}".to_vec()).await?;
//! let mut stream = bus.subscribe("payments.requested").await?;
//! while let Some(msg) = futures::StreamExt::next(&mut stream).await {
//!     println!("{} bytes on {}", msg.payload.len(), msg.subject);
//! }
//! # Ok(())
//! # }
//! ```

pub mod consumer_retry;
mod envelope;
mod inmemory_bus;
mod nats_bus;

pub use envelope::{validate_envelope_fields, EventEnvelope};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;

/// A message received from the event bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The topic this message was published to.
    pub subject: String,
    /// The serialized event envelope.
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self { subject, payload }
    }
}

/// Errors that can occur when using the event bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Core publish-subscribe abstraction for saga topics.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a serialized envelope to a topic.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Subscribe to messages on a topic.
    ///
    /// Patterns support NATS-style wildcards (`*` one token, `>` the rest),
    /// though saga consumers subscribe to exact topic names.
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
