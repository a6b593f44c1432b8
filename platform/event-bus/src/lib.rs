//! # EventBus Abstraction
//!
//! A platform-level abstraction for event-driven messaging.
//!
//! The engine publishes every committed domain change through this trait; the
//! transactional-outbox publisher is the only producer, downstream consumers
//! (webhook fan-out, external subscribers) attach via `subscribe`.
//!
//! ## Implementations
//!
//! - **NatsBus**: production implementation using NATS
//! - **InMemoryBus**: dev/test implementation using in-memory channels, with
//!   publish-failure injection for outage simulation
//!
//! ## Partitioning
//!
//! Subjects stand in for partitions: the publisher derives the subject from
//! the event's partition key (`fluxpay.events.<partition-key>`), so all events
//! sharing a key are delivered in publish order, while events on different
//! keys carry no ordering guarantee. Event metadata (id, type, tenant) rides
//! in message headers rather than the subject.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventBus, InMemoryBus, NatsBus};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Production: NATS
//! let nats_client = async_nats::connect("nats://localhost:4222").await?;
//! let bus: Arc<dyn EventBus> = Arc::new(NatsBus::new(nats_client));
//!
//! // Dev/Test: in-memory
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//!
//! let mut headers = HashMap::new();
//! headers.insert("event-type".to_string(), "payment.approved".to_string());
//! bus.publish_with_headers("fluxpay.events.order-1", headers, b"{}".to_vec())
//!     .await?;
//!
//! let mut stream = bus.subscribe("fluxpay.events.>").await?;
//! while let Some(msg) = futures::StreamExt::next(&mut stream).await {
//!     println!("{} bytes on {}", msg.payload.len(), msg.subject);
//! }
//! # Ok(())
//! # }
//! ```

mod envelope;
mod inmemory_bus;
mod nats_bus;
pub mod retry;

pub use envelope::{validate_cloud_event, CloudEvent, CLOUD_EVENTS_SPEC_VERSION};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;
pub use retry::{retry_with_policy, RetryPolicy};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

/// Well-known header names carried on every published event.
pub mod headers {
    pub const EVENT_ID: &str = "event-id";
    pub const EVENT_TYPE: &str = "event-type";
    pub const TENANT_ID: &str = "tenant-id";
}

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Message headers (event id, event type, tenant id, ...)
    pub headers: HashMap<String, String>,
    /// Optional reply-to subject (for request-response patterns)
    pub reply_to: Option<String>,
}

impl BusMessage {
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            payload,
            headers: HashMap::new(),
            reply_to: None,
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_reply_to(mut self, reply_to: String) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Convenience accessor for a single header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Errors that can occur when using the event bus
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

    #[error("invalid subject pattern: {0}")]
    InvalidSubject(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core event bus abstraction for publish-subscribe messaging.
///
/// Implementations must deliver messages published to one subject in publish
/// order; no cross-subject ordering is implied.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message without headers.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.publish_with_headers(subject, HashMap::new(), payload)
            .await
    }

    /// Publish a message with headers.
    ///
    /// # Arguments
    /// * `subject` - The subject to publish to (e.g., "fluxpay.events.order-1")
    /// * `headers` - Metadata delivered alongside the payload
    /// * `payload` - The message payload as raw bytes
    async fn publish_with_headers(
        &self,
        subject: &str,
        headers: HashMap<String, String>,
        payload: Vec<u8>,
    ) -> BusResult<()>;

    /// Subscribe to messages matching a subject pattern.
    ///
    /// Patterns support NATS wildcards: `*` matches a single token,
    /// `>` matches one or more trailing tokens.
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
