//! In-memory implementation of the EventBus trait for testing and development

use crate::{BusError, BusMessage, BusResult, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// EventBus implementation using in-memory channels
///
/// Suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without a broker
/// - Integration tests that need fast, isolated message buses
///
/// Messages are broadcast to all subscribers via a Tokio broadcast channel.
///
/// The bus can simulate broker outages: `fail_next_publishes(n)` makes the
/// next `n` publish calls return `BusError::PublishError`, which is how the
/// outbox-retry tests drive the PENDING → IN_FLIGHT → PENDING cycle.
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, InMemoryBus};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
///
/// // Subscribe before publishing
/// let mut stream = bus.subscribe("fluxpay.events.>").await?;
///
/// bus.publish("fluxpay.events.order-1", b"hello".to_vec()).await?;
///
/// let msg = stream.next().await.unwrap();
/// assert_eq!(msg.subject, "fluxpay.events.order-1");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
    // Remaining publish calls that should fail (outage simulation)
    failures_remaining: Arc<AtomicUsize>,
}

impl InMemoryBus {
    /// Create a new in-memory event bus with a buffer of 1000 messages.
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create a new in-memory event bus with a custom buffer size.
    ///
    /// If the buffer is exceeded, the oldest messages are dropped for lagging
    /// subscribers.
    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
            failures_remaining: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `n` publish calls fail with `BusError::PublishError`.
    ///
    /// Simulates a broker outage that recovers after `n` attempts.
    pub fn fail_next_publishes(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Check whether a subject matches a subscription pattern.
    ///
    /// Supports NATS-style wildcards:
    /// - `*` matches exactly one token
    /// - `>` matches one or more trailing tokens
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        let pattern_tokens: Vec<&str> = pattern.split('.').collect();

        let mut s_idx = 0;
        let mut p_idx = 0;

        while s_idx < subject_tokens.len() && p_idx < pattern_tokens.len() {
            let pattern_token = pattern_tokens[p_idx];

            if pattern_token == ">" {
                return true;
            } else if pattern_token == "*" || subject_tokens[s_idx] == pattern_token {
                s_idx += 1;
                p_idx += 1;
            } else {
                return false;
            }
        }

        s_idx == subject_tokens.len() && p_idx == pattern_tokens.len()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish_with_headers(
        &self,
        subject: &str,
        headers: HashMap<String, String>,
        payload: Vec<u8>,
    ) -> BusResult<()> {
        // Consume one injected failure, if any
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BusError::PublishError(
                "simulated broker outage".to_string(),
            ));
        }

        let msg = BusMessage::new(subject.to_string(), payload).with_headers(headers);

        // Ignore the error when there are no receivers
        let _ = self.sender.send(msg);

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "in-memory bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn test_pattern_matching() {
        assert!(InMemoryBus::matches_pattern(
            "fluxpay.events.order-1",
            "fluxpay.events.order-1"
        ));

        assert!(InMemoryBus::matches_pattern(
            "fluxpay.events.order-1",
            "fluxpay.*.order-1"
        ));
        assert!(!InMemoryBus::matches_pattern(
            "fluxpay.events.order-1",
            "fluxpay.order-1"
        ));

        assert!(InMemoryBus::matches_pattern(
            "fluxpay.events.order-1",
            "fluxpay.>"
        ));
        assert!(InMemoryBus::matches_pattern(
            "fluxpay.events.order-1",
            "fluxpay.events.>"
        ));
        assert!(!InMemoryBus::matches_pattern(
            "fluxpay.events.order-1",
            "billing.>"
        ));

        assert!(InMemoryBus::matches_pattern("single", "*"));
        assert!(InMemoryBus::matches_pattern("single", ">"));
        assert!(!InMemoryBus::matches_pattern("one.two", "one"));
    }

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = InMemoryBus::new();

        let mut stream = bus.subscribe("fluxpay.events.>").await.unwrap();

        let mut headers = HashMap::new();
        headers.insert("event-type".to_string(), "order.created".to_string());
        bus.publish_with_headers("fluxpay.events.order-1", headers, b"payload".to_vec())
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(msg.subject, "fluxpay.events.order-1");
        assert_eq!(msg.payload, b"payload");
        assert_eq!(msg.header("event-type"), Some("order.created"));
    }

    #[tokio::test]
    async fn test_messages_in_order_per_subject() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("fluxpay.>").await.unwrap();

        for i in 0..5 {
            bus.publish("fluxpay.events.order-1", format!("message {i}").into_bytes())
                .await
                .unwrap();
        }

        for i in 0..5 {
            let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .expect("timeout")
                .expect("stream ended");

            assert_eq!(msg.payload, format!("message {i}").into_bytes());
        }
    }

    #[tokio::test]
    async fn test_failure_injection_recovers() {
        let bus = InMemoryBus::new();
        bus.fail_next_publishes(2);

        assert!(bus
            .publish("fluxpay.events.x", b"1".to_vec())
            .await
            .is_err());
        assert!(bus
            .publish("fluxpay.events.x", b"2".to_vec())
            .await
            .is_err());
        assert!(bus.publish("fluxpay.events.x", b"3".to_vec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = InMemoryBus::new();

        let mut stream1 = bus.subscribe("fluxpay.>").await.unwrap();
        let mut stream2 = bus.subscribe("fluxpay.>").await.unwrap();

        bus.publish("fluxpay.events.order-9", b"broadcast".to_vec())
            .await
            .unwrap();

        let msg1 = tokio::time::timeout(Duration::from_secs(1), stream1.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        let msg2 = tokio::time::timeout(Duration::from_secs(1), stream2.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(msg1.payload, b"broadcast");
        assert_eq!(msg2.payload, b"broadcast");
    }
}
