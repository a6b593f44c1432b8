//! Transactional outbox
//!
//! Every domain mutation that must notify subscribers records its events as
//! outbox rows inside the same transaction as the aggregate change; the
//! repositories enforce this by taking the rows alongside every mutation.
//! The [`publisher`] ships PENDING rows to the broker with at-least-once
//! semantics; [`maintenance`] prunes published rows and rescues stale claims.

pub mod maintenance;
pub mod publisher;

use chrono::{DateTime, Utc};
use event_bus::CloudEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::events::{DomainEvent, EVENT_SOURCE};
use crate::tenant::{TenantContext, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    InFlight,
    Published,
    Failed,
}

impl OutboxStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::InFlight => "IN_FLIGHT",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

/// One durable event awaiting (or past) publication.
///
/// `seq` is assigned by the store (bigserial / monotonic counter) and is 0
/// until the row is persisted. The payload is the complete CloudEvents
/// document, pinned at enqueue time so retries republish byte-identical
/// content under the same `event_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub seq: i64,
    pub tenant_id: TenantId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    /// Broker partition key; equals `aggregate_id` unless the event rides a
    /// parent aggregate's partition.
    pub partition_key: String,
    pub event_type: String,
    pub event_id: Uuid,
    pub payload: JsonValue,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxEvent {
    /// Build a PENDING row from a domain event, wrapping the payload in a
    /// CloudEvents 1.0 envelope.
    pub fn record(
        ctx: &TenantContext,
        event: &DomainEvent,
    ) -> Result<Self, serde_json::Error> {
        let event_id = Uuid::new_v4();
        let now = Utc::now();

        let envelope = CloudEvent::new(
            EVENT_SOURCE,
            event.cloud_event_type(),
            ctx.tenant_str(),
            event.data_json()?,
        )
        .with_id(event_id)
        .with_time(now);

        Ok(Self {
            seq: 0,
            tenant_id: ctx.tenant_id.clone(),
            aggregate_type: event.aggregate_type().to_string(),
            aggregate_id: event.aggregate_id(),
            partition_key: event.partition_key(),
            event_type: event.event_type().to_string(),
            event_id,
            payload: serde_json::to_value(&envelope)?,
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at: now,
            next_attempt_at: now,
            claimed_at: None,
            published_at: None,
            last_error: None,
        })
    }

    /// Record several events in order.
    pub fn record_all(
        ctx: &TenantContext,
        events: &[DomainEvent],
    ) -> Result<Vec<Self>, serde_json::Error> {
        events.iter().map(|e| Self::record(ctx, e)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, LineItem, Money, Order};
    use event_bus::validate_cloud_event;
    use rust_decimal::Decimal;

    #[test]
    fn test_record_builds_valid_cloud_event() {
        let ctx = TenantContext::from_header("tenant-a").unwrap();
        let order = Order::create(
            ctx.tenant_id.clone(),
            "u1",
            Currency::Krw,
            vec![LineItem {
                name: "widget".to_string(),
                unit_price: Money::new(Currency::Krw, Decimal::from(10_000)).unwrap(),
                quantity: 2,
            }],
            serde_json::json!({}),
        )
        .unwrap();

        let row = OutboxEvent::record(&ctx, &DomainEvent::order_created(&order)).unwrap();

        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.event_type, "order.created");
        assert_eq!(row.aggregate_id, order.id.to_string());
        assert_eq!(row.partition_key, order.id.to_string());

        validate_cloud_event(&row.payload).unwrap();
        assert_eq!(row.payload["type"], "com.fluxpay.order.created");
        assert_eq!(row.payload["tenantid"], "tenant-a");
        assert_eq!(row.payload["id"], row.event_id.to_string());
        assert_eq!(row.payload["data"]["total_amount"]["amount"], "20000");
    }
}
