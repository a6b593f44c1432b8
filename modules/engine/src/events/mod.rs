//! Domain events
//!
//! A closed sum over every event kind the engine emits. Each variant carries
//! the payload fields subscribers consume; the common envelope (event id,
//! occurrence time, aggregate identity, tenant) is added when the event is
//! recorded into the outbox as a CloudEvents document.
//!
//! Partitioning: order and payment events share the order's partition so one
//! order's history is totally ordered on the wire; refund events partition on
//! their payment.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::{Money, Order, OrderId, Payment, PaymentId, Refund, RefundId};

/// CloudEvents `source` attribute for everything this engine emits.
pub const EVENT_SOURCE: &str = "fluxpay-engine";

/// CloudEvents `type` prefix; the full type is `com.fluxpay.<event-type>`.
pub const EVENT_TYPE_PREFIX: &str = "com.fluxpay";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: OrderId,
    pub user_id: String,
    pub total_amount: Money,
    pub line_item_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub order_id: OrderId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCompletedData {
    pub order_id: OrderId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCreatedData {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentApprovedData {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub method: String,
    pub pg_transaction_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmedData {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequestedData {
    pub refund_id: RefundId,
    pub payment_id: PaymentId,
    pub amount: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundCompletedData {
    pub refund_id: RefundId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub pg_refund_id: String,
    /// True when this completion exhausted the payment's refundable balance
    /// and promoted the payment to REFUNDED.
    pub payment_refunded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundFailedData {
    pub refund_id: RefundId,
    pub payment_id: PaymentId,
    pub error: String,
}

/// Every event kind the engine emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    OrderCreated(OrderCreatedData),
    OrderCancelled(OrderCancelledData),
    OrderCompleted(OrderCompletedData),
    PaymentCreated(PaymentCreatedData),
    PaymentApproved(PaymentApprovedData),
    PaymentConfirmed(PaymentConfirmedData),
    PaymentFailed(PaymentFailedData),
    RefundRequested(RefundRequestedData),
    RefundCompleted(RefundCompletedData),
    RefundFailed(RefundFailedData),
}

impl DomainEvent {
    /// Short event type, e.g. `payment.approved`.
    pub fn event_type(&self) -> &'static str {
        use DomainEvent::*;
        match self {
            OrderCreated(_) => "order.created",
            OrderCancelled(_) => "order.cancelled",
            OrderCompleted(_) => "order.completed",
            PaymentCreated(_) => "payment.created",
            PaymentApproved(_) => "payment.approved",
            PaymentConfirmed(_) => "payment.confirmed",
            PaymentFailed(_) => "payment.failed",
            RefundRequested(_) => "refund.requested",
            RefundCompleted(_) => "refund.completed",
            RefundFailed(_) => "refund.failed",
        }
    }

    /// Full CloudEvents type, e.g. `com.fluxpay.payment.approved`.
    pub fn cloud_event_type(&self) -> String {
        format!("{}.{}", EVENT_TYPE_PREFIX, self.event_type())
    }

    pub fn aggregate_type(&self) -> &'static str {
        use DomainEvent::*;
        match self {
            OrderCreated(_) | OrderCancelled(_) | OrderCompleted(_) => "order",
            PaymentCreated(_) | PaymentApproved(_) | PaymentConfirmed(_) | PaymentFailed(_) => {
                "payment"
            }
            RefundRequested(_) | RefundCompleted(_) | RefundFailed(_) => "refund",
        }
    }

    pub fn aggregate_id(&self) -> String {
        use DomainEvent::*;
        match self {
            OrderCreated(d) => d.order_id.to_string(),
            OrderCancelled(d) => d.order_id.to_string(),
            OrderCompleted(d) => d.order_id.to_string(),
            PaymentCreated(d) => d.payment_id.to_string(),
            PaymentApproved(d) => d.payment_id.to_string(),
            PaymentConfirmed(d) => d.payment_id.to_string(),
            PaymentFailed(d) => d.payment_id.to_string(),
            RefundRequested(d) => d.refund_id.to_string(),
            RefundCompleted(d) => d.refund_id.to_string(),
            RefundFailed(d) => d.refund_id.to_string(),
        }
    }

    /// Broker partition key. Payment events ride their order's partition so
    /// that an order's create/approve/confirm history is totally ordered;
    /// refund events ride their payment's partition.
    pub fn partition_key(&self) -> String {
        use DomainEvent::*;
        match self {
            OrderCreated(d) => d.order_id.to_string(),
            OrderCancelled(d) => d.order_id.to_string(),
            OrderCompleted(d) => d.order_id.to_string(),
            PaymentCreated(d) => d.order_id.to_string(),
            PaymentApproved(d) => d.order_id.to_string(),
            PaymentConfirmed(d) => d.order_id.to_string(),
            PaymentFailed(d) => d.order_id.to_string(),
            RefundRequested(d) => d.payment_id.to_string(),
            RefundCompleted(d) => d.payment_id.to_string(),
            RefundFailed(d) => d.payment_id.to_string(),
        }
    }

    /// The kind-specific `data` document for the CloudEvents payload.
    pub fn data_json(&self) -> Result<JsonValue, serde_json::Error> {
        use DomainEvent::*;
        match self {
            OrderCreated(d) => serde_json::to_value(d),
            OrderCancelled(d) => serde_json::to_value(d),
            OrderCompleted(d) => serde_json::to_value(d),
            PaymentCreated(d) => serde_json::to_value(d),
            PaymentApproved(d) => serde_json::to_value(d),
            PaymentConfirmed(d) => serde_json::to_value(d),
            PaymentFailed(d) => serde_json::to_value(d),
            RefundRequested(d) => serde_json::to_value(d),
            RefundCompleted(d) => serde_json::to_value(d),
            RefundFailed(d) => serde_json::to_value(d),
        }
    }

    // Constructors from entities.

    pub fn order_created(order: &Order) -> Self {
        DomainEvent::OrderCreated(OrderCreatedData {
            order_id: order.id,
            user_id: order.user_id.clone(),
            total_amount: order.total_amount,
            line_item_count: order.line_items.len(),
        })
    }

    pub fn order_cancelled(order: &Order) -> Self {
        DomainEvent::OrderCancelled(OrderCancelledData { order_id: order.id })
    }

    pub fn order_completed(order: &Order) -> Self {
        DomainEvent::OrderCompleted(OrderCompletedData { order_id: order.id })
    }

    pub fn payment_created(payment: &Payment) -> Self {
        DomainEvent::PaymentCreated(PaymentCreatedData {
            payment_id: payment.id,
            order_id: payment.order_id,
            amount: payment.amount,
        })
    }

    pub fn payment_approved(payment: &Payment) -> Self {
        DomainEvent::PaymentApproved(PaymentApprovedData {
            payment_id: payment.id,
            order_id: payment.order_id,
            amount: payment.amount,
            method: payment
                .method
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            pg_transaction_id: payment.pg_transaction_id.clone().unwrap_or_default(),
        })
    }

    pub fn payment_confirmed(payment: &Payment) -> Self {
        DomainEvent::PaymentConfirmed(PaymentConfirmedData {
            payment_id: payment.id,
            order_id: payment.order_id,
            amount: payment.amount,
        })
    }

    pub fn payment_failed(payment: &Payment, reason: impl Into<String>) -> Self {
        DomainEvent::PaymentFailed(PaymentFailedData {
            payment_id: payment.id,
            order_id: payment.order_id,
            reason: reason.into(),
        })
    }

    pub fn refund_requested(refund: &Refund) -> Self {
        DomainEvent::RefundRequested(RefundRequestedData {
            refund_id: refund.id.clone(),
            payment_id: refund.payment_id,
            amount: refund.amount,
            reason: refund.reason.clone(),
        })
    }

    pub fn refund_completed(refund: &Refund, payment_refunded: bool) -> Self {
        DomainEvent::RefundCompleted(RefundCompletedData {
            refund_id: refund.id.clone(),
            payment_id: refund.payment_id,
            amount: refund.amount,
            pg_refund_id: refund.pg_refund_id.clone().unwrap_or_default(),
            payment_refunded,
        })
    }

    pub fn refund_failed(refund: &Refund, error: impl Into<String>) -> Self {
        DomainEvent::RefundFailed(RefundFailedData {
            refund_id: refund.id.clone(),
            payment_id: refund.payment_id,
            error: error.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, LineItem, Money};
    use crate::tenant::TenantId;
    use rust_decimal::Decimal;

    fn order() -> Order {
        Order::create(
            TenantId::new("tenant-a").unwrap(),
            "u1",
            Currency::Krw,
            vec![LineItem {
                name: "widget".to_string(),
                unit_price: Money::new(Currency::Krw, Decimal::from(10_000)).unwrap(),
                quantity: 2,
            }],
            serde_json::json!({}),
        )
        .unwrap()
    }

    #[test]
    fn test_event_type_mapping() {
        let order = order();
        let event = DomainEvent::order_created(&order);
        assert_eq!(event.event_type(), "order.created");
        assert_eq!(event.cloud_event_type(), "com.fluxpay.order.created");
        assert_eq!(event.aggregate_type(), "order");
        assert_eq!(event.aggregate_id(), order.id.to_string());
    }

    #[test]
    fn test_payment_events_partition_on_order() {
        let order = order();
        let payment = Payment::create(order.tenant_id.clone(), order.id, order.total_amount);

        let event = DomainEvent::payment_created(&payment);
        assert_eq!(event.aggregate_id(), payment.id.to_string());
        assert_eq!(event.partition_key(), order.id.to_string());
    }

    #[test]
    fn test_refund_events_partition_on_payment() {
        let order = order();
        let payment = Payment::create(order.tenant_id.clone(), order.id, order.total_amount);
        let refund = Refund::create(
            payment.tenant_id.clone(),
            payment.id,
            payment.amount,
            None,
        );

        let event = DomainEvent::refund_requested(&refund);
        assert_eq!(event.partition_key(), payment.id.to_string());
        assert_eq!(event.aggregate_id(), refund.id.to_string());
    }

    #[test]
    fn test_data_round_trip_preserves_subscriber_fields() {
        let order = order();
        let data = DomainEvent::order_created(&order).data_json().unwrap();
        assert_eq!(data["user_id"], "u1");
        assert_eq!(data["total_amount"]["amount"], "20000");
        assert_eq!(data["total_amount"]["currency"], "KRW");

        let back: OrderCreatedData = serde_json::from_value(data).unwrap();
        assert_eq!(back.order_id, order.id);
        assert_eq!(back.total_amount, order.total_amount);
    }
}
