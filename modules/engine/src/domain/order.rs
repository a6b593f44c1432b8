//! Order entity and status machine
//!
//! `PENDING -> {PAID, CANCELLED, FAILED}`, `PAID -> {COMPLETED, CANCELLED,
//! FAILED}`; `COMPLETED`, `CANCELLED`, `FAILED` are terminal. The total is
//! computed from the line items at creation and never recomputed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{Currency, Money, MoneyError, OrderId, TransitionError};
use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Completed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    /// Declared edge set of the order state machine.
    pub const fn can_transition(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Paid, Completed)
                | (Paid, Cancelled)
                | (Paid, Failed)
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum OrderError {
    #[error("order has no line items")]
    EmptyLineItems,

    #[error("line item quantity must be positive, got {0}")]
    InvalidQuantity(i64),

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub unit_price: Money,
    pub quantity: i64,
}

impl LineItem {
    pub fn subtotal(&self) -> Result<Money, MoneyError> {
        self.unit_price.multiply(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub tenant_id: TenantId,
    pub user_id: String,
    pub line_items: Vec<LineItem>,
    pub total_amount: Money,
    pub currency: Currency,
    pub status: OrderStatus,
    pub metadata: JsonValue,
    /// Optimistic-lock version, bumped on every save.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a PENDING order; the total is the sum of `unit_price × quantity`
    /// over the line items and is frozen here.
    pub fn create(
        tenant_id: TenantId,
        user_id: impl Into<String>,
        currency: Currency,
        line_items: Vec<LineItem>,
        metadata: JsonValue,
    ) -> Result<Self, OrderError> {
        if line_items.is_empty() {
            return Err(OrderError::EmptyLineItems);
        }

        let mut total = Money::zero(currency);
        for item in &line_items {
            if item.quantity <= 0 {
                return Err(OrderError::InvalidQuantity(item.quantity));
            }
            total = total.add(&item.subtotal()?)?;
        }

        let now = Utc::now();
        Ok(Self {
            id: OrderId::new(),
            tenant_id,
            user_id: user_id.into(),
            line_items,
            total_amount: total,
            currency,
            status: OrderStatus::Pending,
            metadata,
            version: 0,
            created_at: now,
            updated_at: now,
            paid_at: None,
            completed_at: None,
        })
    }

    fn transition(&mut self, next: OrderStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition(next) {
            return Err(TransitionError::new(
                "order",
                self.status.as_str(),
                next.as_str(),
            ));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_paid(&mut self) -> Result<(), TransitionError> {
        self.transition(OrderStatus::Paid)?;
        self.paid_at = Some(self.updated_at);
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.transition(OrderStatus::Completed)?;
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.transition(OrderStatus::Cancelled)
    }

    pub fn fail(&mut self) -> Result<(), TransitionError> {
        self.transition(OrderStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn krw(amount: i64) -> Money {
        Money::new(Currency::Krw, Decimal::from(amount)).unwrap()
    }

    fn order_with_total(unit: i64, quantity: i64) -> Order {
        Order::create(
            TenantId::new("tenant-a").unwrap(),
            "u1",
            Currency::Krw,
            vec![LineItem {
                name: "widget".to_string(),
                unit_price: krw(unit),
                quantity,
            }],
            serde_json::json!({}),
        )
        .unwrap()
    }

    #[test]
    fn test_total_frozen_at_creation() {
        let order = order_with_total(10_000, 2);
        assert_eq!(order.total_amount, krw(20_000));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.version, 0);
    }

    #[test]
    fn test_rejects_empty_and_nonpositive_items() {
        let err = Order::create(
            TenantId::new("tenant-a").unwrap(),
            "u1",
            Currency::Krw,
            vec![],
            serde_json::json!({}),
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::EmptyLineItems));

        let err = Order::create(
            TenantId::new("tenant-a").unwrap(),
            "u1",
            Currency::Krw,
            vec![LineItem {
                name: "widget".to_string(),
                unit_price: krw(100),
                quantity: 0,
            }],
            serde_json::json!({}),
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::InvalidQuantity(0)));
    }

    #[test]
    fn test_rejects_currency_mixing() {
        let err = Order::create(
            TenantId::new("tenant-a").unwrap(),
            "u1",
            Currency::Krw,
            vec![LineItem {
                name: "widget".to_string(),
                unit_price: Money::new(Currency::Usd, Decimal::from(10)).unwrap(),
                quantity: 1,
            }],
            serde_json::json!({}),
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::Money(_)));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut order = order_with_total(10_000, 2);
        order.mark_paid().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(order.paid_at.is_some());

        order.complete().unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.completed_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_closed() {
        let mut order = order_with_total(10_000, 1);
        order.cancel().unwrap();
        assert!(order.mark_paid().is_err());
        assert!(order.complete().is_err());
        assert!(order.fail().is_err());
    }

    #[test]
    fn test_cannot_complete_unpaid() {
        let mut order = order_with_total(10_000, 1);
        assert!(order.complete().is_err());
    }
}
