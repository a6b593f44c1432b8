//! Domain core: value objects, entities, and their state machines.
//!
//! Everything in this module is pure and synchronous. State transitions are
//! applied in memory and must be fully valid before a repository persists
//! them; the transition tables are closed, and illegal edges surface as
//! [`TransitionError`] rather than panics.

pub mod ids;
pub mod money;
pub mod order;
pub mod payment;
pub mod refund;
pub mod webhook;

pub use ids::{OrderId, PaymentId, RefundId, WebhookId};
pub use money::{Currency, Money, MoneyError};
pub use order::{LineItem, Order, OrderStatus};
pub use payment::{Payment, PaymentMethod, PaymentStatus};
pub use refund::{Refund, RefundStatus};
pub use webhook::{WebhookDelivery, WebhookStatus, WebhookSubscription};

/// An attempted state transition outside the declared edge set.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{entity}: illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
}

impl TransitionError {
    pub fn new(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        Self {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
