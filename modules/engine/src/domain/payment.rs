//! Payment entity and status machine
//!
//! `READY -> PROCESSING -> APPROVED -> CONFIRMED`; any of the first three may
//! fail; `CONFIRMED -> REFUNDED` once cumulative completed refunds reach the
//! payment amount. The gateway method is recorded exactly when leaving READY,
//! the gateway transaction id on entering APPROVED, and the lifecycle
//! timestamps are set on their transitions and never cleared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Money, OrderId, PaymentId, TransitionError};
use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Ready,
    Processing,
    Approved,
    Confirmed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Declared edge set of the payment state machine.
    pub const fn can_transition(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Ready, Processing)
                | (Processing, Approved)
                | (Approved, Confirmed)
                | (Ready, Failed)
                | (Processing, Failed)
                | (Approved, Failed)
                | (Confirmed, Refunded)
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Refunded)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Ready => "READY",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Approved => "APPROVED",
            PaymentStatus::Confirmed => "CONFIRMED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

/// How the customer pays at the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    VirtualAccount,
    Transfer,
    Mobile,
}

impl PaymentMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Card => "CARD",
            PaymentMethod::VirtualAccount => "VIRTUAL_ACCOUNT",
            PaymentMethod::Transfer => "TRANSFER",
            PaymentMethod::Mobile => "MOBILE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub amount: Money,
    pub status: PaymentStatus,
    pub method: Option<PaymentMethod>,
    pub pg_transaction_id: Option<String>,
    pub pg_payment_key: Option<String>,
    pub failure_reason: Option<String>,
    /// Optimistic-lock version, bumped on every save.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Create a READY payment for an order.
    pub fn create(tenant_id: TenantId, order_id: OrderId, amount: Money) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            tenant_id,
            order_id,
            amount,
            status: PaymentStatus::Ready,
            method: None,
            pg_transaction_id: None,
            pg_payment_key: None,
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
            approved_at: None,
            confirmed_at: None,
            failed_at: None,
        }
    }

    fn transition(&mut self, next: PaymentStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition(next) {
            return Err(TransitionError::new(
                "payment",
                self.status.as_str(),
                next.as_str(),
            ));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// READY -> PROCESSING; the method is fixed here and only here.
    pub fn start_processing(&mut self, method: PaymentMethod) -> Result<(), TransitionError> {
        self.transition(PaymentStatus::Processing)?;
        self.method = Some(method);
        Ok(())
    }

    /// PROCESSING -> APPROVED with the gateway identifiers.
    pub fn approve(
        &mut self,
        pg_transaction_id: impl Into<String>,
        pg_payment_key: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.transition(PaymentStatus::Approved)?;
        self.pg_transaction_id = Some(pg_transaction_id.into());
        self.pg_payment_key = Some(pg_payment_key.into());
        self.approved_at = Some(self.updated_at);
        Ok(())
    }

    /// APPROVED -> CONFIRMED.
    pub fn confirm(&mut self) -> Result<(), TransitionError> {
        self.transition(PaymentStatus::Confirmed)?;
        self.confirmed_at = Some(self.updated_at);
        Ok(())
    }

    /// Any non-terminal pre-confirmation state -> FAILED.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(PaymentStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        self.failed_at = Some(self.updated_at);
        Ok(())
    }

    /// CONFIRMED -> REFUNDED, once cumulative completed refunds cover the
    /// full amount.
    pub fn mark_refunded(&mut self) -> Result<(), TransitionError> {
        self.transition(PaymentStatus::Refunded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;
    use rust_decimal::Decimal;

    fn payment() -> Payment {
        Payment::create(
            TenantId::new("tenant-a").unwrap(),
            OrderId::new(),
            Money::new(Currency::Krw, Decimal::from(20_000)).unwrap(),
        )
    }

    #[test]
    fn test_happy_path() {
        let mut p = payment();
        assert_eq!(p.status, PaymentStatus::Ready);
        assert!(p.method.is_none());

        p.start_processing(PaymentMethod::Card).unwrap();
        assert_eq!(p.method, Some(PaymentMethod::Card));

        p.approve("toss_tx_1", "key_1").unwrap();
        assert_eq!(p.pg_transaction_id.as_deref(), Some("toss_tx_1"));
        assert!(p.approved_at.is_some());

        p.confirm().unwrap();
        assert_eq!(p.status, PaymentStatus::Confirmed);
        assert!(p.confirmed_at.is_some());
    }

    #[test]
    fn test_failure_from_each_pre_confirmed_state() {
        let mut p = payment();
        p.fail("declined").unwrap();
        assert_eq!(p.status, PaymentStatus::Failed);
        assert_eq!(p.failure_reason.as_deref(), Some("declined"));
        assert!(p.failed_at.is_some());

        let mut p = payment();
        p.start_processing(PaymentMethod::Card).unwrap();
        p.fail("declined").unwrap();
        assert_eq!(p.status, PaymentStatus::Failed);

        let mut p = payment();
        p.start_processing(PaymentMethod::Card).unwrap();
        p.approve("tx", "key").unwrap();
        p.fail("confirm rejected").unwrap();
        assert_eq!(p.status, PaymentStatus::Failed);
    }

    #[test]
    fn test_confirmed_cannot_fail() {
        let mut p = payment();
        p.start_processing(PaymentMethod::Card).unwrap();
        p.approve("tx", "key").unwrap();
        p.confirm().unwrap();
        assert!(p.fail("too late").is_err());
    }

    #[test]
    fn test_refunded_only_from_confirmed() {
        let mut p = payment();
        assert!(p.mark_refunded().is_err());

        p.start_processing(PaymentMethod::Card).unwrap();
        p.approve("tx", "key").unwrap();
        p.confirm().unwrap();
        p.mark_refunded().unwrap();
        assert_eq!(p.status, PaymentStatus::Refunded);
    }

    #[test]
    fn test_no_skipping_states() {
        let mut p = payment();
        assert!(p.confirm().is_err());
        assert!(p.approve("tx", "key").is_err());
    }
}
