//! Payment gateway (PG) client contract
//!
//! The core consumes the gateway through three operations. The contract's
//! failure mode is `success = false` with a diagnostic message — transport
//! errors, timeouts, and gateway rejections are all folded into the result
//! by the adapter, and the core never sees an error type from this layer.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Money, OrderId, PaymentMethod};

pub use http::HttpPgClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgApproval {
    pub transaction_id: String,
    pub payment_key: String,
    pub success: bool,
    pub error_message: Option<String>,
}

impl PgApproval {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            transaction_id: String::new(),
            payment_key: String::new(),
            success: false,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgConfirmation {
    pub transaction_id: String,
    pub success: bool,
    pub error_message: Option<String>,
}

impl PgConfirmation {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            transaction_id: String::new(),
            success: false,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgCancellation {
    pub transaction_id: String,
    pub success: bool,
    pub error_message: Option<String>,
}

impl PgCancellation {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            transaction_id: String::new(),
            success: false,
            error_message: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait PgClient: Send + Sync {
    async fn request_approval(
        &self,
        order_id: OrderId,
        amount: &Money,
        method: PaymentMethod,
    ) -> PgApproval;

    async fn confirm_payment(
        &self,
        payment_key: &str,
        order_id: OrderId,
        amount: &Money,
    ) -> PgConfirmation;

    async fn cancel_payment(&self, payment_key: &str, reason: &str) -> PgCancellation;
}

/// In-process gateway for dev mode and tests. Succeeds by default and mints
/// `toss_tx_…` / `toss_key_…` identifiers; failures can be injected per
/// operation.
#[derive(Default)]
pub struct MockPgClient {
    fail_approval: Mutex<Option<String>>,
    fail_confirm: Mutex<Option<String>>,
    fail_cancel: Mutex<Option<String>>,
}

impl MockPgClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent approval calls fail with the given message.
    pub fn fail_approvals(&self, message: impl Into<String>) {
        *self.fail_approval.lock().expect("mutex poisoned") = Some(message.into());
    }

    pub fn fail_confirmations(&self, message: impl Into<String>) {
        *self.fail_confirm.lock().expect("mutex poisoned") = Some(message.into());
    }

    pub fn fail_cancellations(&self, message: impl Into<String>) {
        *self.fail_cancel.lock().expect("mutex poisoned") = Some(message.into());
    }

    /// Clear all injected failures.
    pub fn succeed(&self) {
        *self.fail_approval.lock().expect("mutex poisoned") = None;
        *self.fail_confirm.lock().expect("mutex poisoned") = None;
        *self.fail_cancel.lock().expect("mutex poisoned") = None;
    }
}

#[async_trait]
impl PgClient for MockPgClient {
    async fn request_approval(
        &self,
        order_id: OrderId,
        amount: &Money,
        method: PaymentMethod,
    ) -> PgApproval {
        if let Some(message) = self.fail_approval.lock().expect("mutex poisoned").clone() {
            return PgApproval::failure(message);
        }

        tracing::debug!(
            order_id = %order_id,
            amount = %amount,
            method = method.as_str(),
            "mock gateway approving payment"
        );

        PgApproval {
            transaction_id: format!("toss_tx_{}", Uuid::new_v4().simple()),
            payment_key: format!("toss_key_{}", Uuid::new_v4().simple()),
            success: true,
            error_message: None,
        }
    }

    async fn confirm_payment(
        &self,
        payment_key: &str,
        order_id: OrderId,
        _amount: &Money,
    ) -> PgConfirmation {
        if let Some(message) = self.fail_confirm.lock().expect("mutex poisoned").clone() {
            return PgConfirmation::failure(message);
        }

        tracing::debug!(
            payment_key = %payment_key,
            order_id = %order_id,
            "mock gateway confirming payment"
        );

        PgConfirmation {
            transaction_id: format!("toss_tx_{}", Uuid::new_v4().simple()),
            success: true,
            error_message: None,
        }
    }

    async fn cancel_payment(&self, payment_key: &str, reason: &str) -> PgCancellation {
        if let Some(message) = self.fail_cancel.lock().expect("mutex poisoned").clone() {
            return PgCancellation::failure(message);
        }

        tracing::debug!(
            payment_key = %payment_key,
            reason = %reason,
            "mock gateway cancelling payment"
        );

        PgCancellation {
            transaction_id: format!("toss_refund_{}", Uuid::new_v4().simple()),
            success: true,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;
    use rust_decimal::Decimal;

    fn krw(amount: i64) -> Money {
        Money::new(Currency::Krw, Decimal::from(amount)).unwrap()
    }

    #[tokio::test]
    async fn test_mock_approval_shape() {
        let pg = MockPgClient::new();
        let approval = pg
            .request_approval(OrderId::new(), &krw(20_000), PaymentMethod::Card)
            .await;

        assert!(approval.success);
        assert!(approval.transaction_id.starts_with("toss_tx_"));
        assert!(approval.payment_key.starts_with("toss_key_"));
        assert!(approval.error_message.is_none());
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let pg = MockPgClient::new();
        pg.fail_approvals("card declined");

        let approval = pg
            .request_approval(OrderId::new(), &krw(20_000), PaymentMethod::Card)
            .await;
        assert!(!approval.success);
        assert_eq!(approval.error_message.as_deref(), Some("card declined"));

        pg.succeed();
        let approval = pg
            .request_approval(OrderId::new(), &krw(20_000), PaymentMethod::Card)
            .await;
        assert!(approval.success);
    }
}
