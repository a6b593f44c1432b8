//! Payment service
//!
//! Drives the payment lifecycle against the gateway. Every gateway outcome —
//! including transport failures the adapter folded into `success = false` —
//! lands the payment in a persisted state before the caller sees a result,
//! and the matching event commits in the same transaction as the payment.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::domain::{
    Money, Order, OrderId, OrderStatus, Payment, PaymentId, PaymentMethod, PaymentStatus,
};
use crate::error::{EngineError, EngineResult};
use crate::events::DomainEvent;
use crate::outbox::OutboxEvent;
use crate::repos::{OrderRepository, PaymentRepository, RepoError};
use crate::services::OrderService;
use crate::tenant::TenantContext;
use crate::gateway::PgClient;

pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    orders: Arc<dyn OrderRepository>,
    order_service: Arc<OrderService>,
    pg: Arc<dyn PgClient>,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        orders: Arc<dyn OrderRepository>,
        order_service: Arc<OrderService>,
        pg: Arc<dyn PgClient>,
    ) -> Self {
        Self {
            payments,
            orders,
            order_service,
            pg,
        }
    }

    async fn load_order(&self, ctx: &TenantContext, order_id: OrderId) -> EngineResult<Order> {
        self.orders
            .find(ctx, order_id)
            .await?
            .ok_or(EngineError::OrderNotFound)
    }

    /// Create a READY payment for a PENDING order. The amount must equal the
    /// order total, and an order can only ever have one payment.
    pub async fn create_payment(
        &self,
        ctx: &TenantContext,
        order_id: OrderId,
        amount: Money,
    ) -> EngineResult<Payment> {
        let order = self.load_order(ctx, order_id).await?;

        if order.status != OrderStatus::Pending {
            return Err(EngineError::OrderAlreadyProcessed);
        }
        if amount.compare(&order.total_amount)? != Ordering::Equal {
            return Err(EngineError::Validation(format!(
                "payment amount {amount} must equal order total {}",
                order.total_amount
            )));
        }

        let payment = Payment::create(ctx.tenant_id.clone(), order_id, amount);
        let events = OutboxEvent::record_all(ctx, &[DomainEvent::payment_created(&payment)])?;

        self.payments
            .create(ctx, &payment, &events)
            .await
            .map_err(|e| match e {
                RepoError::Duplicate(_) => EngineError::PaymentAlreadyExists,
                other => other.into(),
            })?;

        tracing::info!(
            payment_id = %payment.id,
            order_id = %order_id,
            amount = %payment.amount,
            "payment created"
        );

        Ok(payment)
    }

    pub async fn get_payment(&self, ctx: &TenantContext, id: PaymentId) -> EngineResult<Payment> {
        self.payments
            .find(ctx, id)
            .await?
            .ok_or(EngineError::PaymentNotFound)
    }

    pub async fn get_payment_by_order_id(
        &self,
        ctx: &TenantContext,
        order_id: OrderId,
    ) -> EngineResult<Payment> {
        self.payments
            .find_by_order(ctx, order_id)
            .await?
            .ok_or(EngineError::PaymentNotFound)
    }

    /// READY -> PROCESSING -> {APPROVED, FAILED} via the gateway.
    ///
    /// Returns the approved payment, or `PgRejected` after persisting the
    /// failed payment and its `payment.failed` event.
    pub async fn request_approval(
        &self,
        ctx: &TenantContext,
        id: PaymentId,
        method: PaymentMethod,
    ) -> EngineResult<Payment> {
        let mut payment = self.get_payment(ctx, id).await?;

        // Persist PROCESSING before any gateway traffic so a crash leaves a
        // recoverable in-flight marker rather than a phantom READY payment.
        let expected_version = payment.version;
        payment.start_processing(method)?;
        payment.version += 1;
        self.payments
            .save(ctx, &payment, expected_version, &[])
            .await?;

        let approval = self
            .pg
            .request_approval(payment.order_id, &payment.amount, method)
            .await;

        let expected_version = payment.version;
        if approval.success {
            payment.approve(approval.transaction_id, approval.payment_key)?;
            payment.version += 1;
            let events = OutboxEvent::record_all(ctx, &[DomainEvent::payment_approved(&payment)])?;
            self.payments
                .save(ctx, &payment, expected_version, &events)
                .await?;

            tracing::info!(
                payment_id = %payment.id,
                pg_transaction_id = payment.pg_transaction_id.as_deref().unwrap_or(""),
                "payment approved"
            );
            Ok(payment)
        } else {
            let reason = approval
                .error_message
                .unwrap_or_else(|| "approval rejected".to_string());
            self.persist_failure(ctx, payment, expected_version, &reason)
                .await?;
            Err(EngineError::PgRejected(reason))
        }
    }

    /// APPROVED -> CONFIRMED via the gateway; the paid order follows.
    pub async fn confirm_payment(&self, ctx: &TenantContext, id: PaymentId) -> EngineResult<Payment> {
        let mut payment = self.get_payment(ctx, id).await?;

        if payment.status != PaymentStatus::Approved {
            return Err(EngineError::InvalidPaymentState(format!(
                "confirm requires APPROVED, payment is {}",
                payment.status.as_str()
            )));
        }
        let payment_key = payment.pg_payment_key.clone().ok_or_else(|| {
            EngineError::Internal("approved payment has no gateway payment key".to_string())
        })?;

        let confirmation = self
            .pg
            .confirm_payment(&payment_key, payment.order_id, &payment.amount)
            .await;

        let expected_version = payment.version;
        if confirmation.success {
            payment.confirm()?;
            payment.version += 1;
            let events = OutboxEvent::record_all(ctx, &[DomainEvent::payment_confirmed(&payment)])?;
            self.payments
                .save(ctx, &payment, expected_version, &events)
                .await?;

            // The order rides along; see OrderService::mark_order_paid for
            // why no extra event is emitted.
            if let Err(e) = self
                .order_service
                .mark_order_paid(ctx, payment.order_id)
                .await
            {
                tracing::warn!(
                    order_id = %payment.order_id,
                    error = %e,
                    "payment confirmed but order could not be marked paid"
                );
            }

            tracing::info!(payment_id = %payment.id, "payment confirmed");
            Ok(payment)
        } else {
            let reason = confirmation
                .error_message
                .unwrap_or_else(|| "confirmation rejected".to_string());
            self.persist_failure(ctx, payment, expected_version, &reason)
                .await?;
            Err(EngineError::PgRejected(reason))
        }
    }

    /// Force a payment to FAILED. Already-failed payments are returned as-is
    /// so saga compensation can safely re-run.
    pub async fn fail_payment(
        &self,
        ctx: &TenantContext,
        id: PaymentId,
        reason: &str,
    ) -> EngineResult<Payment> {
        let payment = self.get_payment(ctx, id).await?;

        if payment.status == PaymentStatus::Failed {
            return Ok(payment);
        }

        let expected_version = payment.version;
        self.persist_failure(ctx, payment.clone(), expected_version, reason)
            .await?;
        self.get_payment(ctx, id).await
    }

    async fn persist_failure(
        &self,
        ctx: &TenantContext,
        mut payment: Payment,
        expected_version: i64,
        reason: &str,
    ) -> EngineResult<()> {
        payment.fail(reason)?;
        payment.version += 1;
        let events = OutboxEvent::record_all(
            ctx,
            &[DomainEvent::payment_failed(&payment, reason)],
        )?;
        self.payments
            .save(ctx, &payment, expected_version, &events)
            .await?;

        tracing::warn!(payment_id = %payment.id, reason = %reason, "payment failed");
        Ok(())
    }
}
