//! Refund service
//!
//! Creation enforces the four refund rules (payment state, window, amount
//! cap, count limit) synchronously; a background processor then drives
//! REQUESTED refunds through the gateway. When cumulative completed refunds
//! reach the payment amount, the payment is promoted to REFUNDED.

use chrono::{Duration as ChronoDuration, Utc};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::RefundPolicy;
use crate::domain::{
    Money, Payment, PaymentId, PaymentStatus, Refund, RefundId, RefundStatus,
};
use crate::error::{EngineError, EngineResult};
use crate::events::DomainEvent;
use crate::gateway::PgClient;
use crate::outbox::OutboxEvent;
use crate::repos::{PaymentRepository, RefundRepository};
use crate::tenant::TenantContext;

pub struct RefundService {
    refunds: Arc<dyn RefundRepository>,
    payments: Arc<dyn PaymentRepository>,
    pg: Arc<dyn PgClient>,
    policy: RefundPolicy,
}

impl RefundService {
    pub fn new(
        refunds: Arc<dyn RefundRepository>,
        payments: Arc<dyn PaymentRepository>,
        pg: Arc<dyn PgClient>,
        policy: RefundPolicy,
    ) -> Self {
        Self {
            refunds,
            payments,
            pg,
            policy,
        }
    }

    /// Create a REQUESTED refund after checking, in order: the payment
    /// exists and is CONFIRMED, the refund window, the refundable balance,
    /// and the partial-refund count limit.
    pub async fn create_refund(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
        amount: Money,
        reason: Option<String>,
    ) -> EngineResult<Refund> {
        let payment = self
            .payments
            .find(ctx, payment_id)
            .await?
            .ok_or(EngineError::PaymentNotFound)?;

        if payment.status != PaymentStatus::Confirmed {
            return Err(EngineError::InvalidRefundState(format!(
                "refund requires CONFIRMED, payment is {}",
                payment.status.as_str()
            )));
        }

        let confirmed_at = payment.confirmed_at.ok_or_else(|| {
            EngineError::Internal("confirmed payment has no confirmed_at".to_string())
        })?;
        if Utc::now() - confirmed_at > ChronoDuration::days(self.policy.period_days) {
            return Err(EngineError::RefundPeriodExpired);
        }

        // Non-FAILED refunds (requested, processing, completed) all count
        // against the cap so concurrent requests cannot oversubscribe it.
        let existing = self.refunds.list_by_payment(ctx, payment_id).await?;
        let counting: Vec<&Refund> = existing
            .iter()
            .filter(|r| r.counts_against_cap())
            .collect();

        let mut refunded = Money::zero(payment.amount.currency());
        for refund in &counting {
            refunded = refunded.add(&refund.amount)?;
        }
        // Subtraction fails only when prior refunds already cover the amount.
        let refundable = payment
            .amount
            .subtract(&refunded)
            .map_err(|_| EngineError::RefundAmountExceeded)?;
        if amount.compare(&refundable)? == Ordering::Greater {
            return Err(EngineError::RefundAmountExceeded);
        }

        if counting.len() >= self.policy.max_partial_refunds {
            return Err(EngineError::RefundCountExceeded);
        }

        let refund = Refund::create(ctx.tenant_id.clone(), payment_id, amount, reason);
        let events = OutboxEvent::record_all(ctx, &[DomainEvent::refund_requested(&refund)])?;
        self.refunds.create(ctx, &refund, &events).await?;

        tracing::info!(
            refund_id = %refund.id,
            payment_id = %payment_id,
            amount = %refund.amount,
            "refund requested"
        );

        Ok(refund)
    }

    pub async fn get_refund(&self, ctx: &TenantContext, id: &RefundId) -> EngineResult<Refund> {
        self.refunds
            .find(ctx, id)
            .await?
            .ok_or(EngineError::RefundNotFound)
    }

    pub async fn list_refunds_for_payment(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
    ) -> EngineResult<Vec<Refund>> {
        Ok(self.refunds.list_by_payment(ctx, payment_id).await?)
    }

    /// One background pass: advance up to `limit` REQUESTED refunds through
    /// the gateway. Returns how many were processed.
    pub async fn process_pending(&self, limit: i64) -> EngineResult<usize> {
        let pending = self.refunds.list_requested(limit).await?;
        let count = pending.len();

        for refund in pending {
            let ctx = TenantContext::new(refund.tenant_id.clone());
            if let Err(e) = self.process_one(&ctx, refund).await {
                // One bad refund must not starve the rest of the batch.
                tracing::error!(error = %e, "refund processing failed");
            }
        }

        Ok(count)
    }

    async fn process_one(&self, ctx: &TenantContext, mut refund: Refund) -> EngineResult<()> {
        let payment = self
            .payments
            .find(ctx, refund.payment_id)
            .await?
            .ok_or(EngineError::PaymentNotFound)?;

        refund.start_processing()?;
        self.refunds.save(ctx, &refund, &[]).await?;

        let Some(payment_key) = payment.pg_payment_key.clone() else {
            return self
                .fail_refund(ctx, refund, "payment has no gateway payment key")
                .await;
        };

        let reason = refund.reason.clone().unwrap_or_else(|| "refund".to_string());
        let cancellation = self.pg.cancel_payment(&payment_key, &reason).await;

        if cancellation.success {
            refund.complete(cancellation.transaction_id)?;

            let fully_refunded = self.is_fully_refunded(ctx, &payment, &refund).await?;
            let events = OutboxEvent::record_all(
                ctx,
                &[DomainEvent::refund_completed(&refund, fully_refunded)],
            )?;
            self.refunds.save(ctx, &refund, &events).await?;

            tracing::info!(
                refund_id = %refund.id,
                payment_id = %refund.payment_id,
                fully_refunded,
                "refund completed"
            );

            if fully_refunded {
                self.promote_payment(ctx, payment).await?;
            }
            Ok(())
        } else {
            let error = cancellation
                .error_message
                .unwrap_or_else(|| "cancellation rejected".to_string());
            self.fail_refund(ctx, refund, &error).await
        }
    }

    async fn fail_refund(
        &self,
        ctx: &TenantContext,
        mut refund: Refund,
        error: &str,
    ) -> EngineResult<()> {
        refund.fail(error)?;
        let events = OutboxEvent::record_all(ctx, &[DomainEvent::refund_failed(&refund, error)])?;
        self.refunds.save(ctx, &refund, &events).await?;

        tracing::warn!(refund_id = %refund.id, error = %error, "refund failed");
        Ok(())
    }

    /// Whether completed refunds (including `just_completed`, which may not
    /// be persisted yet) now cover the full payment amount.
    async fn is_fully_refunded(
        &self,
        ctx: &TenantContext,
        payment: &Payment,
        just_completed: &Refund,
    ) -> EngineResult<bool> {
        let refunds = self.refunds.list_by_payment(ctx, payment.id).await?;

        let mut completed = just_completed.amount;
        for refund in &refunds {
            if refund.status == RefundStatus::Completed && refund.id != just_completed.id {
                completed = completed.add(&refund.amount)?;
            }
        }

        Ok(completed.compare(&payment.amount)? == Ordering::Equal)
    }

    async fn promote_payment(&self, ctx: &TenantContext, mut payment: Payment) -> EngineResult<()> {
        let expected_version = payment.version;
        payment.mark_refunded()?;
        payment.version += 1;
        self.payments
            .save(ctx, &payment, expected_version, &[])
            .await?;

        tracing::info!(payment_id = %payment.id, "payment fully refunded");
        Ok(())
    }

    /// Background refund processor loop.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            interval_secs = self.policy.process_interval.as_secs(),
            "starting refund processor"
        );

        let mut ticker = tokio::time::interval(self.policy.process_interval);

        loop {
            ticker.tick().await;

            match self.process_pending(50).await {
                Ok(0) => {}
                Ok(processed) => {
                    tracing::debug!(processed, "refund processor pass finished");
                }
                Err(e) => {
                    tracing::error!(error = %e, "refund processor pass failed");
                }
            }
        }
    }
}
