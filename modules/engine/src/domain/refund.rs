//! Refund entity and status machine
//!
//! `REQUESTED -> PROCESSING -> {COMPLETED, FAILED}`. Creation-side rules
//! (payment must be CONFIRMED, the refund window, the cumulative amount cap,
//! the partial-refund count limit) are enforced by the refund service; this
//! module only owns the row shape and the transition table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Money, PaymentId, RefundId, TransitionError};
use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Requested,
    Processing,
    Completed,
    Failed,
}

impl RefundStatus {
    pub const fn can_transition(self, next: RefundStatus) -> bool {
        use RefundStatus::*;
        matches!(
            (self, next),
            (Requested, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, RefundStatus::Completed | RefundStatus::Failed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RefundStatus::Requested => "REQUESTED",
            RefundStatus::Processing => "PROCESSING",
            RefundStatus::Completed => "COMPLETED",
            RefundStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: RefundId,
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub reason: Option<String>,
    pub status: RefundStatus,
    pub pg_refund_id: Option<String>,
    pub error_message: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Refund {
    pub fn create(
        tenant_id: TenantId,
        payment_id: PaymentId,
        amount: Money,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: RefundId::new(),
            tenant_id,
            payment_id,
            amount,
            reason,
            status: RefundStatus::Requested,
            pg_refund_id: None,
            error_message: None,
            requested_at: Utc::now(),
            completed_at: None,
        }
    }

    fn transition(&mut self, next: RefundStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition(next) {
            return Err(TransitionError::new(
                "refund",
                self.status.as_str(),
                next.as_str(),
            ));
        }
        self.status = next;
        Ok(())
    }

    pub fn start_processing(&mut self) -> Result<(), TransitionError> {
        self.transition(RefundStatus::Processing)
    }

    pub fn complete(&mut self, pg_refund_id: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(RefundStatus::Completed)?;
        self.pg_refund_id = Some(pg_refund_id.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error_message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(RefundStatus::Failed)?;
        self.error_message = Some(error_message.into());
        Ok(())
    }

    /// Counts toward the refundable-amount cap and the partial-refund limit.
    pub fn counts_against_cap(&self) -> bool {
        self.status != RefundStatus::Failed
    }
}
