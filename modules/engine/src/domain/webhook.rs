//! Webhook delivery entity, subscription registry row, and status machine
//!
//! `PENDING -> SENDING -> {DELIVERED, RETRYING, FAILED}`, `RETRYING ->
//! SENDING`. The backoff schedule itself is computed by the delivery worker;
//! the entity records the outcome of each attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{TransitionError, WebhookId};
use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookStatus {
    Pending,
    Sending,
    Delivered,
    Retrying,
    Failed,
}

impl WebhookStatus {
    pub const fn can_transition(self, next: WebhookStatus) -> bool {
        use WebhookStatus::*;
        matches!(
            (self, next),
            (Pending, Sending)
                | (Sending, Delivered)
                | (Sending, Retrying)
                | (Sending, Failed)
                | (Retrying, Sending)
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, WebhookStatus::Delivered | WebhookStatus::Failed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            WebhookStatus::Pending => "PENDING",
            WebhookStatus::Sending => "SENDING",
            WebhookStatus::Delivered => "DELIVERED",
            WebhookStatus::Retrying => "RETRYING",
            WebhookStatus::Failed => "FAILED",
        }
    }
}

/// A subscriber endpoint registered by a tenant. Deliveries fan out to every
/// active subscription whose `event_types` contain the published event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub url: String,
    /// Shared secret used to sign outbound payloads.
    pub secret: String,
    /// Event types this subscriber wants, e.g. `["payment.confirmed"]`.
    /// An empty list means all types.
    pub event_types: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn new(
        tenant_id: TenantId,
        url: impl Into<String>,
        secret: impl Into<String>,
        event_types: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            url: url.into(),
            secret: secret.into(),
            event_types,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn wants(&self, event_type: &str) -> bool {
        self.active
            && (self.event_types.is_empty() || self.event_types.iter().any(|t| t == event_type))
    }
}

/// One outbound callback to one subscriber for one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: WebhookId,
    pub tenant_id: TenantId,
    pub subscription_id: Uuid,
    /// Stable id of the event being delivered (consumer-side dedup key).
    pub event_id: Uuid,
    pub event_type: String,
    /// CloudEvents JSON, identical to the broker payload.
    pub payload: JsonValue,
    pub target_url: String,
    pub status: WebhookStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl WebhookDelivery {
    pub fn create(
        subscription: &WebhookSubscription,
        event_id: Uuid,
        event_type: impl Into<String>,
        payload: JsonValue,
        max_retries: i32,
    ) -> Self {
        Self {
            id: WebhookId::new(),
            tenant_id: subscription.tenant_id.clone(),
            subscription_id: subscription.id,
            event_id,
            event_type: event_type.into(),
            payload,
            target_url: subscription.url.clone(),
            status: WebhookStatus::Pending,
            retry_count: 0,
            max_retries,
            last_attempt_at: None,
            next_retry_at: None,
            last_error: None,
            created_at: Utc::now(),
            delivered_at: None,
        }
    }

    fn transition(&mut self, next: WebhookStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition(next) {
            return Err(TransitionError::new(
                "webhook",
                self.status.as_str(),
                next.as_str(),
            ));
        }
        self.status = next;
        Ok(())
    }

    pub fn start_sending(&mut self) -> Result<(), TransitionError> {
        self.transition(WebhookStatus::Sending)?;
        self.last_attempt_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_delivered(&mut self) -> Result<(), TransitionError> {
        self.transition(WebhookStatus::Delivered)?;
        self.delivered_at = Some(Utc::now());
        self.next_retry_at = None;
        Ok(())
    }

    /// Record a retryable failure and the time of the next attempt.
    pub fn record_failed_attempt(
        &mut self,
        error: impl Into<String>,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(WebhookStatus::Retrying)?;
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.next_retry_at = Some(next_retry_at);
        Ok(())
    }

    /// Terminal failure: non-retryable response or retries exhausted.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(WebhookStatus::Failed)?;
        self.last_error = Some(error.into());
        self.next_retry_at = None;
        Ok(())
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}
