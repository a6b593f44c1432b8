//! Webhook delivery worker
//!
//! Delivers one webhook per call: signs the payload, POSTs it to the
//! subscriber, and settles the delivery's status. Transport errors, 408,
//! 429, and 5xx responses are retryable and reschedule the delivery with
//! exponential backoff plus jitter; other non-2xx responses are terminal.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use reqwest::Client;
use std::sync::Arc;

use super::{signing, wire};
use crate::config::WebhookConfig;
use crate::domain::{WebhookDelivery, WebhookId, WebhookStatus};
use crate::error::{EngineError, EngineResult};
use crate::repos::WebhookRepository;

pub struct WebhookDeliveryWorker {
    repo: Arc<dyn WebhookRepository>,
    http_client: Client,
    config: WebhookConfig,
}

enum AttemptError {
    Retryable(String),
    Terminal(String),
}

impl WebhookDeliveryWorker {
    pub fn new(repo: Arc<dyn WebhookRepository>, config: WebhookConfig) -> EngineResult<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| EngineError::Internal(format!("webhook http client: {e}")))?;

        Ok(Self {
            repo,
            http_client,
            config,
        })
    }

    /// `now + min(max_backoff, base * 2^retry_count) + uniform jitter`.
    fn next_retry_at(&self, retry_count: i32) -> DateTime<Utc> {
        let base_ms = self.config.base_backoff.as_millis() as u64;
        let cap_ms = self.config.max_backoff.as_millis() as u64;
        let backoff_ms = base_ms
            .saturating_mul(2u64.saturating_pow(retry_count.max(0) as u32))
            .min(cap_ms);

        let jitter_cap_ms = self.config.jitter.as_millis() as u64;
        let jitter_ms = if jitter_cap_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap_ms)
        };

        Utc::now() + ChronoDuration::milliseconds((backoff_ms + jitter_ms) as i64)
    }

    /// Deliver a PENDING or RETRYING webhook. Deliveries in any other state
    /// are returned untouched, so double-dispatch is harmless.
    pub async fn deliver(&self, id: &WebhookId) -> EngineResult<WebhookStatus> {
        let mut delivery = self
            .repo
            .find_delivery(id)
            .await?
            .ok_or_else(|| EngineError::Internal(format!("unknown webhook delivery {id}")))?;

        if !matches!(
            delivery.status,
            WebhookStatus::Pending | WebhookStatus::Retrying
        ) {
            return Ok(delivery.status);
        }

        let Some(subscription) = self.repo.find_subscription(delivery.subscription_id).await?
        else {
            delivery.mark_failed("subscription no longer exists")?;
            self.repo.save_delivery(&delivery).await?;
            return Ok(delivery.status);
        };

        delivery.start_sending()?;
        self.repo.save_delivery(&delivery).await?;

        match self.attempt(&delivery, &subscription.secret).await {
            Ok(()) => {
                delivery.mark_delivered()?;
                self.repo.save_delivery(&delivery).await?;
                tracing::info!(
                    webhook_id = %delivery.id,
                    event_id = %delivery.event_id,
                    target_url = %delivery.target_url,
                    "webhook delivered"
                );
            }
            Err(AttemptError::Retryable(error)) if !delivery.retries_exhausted() => {
                let next_retry_at = self.next_retry_at(delivery.retry_count);
                delivery.record_failed_attempt(&error, next_retry_at)?;
                self.repo.save_delivery(&delivery).await?;
                tracing::warn!(
                    webhook_id = %delivery.id,
                    retry_count = delivery.retry_count,
                    next_retry_at = %next_retry_at,
                    error = %error,
                    "webhook delivery failed, scheduled retry"
                );
            }
            Err(AttemptError::Retryable(error)) | Err(AttemptError::Terminal(error)) => {
                delivery.mark_failed(&error)?;
                self.repo.save_delivery(&delivery).await?;
                tracing::error!(
                    webhook_id = %delivery.id,
                    retry_count = delivery.retry_count,
                    error = %error,
                    "webhook delivery failed permanently"
                );
            }
        }

        Ok(delivery.status)
    }

    async fn attempt(
        &self,
        delivery: &WebhookDelivery,
        secret: &str,
    ) -> Result<(), AttemptError> {
        let payload = delivery.payload.to_string();
        let timestamp = Utc::now().timestamp();
        let signature = signing::sign_payload(secret, timestamp, &payload);

        let response = self
            .http_client
            .post(&delivery.target_url)
            .header("Content-Type", "application/json")
            .header(wire::TIMESTAMP, timestamp.to_string())
            .header(wire::SIGNATURE, signature)
            .header(wire::EVENT_ID, delivery.event_id.to_string())
            .header(wire::EVENT_TYPE, delivery.event_type.clone())
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AttemptError::Retryable(format!("request timeout: {e}"))
                } else {
                    AttemptError::Retryable(format!("transport error: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
            Err(AttemptError::Retryable(format!("subscriber returned {status}")))
        } else {
            Err(AttemptError::Terminal(format!("subscriber returned {status}")))
        }
    }
}
