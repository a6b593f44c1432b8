//! Outbox publisher
//!
//! Claims batches of due PENDING rows (atomically flipping them IN_FLIGHT so
//! concurrent publishers never double-ship a row) and publishes each to the
//! broker on the subject derived from its partition key. Broker failures are
//! contained per row: a failed row returns to PENDING with exponential
//! backoff until `max_retries`, then is poisoned as FAILED.

use chrono::{Duration as ChronoDuration, Utc};
use event_bus::{headers, EventBus};
use std::collections::HashMap;
use std::sync::Arc;

use super::OutboxEvent;
use crate::config::OutboxConfig;
use crate::error::EngineResult;
use crate::repos::OutboxRepository;

pub struct OutboxPublisher {
    repo: Arc<dyn OutboxRepository>,
    bus: Arc<dyn EventBus>,
    config: OutboxConfig,
}

impl OutboxPublisher {
    pub fn new(
        repo: Arc<dyn OutboxRepository>,
        bus: Arc<dyn EventBus>,
        config: OutboxConfig,
    ) -> Self {
        Self { repo, bus, config }
    }

    fn subject_for(&self, event: &OutboxEvent) -> String {
        format!("{}.{}", self.config.subject_prefix, event.partition_key)
    }

    fn backoff_for(&self, retry_count: i32) -> ChronoDuration {
        // 2^n seconds, capped at the claim timeout so a backing-off row
        // cannot look like a stale claim.
        let secs = 2i64
            .saturating_pow(retry_count.max(0) as u32)
            .min(self.config.claim_timeout.as_secs() as i64);
        ChronoDuration::seconds(secs)
    }

    /// Claim and ship one batch. Returns `(published, failed)` row counts.
    /// Row-level failures never abort the batch.
    pub async fn publish_batch(&self) -> EngineResult<(usize, usize)> {
        let batch = self
            .repo
            .claim_batch(self.config.batch_size, Utc::now())
            .await?;

        if batch.is_empty() {
            return Ok((0, 0));
        }

        tracing::debug!(claimed = batch.len(), "publishing outbox batch");

        let mut published = 0;
        let mut failed = 0;

        for event in batch {
            match self.publish_one(&event).await {
                Ok(()) => published += 1,
                Err(()) => failed += 1,
            }
        }

        Ok((published, failed))
    }

    /// Publish a single claimed row and settle its status. The returned
    /// `Err(())` only signals "this row did not publish"; the error itself
    /// is already recorded on the row.
    async fn publish_one(&self, event: &OutboxEvent) -> Result<(), ()> {
        let subject = self.subject_for(event);

        let mut bus_headers = HashMap::new();
        bus_headers.insert(headers::EVENT_ID.to_string(), event.event_id.to_string());
        bus_headers.insert(headers::EVENT_TYPE.to_string(), event.event_type.clone());
        bus_headers.insert(
            headers::TENANT_ID.to_string(),
            event.tenant_id.as_str().to_string(),
        );

        let payload = match serde_json::to_vec(&event.payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                // Unserializable payloads never become publishable; poison
                // immediately rather than burning retries.
                tracing::error!(seq = event.seq, error = %e, "outbox payload unserializable");
                let _ = self
                    .repo
                    .mark_failed(event.seq, &format!("unserializable payload: {e}"))
                    .await;
                return Err(());
            }
        };

        match self
            .bus
            .publish_with_headers(&subject, bus_headers, payload)
            .await
        {
            Ok(()) => {
                if let Err(e) = self.repo.mark_published(event.seq).await {
                    // The broker has the event; the row will be re-shipped
                    // after the claim times out. Consumers dedup on event id.
                    tracing::error!(
                        seq = event.seq,
                        event_id = %event.event_id,
                        error = %e,
                        "published but could not mark row; duplicate delivery possible"
                    );
                    return Err(());
                }

                tracing::info!(
                    seq = event.seq,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    subject = %subject,
                    "outbox event published"
                );
                Ok(())
            }
            Err(e) => {
                let error = e.to_string();
                if event.retry_count < self.config.max_retries {
                    let next_attempt_at = Utc::now() + self.backoff_for(event.retry_count);
                    tracing::warn!(
                        seq = event.seq,
                        event_id = %event.event_id,
                        retry_count = event.retry_count + 1,
                        next_attempt_at = %next_attempt_at,
                        error = %error,
                        "outbox publish failed, will retry"
                    );
                    let _ = self
                        .repo
                        .reset_to_pending(event.seq, &error, next_attempt_at)
                        .await;
                } else {
                    tracing::error!(
                        seq = event.seq,
                        event_id = %event.event_id,
                        retry_count = event.retry_count,
                        error = %error,
                        "outbox retries exhausted, poisoning row"
                    );
                    let _ = self.repo.mark_failed(event.seq, &error).await;
                }
                Err(())
            }
        }
    }

    /// Publisher loop: one logical publisher per process.
    pub async fn run(self) {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_retries = self.config.max_retries,
            "starting outbox publisher"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);

        loop {
            ticker.tick().await;

            match self.publish_batch().await {
                Ok((0, 0)) => {}
                Ok((published, failed)) => {
                    tracing::debug!(published, failed, "outbox batch finished");
                }
                Err(e) => {
                    tracing::error!(error = %e, "outbox batch failed");
                }
            }
        }
    }
}
