//! Webhook retry scheduler
//!
//! Periodically selects RETRYING deliveries whose `next_retry_at` has
//! passed and dispatches each to the delivery worker.

use chrono::Utc;
use std::sync::Arc;

use super::WebhookDeliveryWorker;
use crate::config::WebhookConfig;
use crate::repos::WebhookRepository;

pub async fn run_retry_scheduler(
    repo: Arc<dyn WebhookRepository>,
    worker: Arc<WebhookDeliveryWorker>,
    config: WebhookConfig,
) {
    tracing::info!(
        interval_secs = config.scheduler_interval.as_secs(),
        "starting webhook retry scheduler"
    );

    let mut ticker = tokio::time::interval(config.scheduler_interval);

    loop {
        ticker.tick().await;

        let due = match repo.due_for_retry(Utc::now(), 50).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "webhook retry query failed");
                continue;
            }
        };

        for delivery in due {
            let worker = worker.clone();
            tokio::spawn(async move {
                if let Err(e) = worker.deliver(&delivery.id).await {
                    tracing::error!(
                        webhook_id = %delivery.id,
                        error = %e,
                        "webhook retry dispatch failed"
                    );
                }
            });
        }
    }
}
