//! Webhook fan-out
//!
//! Subscribes to the engine's published events and creates one delivery per
//! matching active subscription, then dispatches it immediately. The broker
//! is at-least-once, so a redelivered event may reach this consumer twice;
//! the `(event_id, subscription_id)` uniqueness on deliveries makes the
//! second pass a no-op.

use event_bus::{headers, BusMessage, EventBus};
use futures::StreamExt;
use std::sync::Arc;

use super::WebhookDeliveryWorker;
use crate::config::{OutboxConfig, WebhookConfig};
use crate::domain::WebhookDelivery;
use crate::repos::{RepoError, WebhookRepository};
use crate::tenant::TenantId;
use uuid::Uuid;

pub async fn run_fanout(
    bus: Arc<dyn EventBus>,
    repo: Arc<dyn WebhookRepository>,
    worker: Arc<WebhookDeliveryWorker>,
    outbox_config: OutboxConfig,
    webhook_config: WebhookConfig,
) {
    let pattern = format!("{}.>", outbox_config.subject_prefix);
    tracing::info!(pattern = %pattern, "starting webhook fan-out consumer");

    let mut stream = match bus.subscribe(&pattern).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "webhook fan-out could not subscribe");
            return;
        }
    };

    while let Some(msg) = stream.next().await {
        if let Err(e) = handle_message(&msg, &repo, &worker, &webhook_config).await {
            tracing::error!(subject = %msg.subject, error = %e, "webhook fan-out failed");
        }
    }

    tracing::warn!("webhook fan-out stream ended");
}

async fn handle_message(
    msg: &BusMessage,
    repo: &Arc<dyn WebhookRepository>,
    worker: &Arc<WebhookDeliveryWorker>,
    config: &WebhookConfig,
) -> Result<(), String> {
    let event_id = msg
        .header(headers::EVENT_ID)
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or("message missing event-id header")?;
    let event_type = msg
        .header(headers::EVENT_TYPE)
        .ok_or("message missing event-type header")?
        .to_string();
    let tenant_id = TenantId::new(
        msg.header(headers::TENANT_ID)
            .ok_or("message missing tenant-id header")?,
    )
    .map_err(|e| e.to_string())?;

    let payload: serde_json::Value =
        serde_json::from_slice(&msg.payload).map_err(|e| format!("unparseable payload: {e}"))?;

    let subscriptions = repo
        .list_subscriptions(&tenant_id)
        .await
        .map_err(|e| e.to_string())?;

    for subscription in subscriptions
        .iter()
        .filter(|s| s.wants(&event_type))
    {
        let delivery = WebhookDelivery::create(
            subscription,
            event_id,
            &event_type,
            payload.clone(),
            config.max_retries,
        );

        match repo.create_delivery(&delivery).await {
            Ok(()) => {
                tracing::debug!(
                    webhook_id = %delivery.id,
                    event_id = %event_id,
                    subscription_id = %subscription.id,
                    "webhook delivery enqueued"
                );

                let worker = worker.clone();
                let delivery_id = delivery.id.clone();
                tokio::spawn(async move {
                    if let Err(e) = worker.deliver(&delivery_id).await {
                        tracing::error!(
                            webhook_id = %delivery_id,
                            error = %e,
                            "webhook dispatch failed"
                        );
                    }
                });
            }
            // Redelivered event; the delivery already exists.
            Err(RepoError::Duplicate(_)) => {}
            Err(e) => return Err(e.to_string()),
        }
    }

    Ok(())
}
