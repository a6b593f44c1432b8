//! Outbox maintenance
//!
//! Two periodic duties: delete PUBLISHED rows past the retention horizon,
//! and sweep IN_FLIGHT rows whose claim outlived `claim_timeout` back to
//! PENDING (a crashed publisher leaves such rows behind).

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use crate::config::OutboxConfig;
use crate::repos::OutboxRepository;

pub async fn run_maintenance(repo: Arc<dyn OutboxRepository>, config: OutboxConfig) {
    tracing::info!(
        retention_days = config.retention_days,
        claim_timeout_secs = config.claim_timeout.as_secs(),
        "starting outbox maintenance"
    );

    let mut ticker = tokio::time::interval(config.cleanup_interval);

    loop {
        ticker.tick().await;

        match repo.release_stale_claims(config.claim_timeout).await {
            Ok(0) => {}
            Ok(released) => {
                tracing::warn!(released, "released stale outbox claims");
            }
            Err(e) => {
                tracing::error!(error = %e, "stale claim sweep failed");
            }
        }

        let cutoff = Utc::now() - ChronoDuration::days(config.retention_days);
        match repo.delete_published_before(cutoff).await {
            Ok(0) => {}
            Ok(deleted) => {
                tracing::debug!(deleted, "pruned published outbox rows");
            }
            Err(e) => {
                tracing::error!(error = %e, "outbox retention prune failed");
            }
        }
    }
}
