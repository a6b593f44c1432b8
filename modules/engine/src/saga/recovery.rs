//! Saga crash recovery
//!
//! On startup and on a timer, non-terminal instances whose `updated_at` is
//! stale are resumed from their persisted context. A lease
//! (`lease_owner`, `leased_until`) on the instance keeps two workers from
//! driving the same saga.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use super::{SagaDefinition, SagaOrchestrator};
use crate::config::SagaConfig;
use crate::error::EngineResult;
use crate::repos::SagaRepository;

pub struct SagaRecovery {
    repo: Arc<dyn SagaRepository>,
    orchestrator: Arc<SagaOrchestrator>,
    config: SagaConfig,
    /// Saga types this process knows how to drive.
    definitions: HashMap<&'static str, SagaDefinition>,
}

impl SagaRecovery {
    pub fn new(
        repo: Arc<dyn SagaRepository>,
        orchestrator: Arc<SagaOrchestrator>,
        config: SagaConfig,
        definitions: Vec<SagaDefinition>,
    ) -> Self {
        Self {
            repo,
            orchestrator,
            config,
            definitions: definitions.into_iter().map(|d| (d.saga_type, d)).collect(),
        }
    }

    /// One sweep: lease and resume every stalled instance we can drive.
    /// Returns the number of instances resumed.
    pub async fn recover_once(&self) -> EngineResult<usize> {
        let stale_before = Utc::now()
            - ChronoDuration::from_std(self.config.recovery_stale_after)
                .unwrap_or_else(|_| ChronoDuration::seconds(60));

        let stalled = self.repo.list_stalled(stale_before, 50).await?;
        let mut resumed = 0;

        for instance in stalled {
            let Some(definition) = self.definitions.get(instance.saga_type.as_str()) else {
                tracing::warn!(
                    saga_id = %instance.saga_id,
                    saga_type = %instance.saga_type,
                    "stalled saga of unknown type, skipping"
                );
                continue;
            };

            let lease_until = Utc::now()
                + ChronoDuration::from_std(self.config.lease_duration)
                    .unwrap_or_else(|_| ChronoDuration::seconds(60));

            let leased = self
                .repo
                .acquire_lease(instance.saga_id, self.orchestrator.owner(), lease_until)
                .await?;
            if !leased {
                continue;
            }

            let saga_id = instance.saga_id;
            match self.orchestrator.resume(definition, instance).await {
                Ok(outcome) => {
                    tracing::info!(
                        saga_id = %saga_id,
                        status = outcome.status.as_str(),
                        "stalled saga recovered"
                    );
                    resumed += 1;
                }
                Err(e) => {
                    tracing::error!(saga_id = %saga_id, error = %e, "saga recovery failed");
                }
            }

            self.repo
                .release_lease(saga_id, self.orchestrator.owner())
                .await?;
        }

        Ok(resumed)
    }

    /// Recovery loop: an immediate startup sweep, then periodic sweeps.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.config.recovery_interval.as_secs(),
            "starting saga recovery sweeper"
        );

        let mut ticker = tokio::time::interval(self.config.recovery_interval);

        loop {
            ticker.tick().await;

            match self.recover_once().await {
                Ok(0) => {}
                Ok(resumed) => {
                    tracing::info!(resumed, "saga recovery sweep finished");
                }
                Err(e) => {
                    tracing::error!(error = %e, "saga recovery sweep failed");
                }
            }
        }
    }
}
