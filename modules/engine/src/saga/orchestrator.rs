//! Saga execution engine
//!
//! Drives a [`SagaDefinition`] against a persisted instance: steps execute
//! strictly in declared order under a per-step timeout, progress (including
//! the serialized context) is persisted after every step, and a failure
//! compensates executed steps strictly in reverse. Compensation attempts
//! retry on a fixed delay; a compensation that still fails poisons the saga
//! (`compensation_failed`) and escalates it to FAILED.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::{
    SagaContext, SagaDefinition, SagaInstance, SagaStatus, SagaStepRecord, StepStatus,
};
use crate::config::SagaConfig;
use crate::error::{EngineError, EngineResult};
use crate::repos::{RepoError, SagaRepository};
use crate::tenant::TenantContext;

/// Terminal result of a saga run.
#[derive(Debug, Clone)]
pub struct SagaOutcome {
    pub saga_id: Uuid,
    pub status: SagaStatus,
    /// Final context; callers read the saga's results out of it.
    pub context: SagaContext,
    pub error: Option<String>,
    /// The typed error of the step that triggered compensation, when the
    /// failure happened in this process (a resumed saga only has the
    /// persisted message).
    pub failure: Option<EngineError>,
    pub compensation_failed: bool,
}

impl SagaOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == SagaStatus::Completed
    }
}

pub struct SagaOrchestrator {
    repo: Arc<dyn SagaRepository>,
    config: SagaConfig,
    /// Process identity recorded on recovery leases.
    owner: String,
}

impl SagaOrchestrator {
    pub fn new(repo: Arc<dyn SagaRepository>, config: SagaConfig) -> Self {
        Self {
            repo,
            config,
            owner: format!("orchestrator-{}", Uuid::new_v4().simple()),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Run a saga to a terminal state.
    ///
    /// A duplicate `(tenant, correlation_id)` is rejected before any step
    /// runs, so client retries cannot start a second saga.
    pub async fn run(
        &self,
        definition: &SagaDefinition,
        ctx: SagaContext,
    ) -> EngineResult<SagaOutcome> {
        let mut instance = SagaInstance::new(definition.saga_type, &ctx);

        self.repo
            .create_instance(&instance)
            .await
            .map_err(|e| match e {
                RepoError::Duplicate(_) => EngineError::Validation(format!(
                    "saga already running for correlation id {}",
                    ctx.correlation_id
                )),
                other => other.into(),
            })?;

        tracing::info!(
            saga_id = %instance.saga_id,
            saga_type = definition.saga_type,
            correlation_id = %ctx.correlation_id,
            tenant_id = %ctx.tenant.tenant_id,
            "saga started"
        );

        instance.set_status(SagaStatus::Processing)?;
        self.repo.update_instance(&instance).await?;

        let deadline = Instant::now() + self.config.timeout;
        self.drive(definition, instance, ctx, deadline).await
    }

    /// Resume a non-terminal instance (recovery path). The context is
    /// rebuilt from the persisted `context_data`.
    pub async fn resume(
        &self,
        definition: &SagaDefinition,
        mut instance: SagaInstance,
    ) -> EngineResult<SagaOutcome> {
        let tenant = TenantContext::new(instance.tenant_id.clone());
        let ctx = SagaContext::from_value(
            tenant,
            instance.correlation_id.clone(),
            instance.context_data.clone(),
        )?;

        tracing::info!(
            saga_id = %instance.saga_id,
            saga_type = %instance.saga_type,
            status = instance.status.as_str(),
            current_step = instance.current_step,
            "resuming saga"
        );

        match instance.status {
            SagaStatus::Started => {
                instance.set_status(SagaStatus::Processing)?;
                self.repo.update_instance(&instance).await?;
                let deadline = Instant::now() + self.config.timeout;
                self.drive(definition, instance, ctx, deadline).await
            }
            SagaStatus::Processing => {
                let deadline = Instant::now() + self.config.timeout;
                self.drive(definition, instance, ctx, deadline).await
            }
            // Compensation must complete regardless of the overall timeout.
            SagaStatus::Compensating => {
                let error = instance.error.clone().unwrap_or_default();
                self.compensate(definition, instance, ctx, error, None).await
            }
            terminal => Ok(SagaOutcome {
                saga_id: instance.saga_id,
                status: terminal,
                context: ctx,
                error: instance.error.clone(),
                failure: None,
                compensation_failed: instance.compensation_failed,
            }),
        }
    }

    /// Execute steps from `instance.current_step` onward.
    async fn drive(
        &self,
        definition: &SagaDefinition,
        mut instance: SagaInstance,
        mut ctx: SagaContext,
        deadline: Instant,
    ) -> EngineResult<SagaOutcome> {
        let start = instance.current_step.max(0) as usize;

        for (index, step) in definition.steps.iter().enumerate().skip(start) {
            if Instant::now() >= deadline {
                tracing::warn!(
                    saga_id = %instance.saga_id,
                    step = step.name(),
                    "saga deadline exceeded, compensating"
                );
                return self
                    .compensate(
                        definition,
                        instance,
                        ctx,
                        "saga timeout".to_string(),
                        Some(EngineError::UpstreamTimeout("saga timeout".to_string())),
                    )
                    .await;
            }

            let mut record = SagaStepRecord::pending(index as i32, step.name());
            self.repo.upsert_step(instance.saga_id, &record).await?;

            let result =
                tokio::time::timeout(self.config.step_timeout, step.execute(&mut ctx)).await;

            match result {
                Ok(Ok(())) => {
                    record.status = StepStatus::Executed;
                    record.executed_at = Some(Utc::now());
                    self.repo.upsert_step(instance.saga_id, &record).await?;

                    instance.current_step = index as i32 + 1;
                    instance.context_data = ctx.to_value();
                    instance.updated_at = Utc::now();
                    self.repo.update_instance(&instance).await?;

                    tracing::debug!(
                        saga_id = %instance.saga_id,
                        step = step.name(),
                        "saga step executed"
                    );
                }
                Ok(Err(e)) => {
                    let message = format!("step {} failed: {e}", step.name());
                    record.status = StepStatus::Failed;
                    record.error = Some(message.clone());
                    self.repo.upsert_step(instance.saga_id, &record).await?;

                    tracing::warn!(
                        saga_id = %instance.saga_id,
                        step = step.name(),
                        error = %e,
                        "saga step failed, compensating"
                    );
                    return self
                        .compensate(definition, instance, ctx, message, Some(e))
                        .await;
                }
                Err(_elapsed) => {
                    let message = format!(
                        "step {} timed out after {:?}",
                        step.name(),
                        self.config.step_timeout
                    );
                    record.status = StepStatus::Failed;
                    record.error = Some(message.clone());
                    self.repo.upsert_step(instance.saga_id, &record).await?;

                    tracing::warn!(
                        saga_id = %instance.saga_id,
                        step = step.name(),
                        "saga step timed out, compensating"
                    );
                    let failure = EngineError::UpstreamTimeout(message.clone());
                    return self
                        .compensate(definition, instance, ctx, message, Some(failure))
                        .await;
                }
            }
        }

        instance.set_status(SagaStatus::Completed)?;
        instance.context_data = ctx.to_value();
        self.repo.update_instance(&instance).await?;

        tracing::info!(saga_id = %instance.saga_id, "saga completed");

        Ok(SagaOutcome {
            saga_id: instance.saga_id,
            status: SagaStatus::Completed,
            context: ctx,
            error: None,
            failure: None,
            compensation_failed: false,
        })
    }

    /// Compensate executed steps in reverse declaration order. Works from
    /// the persisted step rows so the same path serves both a fresh failure
    /// and a crash-recovery resume.
    async fn compensate(
        &self,
        definition: &SagaDefinition,
        mut instance: SagaInstance,
        mut ctx: SagaContext,
        error: String,
        failure: Option<EngineError>,
    ) -> EngineResult<SagaOutcome> {
        if instance.status != SagaStatus::Compensating {
            instance.set_status(SagaStatus::Compensating)?;
        }
        instance.error = Some(error.clone());
        instance.context_data = ctx.to_value();
        self.repo.update_instance(&instance).await?;

        let records = self.repo.list_steps(instance.saga_id).await?;

        let mut compensation_failed = false;
        for record in records
            .iter()
            .rev()
            .filter(|r| r.status == StepStatus::Executed)
        {
            let Some(step) = definition.steps.get(record.step_order as usize) else {
                return Err(EngineError::Internal(format!(
                    "saga {} step {} has no definition",
                    instance.saga_id, record.step_order
                )));
            };

            match self.compensate_step(&instance, step.as_ref(), &mut ctx).await {
                Ok(()) => {
                    let mut updated = record.clone();
                    updated.status = StepStatus::Compensated;
                    updated.compensated_at = Some(Utc::now());
                    self.repo.upsert_step(instance.saga_id, &updated).await?;
                }
                Err(e) => {
                    let mut updated = record.clone();
                    updated.status = StepStatus::Failed;
                    updated.error = Some(format!("compensation failed: {e}"));
                    self.repo.upsert_step(instance.saga_id, &updated).await?;

                    tracing::error!(
                        saga_id = %instance.saga_id,
                        step = step.name(),
                        error = %e,
                        "compensation failed after retries"
                    );
                    compensation_failed = true;
                    break;
                }
            }
        }

        let final_status = if compensation_failed {
            SagaStatus::Failed
        } else {
            SagaStatus::Compensated
        };
        instance.compensation_failed = compensation_failed;
        instance.context_data = ctx.to_value();
        instance.set_status(final_status)?;
        self.repo.update_instance(&instance).await?;

        tracing::info!(
            saga_id = %instance.saga_id,
            status = final_status.as_str(),
            "saga compensation finished"
        );

        Ok(SagaOutcome {
            saga_id: instance.saga_id,
            status: final_status,
            context: ctx,
            error: Some(error),
            failure,
            compensation_failed,
        })
    }

    /// One compensation with fixed-delay retries.
    async fn compensate_step(
        &self,
        instance: &SagaInstance,
        step: &dyn super::SagaStep,
        ctx: &mut SagaContext,
    ) -> EngineResult<()> {
        let max_attempts = self.config.compensation_max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match step.compensate(ctx).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        saga_id = %instance.saga_id,
                        step = step.name(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "compensation attempt failed, retrying"
                    );
                    tokio::time::sleep(self.config.compensation_retry_delay).await;
                }
            }
        }
    }
}
