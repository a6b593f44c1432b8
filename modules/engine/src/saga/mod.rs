//! Saga orchestration
//!
//! A saga is a finite ordered list of steps, each with an `execute` and a
//! `compensate` action, driven against a persisted [`SagaInstance`] with
//! per-step rows. On a step failure the orchestrator compensates previously
//! executed steps in reverse order; on a crash the recovery sweep resumes
//! the instance from its persisted context under a lease.

pub mod orchestrator;
pub mod payment_saga;
pub mod recovery;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::tenant::{TenantContext, TenantId};

pub use orchestrator::{SagaOrchestrator, SagaOutcome};
pub use recovery::SagaRecovery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    Started,
    Processing,
    Completed,
    Compensating,
    Compensated,
    Failed,
}

impl SagaStatus {
    pub const fn can_transition(self, next: SagaStatus) -> bool {
        use SagaStatus::*;
        matches!(
            (self, next),
            (Started, Processing)
                | (Processing, Completed)
                | (Processing, Compensating)
                | (Compensating, Compensated)
                | (Compensating, Failed)
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Compensated | SagaStatus::Failed
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            SagaStatus::Started => "STARTED",
            SagaStatus::Processing => "PROCESSING",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Compensated => "COMPENSATED",
            SagaStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Executed,
    Compensated,
    Failed,
}

impl StepStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Executed => "EXECUTED",
            StepStatus::Compensated => "COMPENSATED",
            StepStatus::Failed => "FAILED",
        }
    }
}

/// Persisted saga state. `(tenant_id, correlation_id)` is unique, so a
/// retried command resumes (or observes) the same saga instead of starting a
/// second one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaInstance {
    pub saga_id: Uuid,
    pub saga_type: String,
    pub correlation_id: String,
    pub tenant_id: TenantId,
    pub status: SagaStatus,
    /// Index of the next step to execute.
    pub current_step: i32,
    /// JSON-serialized [`SagaContext`] data, refreshed after every step.
    pub context_data: JsonValue,
    pub error: Option<String>,
    pub compensation_failed: bool,
    pub lease_owner: Option<String>,
    pub leased_until: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SagaInstance {
    pub fn new(saga_type: &str, ctx: &SagaContext) -> Self {
        let now = Utc::now();
        Self {
            saga_id: Uuid::new_v4(),
            saga_type: saga_type.to_string(),
            correlation_id: ctx.correlation_id.clone(),
            tenant_id: ctx.tenant.tenant_id.clone(),
            status: SagaStatus::Started,
            current_step: 0,
            context_data: ctx.to_value(),
            error: None,
            compensation_failed: false,
            lease_owner: None,
            leased_until: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn set_status(&mut self, next: SagaStatus) -> EngineResult<()> {
        if !self.status.can_transition(next) {
            return Err(EngineError::Internal(format!(
                "saga {}: illegal transition {} -> {}",
                self.saga_id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }
}

/// Per-step progress row, keyed by `(saga_id, step_order)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStepRecord {
    pub step_order: i32,
    pub name: String,
    pub status: StepStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub compensated_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SagaStepRecord {
    pub fn pending(step_order: i32, name: &str) -> Self {
        Self {
            step_order,
            name: name.to_string(),
            status: StepStatus::Pending,
            executed_at: None,
            compensated_at: None,
            error: None,
        }
    }
}

/// Mutable, JSON-serializable state shared by a saga's steps.
///
/// Everything steps put here must survive a
/// serialize/deserialize round-trip: recovery rebuilds the context from
/// `SagaInstance::context_data` after a crash.
#[derive(Debug, Clone)]
pub struct SagaContext {
    pub tenant: TenantContext,
    pub correlation_id: String,
    data: JsonMap<String, JsonValue>,
}

impl SagaContext {
    pub fn new(tenant: TenantContext, correlation_id: impl Into<String>) -> Self {
        Self {
            tenant,
            correlation_id: correlation_id.into(),
            data: JsonMap::new(),
        }
    }

    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) -> EngineResult<()> {
        let json = serde_json::to_value(value)?;
        self.data.insert(key.to_string(), json);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> EngineResult<Option<T>> {
        match self.data.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Like [`get`](Self::get) but treats absence as an internal error;
    /// used for keys a previous step is contracted to have set.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> EngineResult<T> {
        self.get(key)?
            .ok_or_else(|| EngineError::Internal(format!("saga context missing key `{key}`")))
    }

    pub fn to_value(&self) -> JsonValue {
        JsonValue::Object(self.data.clone())
    }

    pub fn from_value(
        tenant: TenantContext,
        correlation_id: impl Into<String>,
        value: JsonValue,
    ) -> EngineResult<Self> {
        let data = match value {
            JsonValue::Object(map) => map,
            JsonValue::Null => JsonMap::new(),
            other => {
                return Err(EngineError::Internal(format!(
                    "saga context is not an object: {other}"
                )))
            }
        };
        Ok(Self {
            tenant,
            correlation_id: correlation_id.into(),
            data,
        })
    }
}

/// One step of a saga. Implementations must be safe to re-execute and to
/// re-compensate: recovery may replay either after a crash.
#[async_trait]
pub trait SagaStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut SagaContext) -> EngineResult<()>;

    async fn compensate(&self, ctx: &mut SagaContext) -> EngineResult<()>;
}

/// An ordered list of steps under a saga type name.
#[derive(Clone)]
pub struct SagaDefinition {
    pub saga_type: &'static str,
    pub steps: Vec<Arc<dyn SagaStep>>,
}

impl SagaDefinition {
    pub fn new(saga_type: &'static str, steps: Vec<Arc<dyn SagaStep>>) -> Self {
        Self { saga_type, steps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_machine() {
        use SagaStatus::*;
        assert!(Started.can_transition(Processing));
        assert!(Processing.can_transition(Completed));
        assert!(Processing.can_transition(Compensating));
        assert!(Compensating.can_transition(Compensated));
        assert!(Compensating.can_transition(Failed));

        assert!(!Completed.can_transition(Compensating));
        assert!(!Started.can_transition(Completed));
        assert!(Completed.is_terminal());
        assert!(Compensated.is_terminal());
        assert!(Failed.is_terminal());
    }

    #[test]
    fn test_context_round_trip() {
        let tenant = TenantContext::from_header("tenant-a").unwrap();
        let mut ctx = SagaContext::new(tenant.clone(), "corr-1");
        ctx.put("amount", &12_000i64).unwrap();
        ctx.put("order_id", &"o-1".to_string()).unwrap();

        let value = ctx.to_value();
        let restored = SagaContext::from_value(tenant, "corr-1", value).unwrap();
        assert_eq!(restored.get::<i64>("amount").unwrap(), Some(12_000));
        assert_eq!(
            restored.require::<String>("order_id").unwrap(),
            "o-1".to_string()
        );
        assert!(restored.require::<String>("missing").is_err());
    }
}
