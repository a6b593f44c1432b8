//! Repository contracts
//!
//! Abstract persistence for the engine. Two adapters exist: an in-memory
//! store backing dev mode and the test suite, and a Postgres store built on
//! sqlx. Both uphold the same contract:
//!
//! - every read is tenant-scoped — rows of another tenant are reported as
//!   missing, never returned;
//! - every mutating method takes the outbox rows to enqueue and persists
//!   them atomically with the aggregate change (the transactional-outbox
//!   invariant is part of the contract, not a convention);
//! - optimistic saves compare the caller's `expected_version` and fail with
//!   [`RepoError::Conflict`] when the row has moved.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    Order, OrderId, Payment, PaymentId, Refund, RefundId, WebhookDelivery, WebhookId,
    WebhookSubscription,
};
use crate::idempotency::{AcquireOutcome, StoredResponse};
use crate::outbox::OutboxEvent;
use crate::saga::{SagaInstance, SagaStepRecord};
use crate::tenant::{TenantContext, TenantId};

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RepoError {
    #[error("row not found")]
    NotFound,

    /// Optimistic-lock failure: the row's version moved between read and write.
    #[error("version conflict")]
    Conflict,

    /// Unique-constraint violation; the payload names the constraint.
    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("tenant missing")]
    TenantMissing,

    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist a new order and its events atomically.
    async fn create(
        &self,
        ctx: &TenantContext,
        order: &Order,
        events: &[OutboxEvent],
    ) -> RepoResult<()>;

    async fn find(&self, ctx: &TenantContext, id: OrderId) -> RepoResult<Option<Order>>;

    /// Save an updated order, bumping its version; `expected_version` is the
    /// version the caller read.
    async fn save(
        &self,
        ctx: &TenantContext,
        order: &Order,
        expected_version: i64,
        events: &[OutboxEvent],
    ) -> RepoResult<()>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Persist a new payment and its events atomically. Fails with
    /// [`RepoError::Duplicate`] when the order already has a payment.
    async fn create(
        &self,
        ctx: &TenantContext,
        payment: &Payment,
        events: &[OutboxEvent],
    ) -> RepoResult<()>;

    async fn find(&self, ctx: &TenantContext, id: PaymentId) -> RepoResult<Option<Payment>>;

    async fn find_by_order(
        &self,
        ctx: &TenantContext,
        order_id: OrderId,
    ) -> RepoResult<Option<Payment>>;

    async fn save(
        &self,
        ctx: &TenantContext,
        payment: &Payment,
        expected_version: i64,
        events: &[OutboxEvent],
    ) -> RepoResult<()>;
}

#[async_trait]
pub trait RefundRepository: Send + Sync {
    async fn create(
        &self,
        ctx: &TenantContext,
        refund: &Refund,
        events: &[OutboxEvent],
    ) -> RepoResult<()>;

    async fn find(&self, ctx: &TenantContext, id: &RefundId) -> RepoResult<Option<Refund>>;

    async fn list_by_payment(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
    ) -> RepoResult<Vec<Refund>>;

    async fn save(
        &self,
        ctx: &TenantContext,
        refund: &Refund,
        events: &[OutboxEvent],
    ) -> RepoResult<()>;

    /// REQUESTED refunds across all tenants, oldest first, for the
    /// background processor. Each row carries its own tenant.
    async fn list_requested(&self, limit: i64) -> RepoResult<Vec<Refund>>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Atomically claim up to `batch_size` due PENDING rows: mark them
    /// IN_FLIGHT and return them in `seq` order. Two concurrent publishers
    /// never receive the same row.
    async fn claim_batch(&self, batch_size: i64, now: DateTime<Utc>)
        -> RepoResult<Vec<OutboxEvent>>;

    async fn mark_published(&self, seq: i64) -> RepoResult<()>;

    /// Return a claimed row to PENDING with an incremented retry count; it
    /// becomes claimable again at `next_attempt_at`.
    async fn reset_to_pending(
        &self,
        seq: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> RepoResult<()>;

    /// Poison a row after retries are exhausted.
    async fn mark_failed(&self, seq: i64, error: &str) -> RepoResult<()>;

    /// Sweep IN_FLIGHT rows claimed longer than `claim_timeout` ago back to
    /// PENDING (crashed publisher recovery).
    async fn release_stale_claims(&self, claim_timeout: Duration) -> RepoResult<u64>;

    /// Delete PUBLISHED rows older than the cutoff.
    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64>;
}

#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    /// Atomic insert-or-inspect for `(tenant, endpoint, key)`:
    /// - no live entry → insert LOCKED, return `Acquired`;
    /// - STORED entry, same payload hash → `Hit` with the saved response;
    /// - STORED entry, different hash → `Conflict`;
    /// - unexpired LOCKED entry → `Processing`.
    ///
    /// Expired entries are treated as absent and removed.
    async fn try_acquire(
        &self,
        ctx: &TenantContext,
        endpoint: &str,
        key: &str,
        payload_hash: &str,
        ttl: Duration,
    ) -> RepoResult<AcquireOutcome>;

    /// Promote the LOCKED entry to STORED with the serialized response.
    async fn store_response(
        &self,
        ctx: &TenantContext,
        endpoint: &str,
        key: &str,
        response: &StoredResponse,
        ttl: Duration,
    ) -> RepoResult<()>;

    /// Drop a LOCKED entry so a retry can run after a processing error.
    async fn release(&self, ctx: &TenantContext, endpoint: &str, key: &str) -> RepoResult<()>;

    /// Delete entries past their expiry.
    async fn purge_expired(&self, now: DateTime<Utc>) -> RepoResult<u64>;
}

#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Fails with [`RepoError::Duplicate`] when `(tenant, correlation_id)`
    /// already exists.
    async fn create_instance(&self, instance: &SagaInstance) -> RepoResult<()>;

    async fn update_instance(&self, instance: &SagaInstance) -> RepoResult<()>;

    async fn find_instance(&self, saga_id: Uuid) -> RepoResult<Option<SagaInstance>>;

    /// Insert or update the step row keyed by `(saga_id, step_order)`.
    async fn upsert_step(&self, saga_id: Uuid, step: &SagaStepRecord) -> RepoResult<()>;

    async fn list_steps(&self, saga_id: Uuid) -> RepoResult<Vec<SagaStepRecord>>;

    /// Take the recovery lease when it is free or expired. Returns whether
    /// this owner now holds it.
    async fn acquire_lease(
        &self,
        saga_id: Uuid,
        owner: &str,
        until: DateTime<Utc>,
    ) -> RepoResult<bool>;

    async fn release_lease(&self, saga_id: Uuid, owner: &str) -> RepoResult<()>;

    /// Non-terminal instances whose `updated_at` is older than `stale_before`.
    async fn list_stalled(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<SagaInstance>>;
}

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn create_delivery(&self, delivery: &WebhookDelivery) -> RepoResult<()>;

    async fn find_delivery(&self, id: &WebhookId) -> RepoResult<Option<WebhookDelivery>>;

    async fn save_delivery(&self, delivery: &WebhookDelivery) -> RepoResult<()>;

    /// RETRYING deliveries whose `next_retry_at` has passed, oldest first.
    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<WebhookDelivery>>;

    async fn create_subscription(&self, subscription: &WebhookSubscription) -> RepoResult<()>;

    async fn find_subscription(&self, id: Uuid) -> RepoResult<Option<WebhookSubscription>>;

    /// Active subscriptions for a tenant.
    async fn list_subscriptions(&self, tenant: &TenantId) -> RepoResult<Vec<WebhookSubscription>>;
}
