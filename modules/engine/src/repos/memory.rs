//! In-memory store
//!
//! Backs dev mode (`STORE_TYPE=memory`) and the test suite. One struct
//! implements every repository trait; mutations take a coarse lock per
//! table, which is enough to honor the contracts (atomic claims, optimistic
//! versions, unique keys) for a single process.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use super::{
    IdempotencyRepository, OrderRepository, OutboxRepository, PaymentRepository, RefundRepository,
    RepoError, RepoResult, SagaRepository, WebhookRepository,
};
use crate::domain::{
    Order, OrderId, Payment, PaymentId, Refund, RefundId, RefundStatus, WebhookDelivery,
    WebhookId, WebhookStatus, WebhookSubscription,
};
use crate::idempotency::{AcquireOutcome, StoredResponse};
use crate::outbox::{OutboxEvent, OutboxStatus};
use crate::saga::{SagaInstance, SagaStepRecord, SagaStatus};
use crate::tenant::{TenantContext, TenantId};

#[derive(Debug, Clone)]
struct IdempotencyRow {
    payload_hash: String,
    stored: Option<StoredResponse>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryStore {
    orders: Mutex<HashMap<OrderId, Order>>,
    payments: Mutex<HashMap<PaymentId, Payment>>,
    refunds: Mutex<HashMap<RefundId, Refund>>,
    outbox: Mutex<Vec<OutboxEvent>>,
    outbox_seq: AtomicI64,
    idempotency: Mutex<HashMap<(String, String, String), IdempotencyRow>>,
    sagas: Mutex<HashMap<Uuid, SagaInstance>>,
    saga_steps: Mutex<HashMap<Uuid, BTreeMap<i32, SagaStepRecord>>>,
    deliveries: Mutex<HashMap<WebhookId, WebhookDelivery>>,
    subscriptions: Mutex<HashMap<Uuid, WebhookSubscription>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue_events(&self, events: &[OutboxEvent]) {
        if events.is_empty() {
            return;
        }
        let mut outbox = self.outbox.lock().expect("outbox mutex poisoned");
        for event in events {
            let mut row = event.clone();
            row.seq = self.outbox_seq.fetch_add(1, Ordering::SeqCst) + 1;
            outbox.push(row);
        }
    }

    /// Test/diagnostic view of the outbox, in `seq` order.
    pub fn outbox_rows(&self) -> Vec<OutboxEvent> {
        self.outbox.lock().expect("outbox mutex poisoned").clone()
    }

    /// Test/diagnostic view of one partition's rows, in `seq` order.
    pub fn outbox_rows_for_partition(&self, partition_key: &str) -> Vec<OutboxEvent> {
        self.outbox
            .lock()
            .expect("outbox mutex poisoned")
            .iter()
            .filter(|e| e.partition_key == partition_key)
            .cloned()
            .collect()
    }

    /// Test/diagnostic view of all webhook deliveries.
    pub fn delivery_rows(&self) -> Vec<WebhookDelivery> {
        self.deliveries
            .lock()
            .expect("deliveries mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn create(
        &self,
        ctx: &TenantContext,
        order: &Order,
        events: &[OutboxEvent],
    ) -> RepoResult<()> {
        if !ctx.owns(&order.tenant_id) {
            return Err(RepoError::TenantMissing);
        }
        let mut orders = self.orders.lock().expect("orders mutex poisoned");
        if orders.contains_key(&order.id) {
            return Err(RepoError::Duplicate("order id".to_string()));
        }
        orders.insert(order.id, order.clone());
        drop(orders);

        self.enqueue_events(events);
        Ok(())
    }

    async fn find(&self, ctx: &TenantContext, id: OrderId) -> RepoResult<Option<Order>> {
        let orders = self.orders.lock().expect("orders mutex poisoned");
        Ok(orders
            .get(&id)
            .filter(|o| ctx.owns(&o.tenant_id))
            .cloned())
    }

    async fn save(
        &self,
        ctx: &TenantContext,
        order: &Order,
        expected_version: i64,
        events: &[OutboxEvent],
    ) -> RepoResult<()> {
        let mut orders = self.orders.lock().expect("orders mutex poisoned");
        let existing = orders
            .get(&order.id)
            .filter(|o| ctx.owns(&o.tenant_id))
            .ok_or(RepoError::NotFound)?;
        if existing.version != expected_version {
            return Err(RepoError::Conflict);
        }
        orders.insert(order.id, order.clone());
        drop(orders);

        self.enqueue_events(events);
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn create(
        &self,
        ctx: &TenantContext,
        payment: &Payment,
        events: &[OutboxEvent],
    ) -> RepoResult<()> {
        if !ctx.owns(&payment.tenant_id) {
            return Err(RepoError::TenantMissing);
        }
        let mut payments = self.payments.lock().expect("payments mutex poisoned");
        if payments.values().any(|p| p.order_id == payment.order_id) {
            return Err(RepoError::Duplicate("payment for order".to_string()));
        }
        payments.insert(payment.id, payment.clone());
        drop(payments);

        self.enqueue_events(events);
        Ok(())
    }

    async fn find(&self, ctx: &TenantContext, id: PaymentId) -> RepoResult<Option<Payment>> {
        let payments = self.payments.lock().expect("payments mutex poisoned");
        Ok(payments
            .get(&id)
            .filter(|p| ctx.owns(&p.tenant_id))
            .cloned())
    }

    async fn find_by_order(
        &self,
        ctx: &TenantContext,
        order_id: OrderId,
    ) -> RepoResult<Option<Payment>> {
        let payments = self.payments.lock().expect("payments mutex poisoned");
        Ok(payments
            .values()
            .find(|p| p.order_id == order_id && ctx.owns(&p.tenant_id))
            .cloned())
    }

    async fn save(
        &self,
        ctx: &TenantContext,
        payment: &Payment,
        expected_version: i64,
        events: &[OutboxEvent],
    ) -> RepoResult<()> {
        let mut payments = self.payments.lock().expect("payments mutex poisoned");
        let existing = payments
            .get(&payment.id)
            .filter(|p| ctx.owns(&p.tenant_id))
            .ok_or(RepoError::NotFound)?;
        if existing.version != expected_version {
            return Err(RepoError::Conflict);
        }
        payments.insert(payment.id, payment.clone());
        drop(payments);

        self.enqueue_events(events);
        Ok(())
    }
}

#[async_trait]
impl RefundRepository for InMemoryStore {
    async fn create(
        &self,
        ctx: &TenantContext,
        refund: &Refund,
        events: &[OutboxEvent],
    ) -> RepoResult<()> {
        if !ctx.owns(&refund.tenant_id) {
            return Err(RepoError::TenantMissing);
        }
        let mut refunds = self.refunds.lock().expect("refunds mutex poisoned");
        if refunds.contains_key(&refund.id) {
            return Err(RepoError::Duplicate("refund id".to_string()));
        }
        refunds.insert(refund.id.clone(), refund.clone());
        drop(refunds);

        self.enqueue_events(events);
        Ok(())
    }

    async fn find(&self, ctx: &TenantContext, id: &RefundId) -> RepoResult<Option<Refund>> {
        let refunds = self.refunds.lock().expect("refunds mutex poisoned");
        Ok(refunds
            .get(id)
            .filter(|r| ctx.owns(&r.tenant_id))
            .cloned())
    }

    async fn list_by_payment(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
    ) -> RepoResult<Vec<Refund>> {
        let refunds = self.refunds.lock().expect("refunds mutex poisoned");
        let mut matching: Vec<Refund> = refunds
            .values()
            .filter(|r| r.payment_id == payment_id && ctx.owns(&r.tenant_id))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.requested_at);
        Ok(matching)
    }

    async fn save(
        &self,
        ctx: &TenantContext,
        refund: &Refund,
        events: &[OutboxEvent],
    ) -> RepoResult<()> {
        let mut refunds = self.refunds.lock().expect("refunds mutex poisoned");
        if !refunds
            .get(&refund.id)
            .map(|r| ctx.owns(&r.tenant_id))
            .unwrap_or(false)
        {
            return Err(RepoError::NotFound);
        }
        refunds.insert(refund.id.clone(), refund.clone());
        drop(refunds);

        self.enqueue_events(events);
        Ok(())
    }

    async fn list_requested(&self, limit: i64) -> RepoResult<Vec<Refund>> {
        let refunds = self.refunds.lock().expect("refunds mutex poisoned");
        let mut requested: Vec<Refund> = refunds
            .values()
            .filter(|r| r.status == RefundStatus::Requested)
            .cloned()
            .collect();
        requested.sort_by_key(|r| r.requested_at);
        requested.truncate(limit.max(0) as usize);
        Ok(requested)
    }
}

#[async_trait]
impl OutboxRepository for InMemoryStore {
    async fn claim_batch(
        &self,
        batch_size: i64,
        now: DateTime<Utc>,
    ) -> RepoResult<Vec<OutboxEvent>> {
        let mut outbox = self.outbox.lock().expect("outbox mutex poisoned");
        let mut claimed = Vec::new();

        for row in outbox.iter_mut() {
            if claimed.len() as i64 >= batch_size {
                break;
            }
            if row.status == OutboxStatus::Pending && row.next_attempt_at <= now {
                row.status = OutboxStatus::InFlight;
                row.claimed_at = Some(now);
                claimed.push(row.clone());
            }
        }

        Ok(claimed)
    }

    async fn mark_published(&self, seq: i64) -> RepoResult<()> {
        let mut outbox = self.outbox.lock().expect("outbox mutex poisoned");
        let row = outbox
            .iter_mut()
            .find(|e| e.seq == seq)
            .ok_or(RepoError::NotFound)?;
        row.status = OutboxStatus::Published;
        row.published_at = Some(Utc::now());
        row.claimed_at = None;
        Ok(())
    }

    async fn reset_to_pending(
        &self,
        seq: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut outbox = self.outbox.lock().expect("outbox mutex poisoned");
        let row = outbox
            .iter_mut()
            .find(|e| e.seq == seq)
            .ok_or(RepoError::NotFound)?;
        row.status = OutboxStatus::Pending;
        row.retry_count += 1;
        row.last_error = Some(error.to_string());
        row.next_attempt_at = next_attempt_at;
        row.claimed_at = None;
        Ok(())
    }

    async fn mark_failed(&self, seq: i64, error: &str) -> RepoResult<()> {
        let mut outbox = self.outbox.lock().expect("outbox mutex poisoned");
        let row = outbox
            .iter_mut()
            .find(|e| e.seq == seq)
            .ok_or(RepoError::NotFound)?;
        row.status = OutboxStatus::Failed;
        row.last_error = Some(error.to_string());
        row.claimed_at = None;
        Ok(())
    }

    async fn release_stale_claims(&self, claim_timeout: Duration) -> RepoResult<u64> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(claim_timeout)
                .unwrap_or_else(|_| ChronoDuration::seconds(300));
        let mut outbox = self.outbox.lock().expect("outbox mutex poisoned");
        let mut released = 0;

        for row in outbox.iter_mut() {
            if row.status == OutboxStatus::InFlight
                && row.claimed_at.map(|at| at < cutoff).unwrap_or(true)
            {
                row.status = OutboxStatus::Pending;
                row.claimed_at = None;
                released += 1;
            }
        }

        Ok(released)
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        let mut outbox = self.outbox.lock().expect("outbox mutex poisoned");
        let before = outbox.len();
        outbox.retain(|e| {
            !(e.status == OutboxStatus::Published
                && e.published_at.map(|at| at < cutoff).unwrap_or(false))
        });
        Ok((before - outbox.len()) as u64)
    }
}

#[async_trait]
impl IdempotencyRepository for InMemoryStore {
    async fn try_acquire(
        &self,
        ctx: &TenantContext,
        endpoint: &str,
        key: &str,
        payload_hash: &str,
        ttl: Duration,
    ) -> RepoResult<AcquireOutcome> {
        let now = Utc::now();
        let row_key = (
            ctx.tenant_str().to_string(),
            endpoint.to_string(),
            key.to_string(),
        );

        let mut entries = self.idempotency.lock().expect("idempotency mutex poisoned");

        // Expired entries are treated as absent and dropped here.
        if entries
            .get(&row_key)
            .map(|row| row.expires_at <= now)
            .unwrap_or(false)
        {
            entries.remove(&row_key);
        }

        match entries.get(&row_key) {
            Some(row) => match &row.stored {
                Some(response) if response.payload_hash == payload_hash => {
                    Ok(AcquireOutcome::Hit(response.clone()))
                }
                Some(_) => Ok(AcquireOutcome::Conflict),
                None => Ok(AcquireOutcome::Processing),
            },
            None => {
                let expires_at = now
                    + ChronoDuration::from_std(ttl)
                        .unwrap_or_else(|_| ChronoDuration::hours(24));
                entries.insert(
                    row_key,
                    IdempotencyRow {
                        payload_hash: payload_hash.to_string(),
                        stored: None,
                        expires_at,
                    },
                );
                Ok(AcquireOutcome::Acquired)
            }
        }
    }

    async fn store_response(
        &self,
        ctx: &TenantContext,
        endpoint: &str,
        key: &str,
        response: &StoredResponse,
        ttl: Duration,
    ) -> RepoResult<()> {
        let row_key = (
            ctx.tenant_str().to_string(),
            endpoint.to_string(),
            key.to_string(),
        );
        let expires_at = Utc::now()
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(24));

        let mut entries = self.idempotency.lock().expect("idempotency mutex poisoned");
        entries.insert(
            row_key,
            IdempotencyRow {
                payload_hash: response.payload_hash.clone(),
                stored: Some(response.clone()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn release(&self, ctx: &TenantContext, endpoint: &str, key: &str) -> RepoResult<()> {
        let row_key = (
            ctx.tenant_str().to_string(),
            endpoint.to_string(),
            key.to_string(),
        );
        let mut entries = self.idempotency.lock().expect("idempotency mutex poisoned");
        // Only LOCKED entries are releasable; a stored response stays.
        if entries
            .get(&row_key)
            .map(|row| row.stored.is_none())
            .unwrap_or(false)
        {
            entries.remove(&row_key);
        }
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> RepoResult<u64> {
        let mut entries = self.idempotency.lock().expect("idempotency mutex poisoned");
        let before = entries.len();
        entries.retain(|_, row| row.expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}

#[async_trait]
impl SagaRepository for InMemoryStore {
    async fn create_instance(&self, instance: &SagaInstance) -> RepoResult<()> {
        let mut sagas = self.sagas.lock().expect("sagas mutex poisoned");
        if sagas.values().any(|s| {
            s.tenant_id == instance.tenant_id && s.correlation_id == instance.correlation_id
        }) {
            return Err(RepoError::Duplicate("saga correlation id".to_string()));
        }
        sagas.insert(instance.saga_id, instance.clone());
        Ok(())
    }

    async fn update_instance(&self, instance: &SagaInstance) -> RepoResult<()> {
        let mut sagas = self.sagas.lock().expect("sagas mutex poisoned");
        if !sagas.contains_key(&instance.saga_id) {
            return Err(RepoError::NotFound);
        }
        sagas.insert(instance.saga_id, instance.clone());
        Ok(())
    }

    async fn find_instance(&self, saga_id: Uuid) -> RepoResult<Option<SagaInstance>> {
        let sagas = self.sagas.lock().expect("sagas mutex poisoned");
        Ok(sagas.get(&saga_id).cloned())
    }

    async fn upsert_step(&self, saga_id: Uuid, step: &SagaStepRecord) -> RepoResult<()> {
        let mut steps = self.saga_steps.lock().expect("saga steps mutex poisoned");
        steps
            .entry(saga_id)
            .or_default()
            .insert(step.step_order, step.clone());
        Ok(())
    }

    async fn list_steps(&self, saga_id: Uuid) -> RepoResult<Vec<SagaStepRecord>> {
        let steps = self.saga_steps.lock().expect("saga steps mutex poisoned");
        Ok(steps
            .get(&saga_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn acquire_lease(
        &self,
        saga_id: Uuid,
        owner: &str,
        until: DateTime<Utc>,
    ) -> RepoResult<bool> {
        let mut sagas = self.sagas.lock().expect("sagas mutex poisoned");
        let instance = sagas.get_mut(&saga_id).ok_or(RepoError::NotFound)?;

        let now = Utc::now();
        let lease_free = match (&instance.lease_owner, instance.leased_until) {
            (None, _) => true,
            (Some(current), _) if current == owner => true,
            (Some(_), Some(leased_until)) => leased_until < now,
            (Some(_), None) => true,
        };

        if lease_free {
            instance.lease_owner = Some(owner.to_string());
            instance.leased_until = Some(until);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn release_lease(&self, saga_id: Uuid, owner: &str) -> RepoResult<()> {
        let mut sagas = self.sagas.lock().expect("sagas mutex poisoned");
        if let Some(instance) = sagas.get_mut(&saga_id) {
            if instance.lease_owner.as_deref() == Some(owner) {
                instance.lease_owner = None;
                instance.leased_until = None;
            }
        }
        Ok(())
    }

    async fn list_stalled(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<SagaInstance>> {
        let sagas = self.sagas.lock().expect("sagas mutex poisoned");
        let mut stalled: Vec<SagaInstance> = sagas
            .values()
            .filter(|s| {
                matches!(
                    s.status,
                    SagaStatus::Processing | SagaStatus::Compensating
                ) && s.updated_at < stale_before
            })
            .cloned()
            .collect();
        stalled.sort_by_key(|s| s.updated_at);
        stalled.truncate(limit.max(0) as usize);
        Ok(stalled)
    }
}

#[async_trait]
impl WebhookRepository for InMemoryStore {
    async fn create_delivery(&self, delivery: &WebhookDelivery) -> RepoResult<()> {
        let mut deliveries = self.deliveries.lock().expect("deliveries mutex poisoned");
        if deliveries.values().any(|d| {
            d.event_id == delivery.event_id && d.subscription_id == delivery.subscription_id
        }) {
            return Err(RepoError::Duplicate(
                "delivery for event and subscription".to_string(),
            ));
        }
        deliveries.insert(delivery.id.clone(), delivery.clone());
        Ok(())
    }

    async fn find_delivery(&self, id: &WebhookId) -> RepoResult<Option<WebhookDelivery>> {
        let deliveries = self.deliveries.lock().expect("deliveries mutex poisoned");
        Ok(deliveries.get(id).cloned())
    }

    async fn save_delivery(&self, delivery: &WebhookDelivery) -> RepoResult<()> {
        let mut deliveries = self.deliveries.lock().expect("deliveries mutex poisoned");
        if !deliveries.contains_key(&delivery.id) {
            return Err(RepoError::NotFound);
        }
        deliveries.insert(delivery.id.clone(), delivery.clone());
        Ok(())
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<WebhookDelivery>> {
        let deliveries = self.deliveries.lock().expect("deliveries mutex poisoned");
        let mut due: Vec<WebhookDelivery> = deliveries
            .values()
            .filter(|d| {
                d.status == WebhookStatus::Retrying
                    && d.next_retry_at.map(|at| at <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|d| d.next_retry_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn create_subscription(&self, subscription: &WebhookSubscription) -> RepoResult<()> {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .expect("subscriptions mutex poisoned");
        if subscriptions.contains_key(&subscription.id) {
            return Err(RepoError::Duplicate("subscription id".to_string()));
        }
        subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn find_subscription(&self, id: Uuid) -> RepoResult<Option<WebhookSubscription>> {
        let subscriptions = self
            .subscriptions
            .lock()
            .expect("subscriptions mutex poisoned");
        Ok(subscriptions.get(&id).cloned())
    }

    async fn list_subscriptions(&self, tenant: &TenantId) -> RepoResult<Vec<WebhookSubscription>> {
        let subscriptions = self
            .subscriptions
            .lock()
            .expect("subscriptions mutex poisoned");
        Ok(subscriptions
            .values()
            .filter(|s| &s.tenant_id == tenant && s.active)
            .cloned()
            .collect())
    }
}
