//! Postgres store
//!
//! sqlx adapter implementing every repository trait. Mutations run inside a
//! transaction that first binds the tenant as the `app.tenant_id` session
//! variable (row-level security backstop) and that carries the outbox
//! inserts, so an aggregate change and its events commit or roll back
//! together.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use uuid::Uuid;

use super::{
    IdempotencyRepository, OrderRepository, OutboxRepository, PaymentRepository, RefundRepository,
    RepoError, RepoResult, SagaRepository, WebhookRepository,
};
use crate::domain::{
    Currency, LineItem, Money, Order, OrderId, OrderStatus, Payment, PaymentId, PaymentMethod,
    PaymentStatus, Refund, RefundId, RefundStatus, WebhookDelivery, WebhookId, WebhookStatus,
    WebhookSubscription,
};
use crate::idempotency::{AcquireOutcome, StoredResponse};
use crate::outbox::{OutboxEvent, OutboxStatus};
use crate::saga::{SagaInstance, SagaStatus, SagaStepRecord, StepStatus};
use crate::tenant::{TenantContext, TenantId};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a transaction with the tenant bound as a session variable so
    /// row-level security policies apply to every statement in it.
    async fn begin_tenant_tx(
        &self,
        ctx: &TenantContext,
    ) -> RepoResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("SELECT set_config('app.tenant_id', $1, true)")
            .bind(ctx.tenant_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        Ok(tx)
    }

    async fn enqueue_events_tx(
        tx: &mut Transaction<'static, Postgres>,
        events: &[OutboxEvent],
    ) -> RepoResult<()> {
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO outbox_events
                    (tenant_id, aggregate_type, aggregate_id, partition_key, event_type,
                     event_id, payload, status, retry_count, created_at, next_attempt_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING', 0, $8, $9)
                "#,
            )
            .bind(event.tenant_id.as_str())
            .bind(&event.aggregate_type)
            .bind(&event.aggregate_id)
            .bind(&event.partition_key)
            .bind(&event.event_type)
            .bind(event.event_id)
            .bind(&event.payload)
            .bind(event.created_at)
            .bind(event.next_attempt_at)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx)?;
        }
        Ok(())
    }
}

fn map_sqlx(e: sqlx::Error) -> RepoError {
    match &e {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepoError::Duplicate(db.constraint().unwrap_or("unique constraint").to_string())
        }
        _ => RepoError::Storage(e.to_string()),
    }
}

fn storage(msg: impl std::fmt::Display) -> RepoError {
    RepoError::Storage(msg.to_string())
}

fn money_from(amount: rust_decimal::Decimal, currency: &str) -> RepoResult<Money> {
    let currency = Currency::parse(currency).map_err(storage)?;
    Money::new(currency, amount).map_err(storage)
}

fn tenant_from(raw: &str) -> RepoResult<TenantId> {
    TenantId::new(raw).map_err(storage)
}

fn order_status_from(raw: &str) -> RepoResult<OrderStatus> {
    match raw {
        "PENDING" => Ok(OrderStatus::Pending),
        "PAID" => Ok(OrderStatus::Paid),
        "COMPLETED" => Ok(OrderStatus::Completed),
        "CANCELLED" => Ok(OrderStatus::Cancelled),
        "FAILED" => Ok(OrderStatus::Failed),
        other => Err(storage(format!("unknown order status {other}"))),
    }
}

fn payment_status_from(raw: &str) -> RepoResult<PaymentStatus> {
    match raw {
        "READY" => Ok(PaymentStatus::Ready),
        "PROCESSING" => Ok(PaymentStatus::Processing),
        "APPROVED" => Ok(PaymentStatus::Approved),
        "CONFIRMED" => Ok(PaymentStatus::Confirmed),
        "FAILED" => Ok(PaymentStatus::Failed),
        "REFUNDED" => Ok(PaymentStatus::Refunded),
        other => Err(storage(format!("unknown payment status {other}"))),
    }
}

fn payment_method_from(raw: &str) -> RepoResult<PaymentMethod> {
    match raw {
        "CARD" => Ok(PaymentMethod::Card),
        "VIRTUAL_ACCOUNT" => Ok(PaymentMethod::VirtualAccount),
        "TRANSFER" => Ok(PaymentMethod::Transfer),
        "MOBILE" => Ok(PaymentMethod::Mobile),
        other => Err(storage(format!("unknown payment method {other}"))),
    }
}

fn refund_status_from(raw: &str) -> RepoResult<RefundStatus> {
    match raw {
        "REQUESTED" => Ok(RefundStatus::Requested),
        "PROCESSING" => Ok(RefundStatus::Processing),
        "COMPLETED" => Ok(RefundStatus::Completed),
        "FAILED" => Ok(RefundStatus::Failed),
        other => Err(storage(format!("unknown refund status {other}"))),
    }
}

fn outbox_status_from(raw: &str) -> RepoResult<OutboxStatus> {
    match raw {
        "PENDING" => Ok(OutboxStatus::Pending),
        "IN_FLIGHT" => Ok(OutboxStatus::InFlight),
        "PUBLISHED" => Ok(OutboxStatus::Published),
        "FAILED" => Ok(OutboxStatus::Failed),
        other => Err(storage(format!("unknown outbox status {other}"))),
    }
}

fn saga_status_from(raw: &str) -> RepoResult<SagaStatus> {
    match raw {
        "STARTED" => Ok(SagaStatus::Started),
        "PROCESSING" => Ok(SagaStatus::Processing),
        "COMPLETED" => Ok(SagaStatus::Completed),
        "COMPENSATING" => Ok(SagaStatus::Compensating),
        "COMPENSATED" => Ok(SagaStatus::Compensated),
        "FAILED" => Ok(SagaStatus::Failed),
        other => Err(storage(format!("unknown saga status {other}"))),
    }
}

fn step_status_from(raw: &str) -> RepoResult<StepStatus> {
    match raw {
        "PENDING" => Ok(StepStatus::Pending),
        "EXECUTED" => Ok(StepStatus::Executed),
        "COMPENSATED" => Ok(StepStatus::Compensated),
        "FAILED" => Ok(StepStatus::Failed),
        other => Err(storage(format!("unknown step status {other}"))),
    }
}

fn webhook_status_from(raw: &str) -> RepoResult<WebhookStatus> {
    match raw {
        "PENDING" => Ok(WebhookStatus::Pending),
        "SENDING" => Ok(WebhookStatus::Sending),
        "DELIVERED" => Ok(WebhookStatus::Delivered),
        "RETRYING" => Ok(WebhookStatus::Retrying),
        "FAILED" => Ok(WebhookStatus::Failed),
        other => Err(storage(format!("unknown webhook status {other}"))),
    }
}

fn order_from_row(row: &PgRow, line_items: Vec<LineItem>) -> RepoResult<Order> {
    let currency_raw: String = row.try_get("currency").map_err(map_sqlx)?;
    let amount: rust_decimal::Decimal = row.try_get("total_amount").map_err(map_sqlx)?;
    let status_raw: String = row.try_get("status").map_err(map_sqlx)?;
    let tenant_raw: String = row.try_get("tenant_id").map_err(map_sqlx)?;

    Ok(Order {
        id: OrderId(row.try_get::<Uuid, _>("id").map_err(map_sqlx)?),
        tenant_id: tenant_from(&tenant_raw)?,
        user_id: row.try_get("user_id").map_err(map_sqlx)?,
        line_items,
        total_amount: money_from(amount, &currency_raw)?,
        currency: Currency::parse(&currency_raw).map_err(storage)?,
        status: order_status_from(&status_raw)?,
        metadata: row.try_get("metadata").map_err(map_sqlx)?,
        version: row.try_get("version").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx)?,
        paid_at: row.try_get("paid_at").map_err(map_sqlx)?,
        completed_at: row.try_get("completed_at").map_err(map_sqlx)?,
    })
}

fn payment_from_row(row: &PgRow) -> RepoResult<Payment> {
    let currency_raw: String = row.try_get("currency").map_err(map_sqlx)?;
    let amount: rust_decimal::Decimal = row.try_get("amount").map_err(map_sqlx)?;
    let status_raw: String = row.try_get("status").map_err(map_sqlx)?;
    let tenant_raw: String = row.try_get("tenant_id").map_err(map_sqlx)?;
    let method_raw: Option<String> = row.try_get("method").map_err(map_sqlx)?;

    Ok(Payment {
        id: PaymentId(row.try_get::<Uuid, _>("id").map_err(map_sqlx)?),
        tenant_id: tenant_from(&tenant_raw)?,
        order_id: OrderId(row.try_get::<Uuid, _>("order_id").map_err(map_sqlx)?),
        amount: money_from(amount, &currency_raw)?,
        status: payment_status_from(&status_raw)?,
        method: method_raw.as_deref().map(payment_method_from).transpose()?,
        pg_transaction_id: row.try_get("pg_transaction_id").map_err(map_sqlx)?,
        pg_payment_key: row.try_get("pg_payment_key").map_err(map_sqlx)?,
        failure_reason: row.try_get("failure_reason").map_err(map_sqlx)?,
        version: row.try_get("version").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx)?,
        approved_at: row.try_get("approved_at").map_err(map_sqlx)?,
        confirmed_at: row.try_get("confirmed_at").map_err(map_sqlx)?,
        failed_at: row.try_get("failed_at").map_err(map_sqlx)?,
    })
}

fn refund_from_row(row: &PgRow) -> RepoResult<Refund> {
    let currency_raw: String = row.try_get("currency").map_err(map_sqlx)?;
    let amount: rust_decimal::Decimal = row.try_get("amount").map_err(map_sqlx)?;
    let status_raw: String = row.try_get("status").map_err(map_sqlx)?;
    let tenant_raw: String = row.try_get("tenant_id").map_err(map_sqlx)?;
    let id_raw: String = row.try_get("id").map_err(map_sqlx)?;

    Ok(Refund {
        id: RefundId::parse(&id_raw).map_err(storage)?,
        tenant_id: tenant_from(&tenant_raw)?,
        payment_id: PaymentId(row.try_get::<Uuid, _>("payment_id").map_err(map_sqlx)?),
        amount: money_from(amount, &currency_raw)?,
        reason: row.try_get("reason").map_err(map_sqlx)?,
        status: refund_status_from(&status_raw)?,
        pg_refund_id: row.try_get("pg_refund_id").map_err(map_sqlx)?,
        error_message: row.try_get("error_message").map_err(map_sqlx)?,
        requested_at: row.try_get("requested_at").map_err(map_sqlx)?,
        completed_at: row.try_get("completed_at").map_err(map_sqlx)?,
    })
}

fn outbox_from_row(row: &PgRow) -> RepoResult<OutboxEvent> {
    let status_raw: String = row.try_get("status").map_err(map_sqlx)?;
    let tenant_raw: String = row.try_get("tenant_id").map_err(map_sqlx)?;

    Ok(OutboxEvent {
        seq: row.try_get("seq").map_err(map_sqlx)?,
        tenant_id: tenant_from(&tenant_raw)?,
        aggregate_type: row.try_get("aggregate_type").map_err(map_sqlx)?,
        aggregate_id: row.try_get("aggregate_id").map_err(map_sqlx)?,
        partition_key: row.try_get("partition_key").map_err(map_sqlx)?,
        event_type: row.try_get("event_type").map_err(map_sqlx)?,
        event_id: row.try_get("event_id").map_err(map_sqlx)?,
        payload: row.try_get("payload").map_err(map_sqlx)?,
        status: outbox_status_from(&status_raw)?,
        retry_count: row.try_get("retry_count").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(map_sqlx)?,
        claimed_at: row.try_get("claimed_at").map_err(map_sqlx)?,
        published_at: row.try_get("published_at").map_err(map_sqlx)?,
        last_error: row.try_get("last_error").map_err(map_sqlx)?,
    })
}

fn saga_from_row(row: &PgRow) -> RepoResult<SagaInstance> {
    let status_raw: String = row.try_get("status").map_err(map_sqlx)?;
    let tenant_raw: String = row.try_get("tenant_id").map_err(map_sqlx)?;

    Ok(SagaInstance {
        saga_id: row.try_get("saga_id").map_err(map_sqlx)?,
        saga_type: row.try_get("saga_type").map_err(map_sqlx)?,
        correlation_id: row.try_get("correlation_id").map_err(map_sqlx)?,
        tenant_id: tenant_from(&tenant_raw)?,
        status: saga_status_from(&status_raw)?,
        current_step: row.try_get("current_step").map_err(map_sqlx)?,
        context_data: row.try_get("context_data").map_err(map_sqlx)?,
        error: row.try_get("error").map_err(map_sqlx)?,
        compensation_failed: row.try_get("compensation_failed").map_err(map_sqlx)?,
        lease_owner: row.try_get("lease_owner").map_err(map_sqlx)?,
        leased_until: row.try_get("leased_until").map_err(map_sqlx)?,
        started_at: row.try_get("started_at").map_err(map_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx)?,
        completed_at: row.try_get("completed_at").map_err(map_sqlx)?,
    })
}

fn step_from_row(row: &PgRow) -> RepoResult<SagaStepRecord> {
    let status_raw: String = row.try_get("status").map_err(map_sqlx)?;

    Ok(SagaStepRecord {
        step_order: row.try_get("step_order").map_err(map_sqlx)?,
        name: row.try_get("name").map_err(map_sqlx)?,
        status: step_status_from(&status_raw)?,
        executed_at: row.try_get("executed_at").map_err(map_sqlx)?,
        compensated_at: row.try_get("compensated_at").map_err(map_sqlx)?,
        error: row.try_get("error").map_err(map_sqlx)?,
    })
}

fn delivery_from_row(row: &PgRow) -> RepoResult<WebhookDelivery> {
    let status_raw: String = row.try_get("status").map_err(map_sqlx)?;
    let tenant_raw: String = row.try_get("tenant_id").map_err(map_sqlx)?;
    let id_raw: String = row.try_get("id").map_err(map_sqlx)?;

    Ok(WebhookDelivery {
        id: WebhookId::parse(&id_raw).map_err(storage)?,
        tenant_id: tenant_from(&tenant_raw)?,
        subscription_id: row.try_get("subscription_id").map_err(map_sqlx)?,
        event_id: row.try_get("event_id").map_err(map_sqlx)?,
        event_type: row.try_get("event_type").map_err(map_sqlx)?,
        payload: row.try_get("payload").map_err(map_sqlx)?,
        target_url: row.try_get("target_url").map_err(map_sqlx)?,
        status: webhook_status_from(&status_raw)?,
        retry_count: row.try_get("retry_count").map_err(map_sqlx)?,
        max_retries: row.try_get("max_retries").map_err(map_sqlx)?,
        last_attempt_at: row.try_get("last_attempt_at").map_err(map_sqlx)?,
        next_retry_at: row.try_get("next_retry_at").map_err(map_sqlx)?,
        last_error: row.try_get("last_error").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        delivered_at: row.try_get("delivered_at").map_err(map_sqlx)?,
    })
}

fn subscription_from_row(row: &PgRow) -> RepoResult<WebhookSubscription> {
    let tenant_raw: String = row.try_get("tenant_id").map_err(map_sqlx)?;

    Ok(WebhookSubscription {
        id: row.try_get("id").map_err(map_sqlx)?,
        tenant_id: tenant_from(&tenant_raw)?,
        url: row.try_get("url").map_err(map_sqlx)?,
        secret: row.try_get("secret").map_err(map_sqlx)?,
        event_types: row.try_get("event_types").map_err(map_sqlx)?,
        active: row.try_get("active").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
    })
}

const ORDER_COLUMNS: &str = "id, tenant_id, user_id, total_amount, currency, status, metadata, \
                             version, created_at, updated_at, paid_at, completed_at";
const PAYMENT_COLUMNS: &str = "id, tenant_id, order_id, amount, currency, status, method, \
                               pg_transaction_id, pg_payment_key, failure_reason, version, \
                               created_at, updated_at, approved_at, confirmed_at, failed_at";
const REFUND_COLUMNS: &str = "id, tenant_id, payment_id, amount, currency, reason, status, \
                              pg_refund_id, error_message, requested_at, completed_at";
const OUTBOX_COLUMNS: &str = "seq, tenant_id, aggregate_type, aggregate_id, partition_key, \
                              event_type, event_id, payload, status, retry_count, created_at, \
                              next_attempt_at, claimed_at, published_at, last_error";
const SAGA_COLUMNS: &str = "saga_id, saga_type, correlation_id, tenant_id, status, current_step, \
                            context_data, error, compensation_failed, lease_owner, leased_until, \
                            started_at, updated_at, completed_at";
const WEBHOOK_COLUMNS: &str = "id, tenant_id, subscription_id, event_id, event_type, payload, \
                               target_url, status, retry_count, max_retries, last_attempt_at, \
                               next_retry_at, last_error, created_at, delivered_at";

#[async_trait]
impl OrderRepository for PostgresStore {
    async fn create(
        &self,
        ctx: &TenantContext,
        order: &Order,
        events: &[OutboxEvent],
    ) -> RepoResult<()> {
        if !ctx.owns(&order.tenant_id) {
            return Err(RepoError::TenantMissing);
        }
        let mut tx = self.begin_tenant_tx(ctx).await?;

        sqlx::query(
            r#"
            INSERT INTO orders
                (id, tenant_id, user_id, total_amount, currency, status, metadata,
                 version, created_at, updated_at, paid_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.tenant_id.as_str())
        .bind(&order.user_id)
        .bind(order.total_amount.amount())
        .bind(order.currency.as_str())
        .bind(order.status.as_str())
        .bind(&order.metadata)
        .bind(order.version)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.paid_at)
        .bind(order.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        for (position, item) in order.line_items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_line_items
                    (order_id, tenant_id, position, name, unit_price, quantity)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(order.tenant_id.as_str())
            .bind(position as i32)
            .bind(&item.name)
            .bind(item.unit_price.amount())
            .bind(item.quantity)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        Self::enqueue_events_tx(&mut tx, events).await?;
        tx.commit().await.map_err(map_sqlx)
    }

    async fn find(&self, ctx: &TenantContext, id: OrderId) -> RepoResult<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id.as_uuid())
        .bind(ctx.tenant_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let Some(row) = row else { return Ok(None) };

        let currency_raw: String = row.try_get("currency").map_err(map_sqlx)?;
        let currency = Currency::parse(&currency_raw).map_err(storage)?;

        let item_rows = sqlx::query(
            r#"
            SELECT name, unit_price, quantity
            FROM order_line_items
            WHERE order_id = $1 AND tenant_id = $2
            ORDER BY position
            "#,
        )
        .bind(id.as_uuid())
        .bind(ctx.tenant_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let mut line_items = Vec::with_capacity(item_rows.len());
        for item in &item_rows {
            let unit_price: rust_decimal::Decimal =
                item.try_get("unit_price").map_err(map_sqlx)?;
            line_items.push(LineItem {
                name: item.try_get("name").map_err(map_sqlx)?,
                unit_price: Money::new(currency, unit_price).map_err(storage)?,
                quantity: item.try_get("quantity").map_err(map_sqlx)?,
            });
        }

        Ok(Some(order_from_row(&row, line_items)?))
    }

    async fn save(
        &self,
        ctx: &TenantContext,
        order: &Order,
        expected_version: i64,
        events: &[OutboxEvent],
    ) -> RepoResult<()> {
        let mut tx = self.begin_tenant_tx(ctx).await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, metadata = $2, version = $3, updated_at = $4,
                paid_at = $5, completed_at = $6
            WHERE id = $7 AND tenant_id = $8 AND version = $9
            "#,
        )
        .bind(order.status.as_str())
        .bind(&order.metadata)
        .bind(order.version)
        .bind(order.updated_at)
        .bind(order.paid_at)
        .bind(order.completed_at)
        .bind(order.id.as_uuid())
        .bind(ctx.tenant_str())
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            let exists: Option<i32> = sqlx::query_scalar(
                "SELECT 1 FROM orders WHERE id = $1 AND tenant_id = $2",
            )
            .bind(order.id.as_uuid())
            .bind(ctx.tenant_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            return Err(if exists.is_some() {
                RepoError::Conflict
            } else {
                RepoError::NotFound
            });
        }

        Self::enqueue_events_tx(&mut tx, events).await?;
        tx.commit().await.map_err(map_sqlx)
    }
}

#[async_trait]
impl PaymentRepository for PostgresStore {
    async fn create(
        &self,
        ctx: &TenantContext,
        payment: &Payment,
        events: &[OutboxEvent],
    ) -> RepoResult<()> {
        if !ctx.owns(&payment.tenant_id) {
            return Err(RepoError::TenantMissing);
        }
        let mut tx = self.begin_tenant_tx(ctx).await?;

        sqlx::query(
            r#"
            INSERT INTO payments
                (id, tenant_id, order_id, amount, currency, status, method,
                 pg_transaction_id, pg_payment_key, failure_reason, version,
                 created_at, updated_at, approved_at, confirmed_at, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.tenant_id.as_str())
        .bind(payment.order_id.as_uuid())
        .bind(payment.amount.amount())
        .bind(payment.amount.currency().as_str())
        .bind(payment.status.as_str())
        .bind(payment.method.map(|m| m.as_str()))
        .bind(&payment.pg_transaction_id)
        .bind(&payment.pg_payment_key)
        .bind(&payment.failure_reason)
        .bind(payment.version)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(payment.approved_at)
        .bind(payment.confirmed_at)
        .bind(payment.failed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        Self::enqueue_events_tx(&mut tx, events).await?;
        tx.commit().await.map_err(map_sqlx)
    }

    async fn find(&self, ctx: &TenantContext, id: PaymentId) -> RepoResult<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id.as_uuid())
        .bind(ctx.tenant_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(|r| payment_from_row(&r)).transpose()
    }

    async fn find_by_order(
        &self,
        ctx: &TenantContext,
        order_id: OrderId,
    ) -> RepoResult<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 AND tenant_id = $2"
        ))
        .bind(order_id.as_uuid())
        .bind(ctx.tenant_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(|r| payment_from_row(&r)).transpose()
    }

    async fn save(
        &self,
        ctx: &TenantContext,
        payment: &Payment,
        expected_version: i64,
        events: &[OutboxEvent],
    ) -> RepoResult<()> {
        let mut tx = self.begin_tenant_tx(ctx).await?;

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $1, method = $2, pg_transaction_id = $3, pg_payment_key = $4,
                failure_reason = $5, version = $6, updated_at = $7,
                approved_at = $8, confirmed_at = $9, failed_at = $10
            WHERE id = $11 AND tenant_id = $12 AND version = $13
            "#,
        )
        .bind(payment.status.as_str())
        .bind(payment.method.map(|m| m.as_str()))
        .bind(&payment.pg_transaction_id)
        .bind(&payment.pg_payment_key)
        .bind(&payment.failure_reason)
        .bind(payment.version)
        .bind(payment.updated_at)
        .bind(payment.approved_at)
        .bind(payment.confirmed_at)
        .bind(payment.failed_at)
        .bind(payment.id.as_uuid())
        .bind(ctx.tenant_str())
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            let exists: Option<i32> = sqlx::query_scalar(
                "SELECT 1 FROM payments WHERE id = $1 AND tenant_id = $2",
            )
            .bind(payment.id.as_uuid())
            .bind(ctx.tenant_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            return Err(if exists.is_some() {
                RepoError::Conflict
            } else {
                RepoError::NotFound
            });
        }

        Self::enqueue_events_tx(&mut tx, events).await?;
        tx.commit().await.map_err(map_sqlx)
    }
}

#[async_trait]
impl RefundRepository for PostgresStore {
    async fn create(
        &self,
        ctx: &TenantContext,
        refund: &Refund,
        events: &[OutboxEvent],
    ) -> RepoResult<()> {
        if !ctx.owns(&refund.tenant_id) {
            return Err(RepoError::TenantMissing);
        }
        let mut tx = self.begin_tenant_tx(ctx).await?;

        sqlx::query(
            r#"
            INSERT INTO refunds
                (id, tenant_id, payment_id, amount, currency, reason, status,
                 pg_refund_id, error_message, requested_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(refund.id.as_str())
        .bind(refund.tenant_id.as_str())
        .bind(refund.payment_id.as_uuid())
        .bind(refund.amount.amount())
        .bind(refund.amount.currency().as_str())
        .bind(&refund.reason)
        .bind(refund.status.as_str())
        .bind(&refund.pg_refund_id)
        .bind(&refund.error_message)
        .bind(refund.requested_at)
        .bind(refund.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        Self::enqueue_events_tx(&mut tx, events).await?;
        tx.commit().await.map_err(map_sqlx)
    }

    async fn find(&self, ctx: &TenantContext, id: &RefundId) -> RepoResult<Option<Refund>> {
        let row = sqlx::query(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id.as_str())
        .bind(ctx.tenant_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(|r| refund_from_row(&r)).transpose()
    }

    async fn list_by_payment(
        &self,
        ctx: &TenantContext,
        payment_id: PaymentId,
    ) -> RepoResult<Vec<Refund>> {
        let rows = sqlx::query(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds \
             WHERE payment_id = $1 AND tenant_id = $2 ORDER BY requested_at"
        ))
        .bind(payment_id.as_uuid())
        .bind(ctx.tenant_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(refund_from_row).collect()
    }

    async fn save(
        &self,
        ctx: &TenantContext,
        refund: &Refund,
        events: &[OutboxEvent],
    ) -> RepoResult<()> {
        let mut tx = self.begin_tenant_tx(ctx).await?;

        let result = sqlx::query(
            r#"
            UPDATE refunds
            SET status = $1, pg_refund_id = $2, error_message = $3, completed_at = $4
            WHERE id = $5 AND tenant_id = $6
            "#,
        )
        .bind(refund.status.as_str())
        .bind(&refund.pg_refund_id)
        .bind(&refund.error_message)
        .bind(refund.completed_at)
        .bind(refund.id.as_str())
        .bind(ctx.tenant_str())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        Self::enqueue_events_tx(&mut tx, events).await?;
        tx.commit().await.map_err(map_sqlx)
    }

    async fn list_requested(&self, limit: i64) -> RepoResult<Vec<Refund>> {
        let rows = sqlx::query(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds \
             WHERE status = 'REQUESTED' ORDER BY requested_at LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(refund_from_row).collect()
    }
}

#[async_trait]
impl OutboxRepository for PostgresStore {
    async fn claim_batch(
        &self,
        batch_size: i64,
        now: DateTime<Utc>,
    ) -> RepoResult<Vec<OutboxEvent>> {
        // FOR UPDATE SKIP LOCKED makes the claim safe under multiple
        // publisher instances.
        let rows = sqlx::query(&format!(
            r#"
            UPDATE outbox_events
            SET status = 'IN_FLIGHT', claimed_at = $2
            WHERE seq IN (
                SELECT seq FROM outbox_events
                WHERE status = 'PENDING' AND next_attempt_at <= $2
                ORDER BY seq
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {OUTBOX_COLUMNS}
            "#
        ))
        .bind(batch_size)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let mut events = rows
            .iter()
            .map(outbox_from_row)
            .collect::<RepoResult<Vec<_>>>()?;
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    async fn mark_published(&self, seq: i64) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE outbox_events \
             SET status = 'PUBLISHED', published_at = NOW(), claimed_at = NULL \
             WHERE seq = $1",
        )
        .bind(seq)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn reset_to_pending(
        &self,
        seq: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE outbox_events \
             SET status = 'PENDING', retry_count = retry_count + 1, last_error = $2, \
                 next_attempt_at = $3, claimed_at = NULL \
             WHERE seq = $1",
        )
        .bind(seq)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn mark_failed(&self, seq: i64, error: &str) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE outbox_events \
             SET status = 'FAILED', last_error = $2, claimed_at = NULL \
             WHERE seq = $1",
        )
        .bind(seq)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn release_stale_claims(&self, claim_timeout: Duration) -> RepoResult<u64> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(claim_timeout)
                .unwrap_or_else(|_| ChronoDuration::seconds(300));

        let result = sqlx::query(
            "UPDATE outbox_events \
             SET status = 'PENDING', claimed_at = NULL \
             WHERE status = 'IN_FLIGHT' AND (claimed_at IS NULL OR claimed_at < $1)",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(result.rows_affected())
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE status = 'PUBLISHED' AND published_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl IdempotencyRepository for PostgresStore {
    async fn try_acquire(
        &self,
        ctx: &TenantContext,
        endpoint: &str,
        key: &str,
        payload_hash: &str,
        ttl: Duration,
    ) -> RepoResult<AcquireOutcome> {
        let mut tx = self.begin_tenant_tx(ctx).await?;

        // Expired entries are dead; remove opportunistically so the insert
        // below can take their place.
        sqlx::query(
            "DELETE FROM idempotency_keys \
             WHERE tenant_id = $1 AND endpoint = $2 AND idempotency_key = $3 \
               AND expires_at <= NOW()",
        )
        .bind(ctx.tenant_str())
        .bind(endpoint)
        .bind(key)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let expires_at = Utc::now()
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(24));

        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_keys
                (tenant_id, endpoint, idempotency_key, payload_hash, state, expires_at)
            VALUES ($1, $2, $3, $4, 'LOCKED', $5)
            ON CONFLICT (tenant_id, endpoint, idempotency_key) DO NOTHING
            "#,
        )
        .bind(ctx.tenant_str())
        .bind(endpoint)
        .bind(key)
        .bind(payload_hash)
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if inserted.rows_affected() == 1 {
            tx.commit().await.map_err(map_sqlx)?;
            return Ok(AcquireOutcome::Acquired);
        }

        // Lost the race or an entry already existed; inspect it.
        let row = sqlx::query(
            "SELECT payload_hash, state, response_body, http_status \
             FROM idempotency_keys \
             WHERE tenant_id = $1 AND endpoint = $2 AND idempotency_key = $3",
        )
        .bind(ctx.tenant_str())
        .bind(endpoint)
        .bind(key)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;

        let state: String = row.try_get("state").map_err(map_sqlx)?;
        let stored_hash: String = row.try_get("payload_hash").map_err(map_sqlx)?;

        match state.as_str() {
            "LOCKED" => Ok(AcquireOutcome::Processing),
            "STORED" if stored_hash == payload_hash => {
                let body: JsonValue = row.try_get("response_body").map_err(map_sqlx)?;
                let http_status: i32 = row.try_get("http_status").map_err(map_sqlx)?;
                Ok(AcquireOutcome::Hit(StoredResponse {
                    payload_hash: stored_hash,
                    body,
                    http_status: http_status as u16,
                }))
            }
            "STORED" => Ok(AcquireOutcome::Conflict),
            other => Err(storage(format!("unknown idempotency state {other}"))),
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
        let expires_at = Utc::now()
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(24));

        sqlx::query(
            r#"
            INSERT INTO idempotency_keys
                (tenant_id, endpoint, idempotency_key, payload_hash, state,
                 response_body, http_status, expires_at)
            VALUES ($1, $2, $3, $4, 'STORED', $5, $6, $7)
            ON CONFLICT (tenant_id, endpoint, idempotency_key) DO UPDATE
            SET state = 'STORED',
                payload_hash = EXCLUDED.payload_hash,
                response_body = EXCLUDED.response_body,
                http_status = EXCLUDED.http_status,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(ctx.tenant_str())
        .bind(endpoint)
        .bind(key)
        .bind(&response.payload_hash)
        .bind(&response.body)
        .bind(response.http_status as i32)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn release(&self, ctx: &TenantContext, endpoint: &str, key: &str) -> RepoResult<()> {
        sqlx::query(
            "DELETE FROM idempotency_keys \
             WHERE tenant_id = $1 AND endpoint = $2 AND idempotency_key = $3 \
               AND state = 'LOCKED'",
        )
        .bind(ctx.tenant_str())
        .bind(endpoint)
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SagaRepository for PostgresStore {
    async fn create_instance(&self, instance: &SagaInstance) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO saga_instances
                (saga_id, saga_type, correlation_id, tenant_id, status, current_step,
                 context_data, error, compensation_failed, lease_owner, leased_until,
                 started_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(instance.saga_id)
        .bind(&instance.saga_type)
        .bind(&instance.correlation_id)
        .bind(instance.tenant_id.as_str())
        .bind(instance.status.as_str())
        .bind(instance.current_step)
        .bind(&instance.context_data)
        .bind(&instance.error)
        .bind(instance.compensation_failed)
        .bind(&instance.lease_owner)
        .bind(instance.leased_until)
        .bind(instance.started_at)
        .bind(instance.updated_at)
        .bind(instance.completed_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn update_instance(&self, instance: &SagaInstance) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE saga_instances
            SET status = $1, current_step = $2, context_data = $3, error = $4,
                compensation_failed = $5, updated_at = $6, completed_at = $7
            WHERE saga_id = $8
            "#,
        )
        .bind(instance.status.as_str())
        .bind(instance.current_step)
        .bind(&instance.context_data)
        .bind(&instance.error)
        .bind(instance.compensation_failed)
        .bind(instance.updated_at)
        .bind(instance.completed_at)
        .bind(instance.saga_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn find_instance(&self, saga_id: Uuid) -> RepoResult<Option<SagaInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM saga_instances WHERE saga_id = $1"
        ))
        .bind(saga_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(|r| saga_from_row(&r)).transpose()
    }

    async fn upsert_step(&self, saga_id: Uuid, step: &SagaStepRecord) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO saga_steps
                (saga_id, step_order, name, status, executed_at, compensated_at, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (saga_id, step_order) DO UPDATE
            SET status = EXCLUDED.status,
                executed_at = EXCLUDED.executed_at,
                compensated_at = EXCLUDED.compensated_at,
                error = EXCLUDED.error
            "#,
        )
        .bind(saga_id)
        .bind(step.step_order)
        .bind(&step.name)
        .bind(step.status.as_str())
        .bind(step.executed_at)
        .bind(step.compensated_at)
        .bind(&step.error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn list_steps(&self, saga_id: Uuid) -> RepoResult<Vec<SagaStepRecord>> {
        let rows = sqlx::query(
            "SELECT step_order, name, status, executed_at, compensated_at, error \
             FROM saga_steps WHERE saga_id = $1 ORDER BY step_order",
        )
        .bind(saga_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(step_from_row).collect()
    }

    async fn acquire_lease(
        &self,
        saga_id: Uuid,
        owner: &str,
        until: DateTime<Utc>,
    ) -> RepoResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE saga_instances
            SET lease_owner = $2, leased_until = $3
            WHERE saga_id = $1
              AND (lease_owner IS NULL OR lease_owner = $2 OR leased_until < NOW())
            "#,
        )
        .bind(saga_id)
        .bind(owner)
        .bind(until)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(&self, saga_id: Uuid, owner: &str) -> RepoResult<()> {
        sqlx::query(
            "UPDATE saga_instances SET lease_owner = NULL, leased_until = NULL \
             WHERE saga_id = $1 AND lease_owner = $2",
        )
        .bind(saga_id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn list_stalled(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<SagaInstance>> {
        let rows = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM saga_instances \
             WHERE status IN ('PROCESSING', 'COMPENSATING') AND updated_at < $1 \
             ORDER BY updated_at LIMIT $2"
        ))
        .bind(stale_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(saga_from_row).collect()
    }
}

#[async_trait]
impl WebhookRepository for PostgresStore {
    async fn create_delivery(&self, delivery: &WebhookDelivery) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhooks
                (id, tenant_id, subscription_id, event_id, event_type, payload,
                 target_url, status, retry_count, max_retries, last_attempt_at,
                 next_retry_at, last_error, created_at, delivered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(delivery.id.as_str())
        .bind(delivery.tenant_id.as_str())
        .bind(delivery.subscription_id)
        .bind(delivery.event_id)
        .bind(&delivery.event_type)
        .bind(&delivery.payload)
        .bind(&delivery.target_url)
        .bind(delivery.status.as_str())
        .bind(delivery.retry_count)
        .bind(delivery.max_retries)
        .bind(delivery.last_attempt_at)
        .bind(delivery.next_retry_at)
        .bind(&delivery.last_error)
        .bind(delivery.created_at)
        .bind(delivery.delivered_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn find_delivery(&self, id: &WebhookId) -> RepoResult<Option<WebhookDelivery>> {
        let row = sqlx::query(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(|r| delivery_from_row(&r)).transpose()
    }

    async fn save_delivery(&self, delivery: &WebhookDelivery) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE webhooks
            SET status = $1, retry_count = $2, last_attempt_at = $3, next_retry_at = $4,
                last_error = $5, delivered_at = $6
            WHERE id = $7
            "#,
        )
        .bind(delivery.status.as_str())
        .bind(delivery.retry_count)
        .bind(delivery.last_attempt_at)
        .bind(delivery.next_retry_at)
        .bind(&delivery.last_error)
        .bind(delivery.delivered_at)
        .bind(delivery.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<WebhookDelivery>> {
        let rows = sqlx::query(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks \
             WHERE status = 'RETRYING' AND next_retry_at <= $1 \
             ORDER BY next_retry_at LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(delivery_from_row).collect()
    }

    async fn create_subscription(&self, subscription: &WebhookSubscription) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_subscriptions
                (id, tenant_id, url, secret, event_types, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.tenant_id.as_str())
        .bind(&subscription.url)
        .bind(&subscription.secret)
        .bind(&subscription.event_types)
        .bind(subscription.active)
        .bind(subscription.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn find_subscription(&self, id: Uuid) -> RepoResult<Option<WebhookSubscription>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, url, secret, event_types, active, created_at \
             FROM webhook_subscriptions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(|r| subscription_from_row(&r)).transpose()
    }

    async fn list_subscriptions(&self, tenant: &TenantId) -> RepoResult<Vec<WebhookSubscription>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, url, secret, event_types, active, created_at \
             FROM webhook_subscriptions WHERE tenant_id = $1 AND active",
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(subscription_from_row).collect()
    }
}
