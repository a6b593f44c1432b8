//! Order service

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::domain::{Currency, LineItem, Order, OrderId, OrderStatus};
use crate::error::{EngineError, EngineResult};
use crate::events::DomainEvent;
use crate::outbox::OutboxEvent;
use crate::repos::OrderRepository;
use crate::tenant::TenantContext;

/// Inputs for creating an order. Serializable so the payment saga can carry
/// it in its context across a crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderCommand {
    pub user_id: String,
    pub currency: Currency,
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub metadata: JsonValue,
}

pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    /// Create a PENDING order; `order.created` commits with it.
    pub async fn create_order(
        &self,
        ctx: &TenantContext,
        command: CreateOrderCommand,
    ) -> EngineResult<Order> {
        let order = Order::create(
            ctx.tenant_id.clone(),
            command.user_id,
            command.currency,
            command.line_items,
            command.metadata,
        )?;

        let events = OutboxEvent::record_all(ctx, &[DomainEvent::order_created(&order)])?;
        self.orders.create(ctx, &order, &events).await?;

        tracing::info!(
            order_id = %order.id,
            tenant_id = %ctx.tenant_id,
            total = %order.total_amount,
            "order created"
        );

        Ok(order)
    }

    pub async fn get_order(&self, ctx: &TenantContext, id: OrderId) -> EngineResult<Order> {
        self.orders
            .find(ctx, id)
            .await?
            .ok_or(EngineError::OrderNotFound)
    }

    /// Cancel an order. Already-cancelled orders are returned as-is so saga
    /// compensation can safely re-run.
    pub async fn cancel_order(&self, ctx: &TenantContext, id: OrderId) -> EngineResult<Order> {
        let mut order = self.get_order(ctx, id).await?;

        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }

        let expected_version = order.version;
        order.cancel()?;
        order.version += 1;

        let events = OutboxEvent::record_all(ctx, &[DomainEvent::order_cancelled(&order)])?;
        self.orders
            .save(ctx, &order, expected_version, &events)
            .await?;

        tracing::info!(order_id = %order.id, "order cancelled");

        Ok(order)
    }

    /// Complete a PAID order.
    pub async fn complete_order(&self, ctx: &TenantContext, id: OrderId) -> EngineResult<Order> {
        let mut order = self.get_order(ctx, id).await?;

        let expected_version = order.version;
        order.complete()?;
        order.version += 1;

        let events = OutboxEvent::record_all(ctx, &[DomainEvent::order_completed(&order)])?;
        self.orders
            .save(ctx, &order, expected_version, &events)
            .await?;

        tracing::info!(order_id = %order.id, "order completed");

        Ok(order)
    }

    /// Mark an order PAID after its payment confirms. The notification for
    /// this mutation is the `payment.confirmed` event already riding the
    /// order's partition, so no separate order event is emitted.
    pub(crate) async fn mark_order_paid(
        &self,
        ctx: &TenantContext,
        id: OrderId,
    ) -> EngineResult<Order> {
        let mut order = self.get_order(ctx, id).await?;

        let expected_version = order.version;
        order.mark_paid()?;
        order.version += 1;

        self.orders.save(ctx, &order, expected_version, &[]).await?;

        Ok(order)
    }
}
