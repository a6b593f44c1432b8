//! The canonical payment saga: create order, then create its payment.
//!
//! Step 1 `CREATE_ORDER` creates the order; its compensation cancels it.
//! Step 2 `PROCESS_PAYMENT` creates the READY payment; its compensation
//! forces the payment to FAILED. Both compensations are idempotent so a
//! recovered saga can safely replay them.

use async_trait::async_trait;
use std::sync::Arc;

use super::{SagaContext, SagaDefinition, SagaStep};
use crate::domain::{Money, OrderId, PaymentId};
use crate::error::EngineResult;
use crate::services::{CreateOrderCommand, OrderService, PaymentService};

pub const PAYMENT_SAGA_TYPE: &str = "payment-saga";

/// Context keys shared between the steps.
pub mod keys {
    /// [`CreateOrderCommand`]: the saga's input, set by the caller.
    pub const ORDER_REQUEST: &str = "order_request";
    /// [`uuid::Uuid`]: set by CREATE_ORDER.
    pub const ORDER_ID: &str = "order_id";
    /// [`crate::domain::Money`]: set by CREATE_ORDER.
    pub const ORDER_TOTAL: &str = "order_total";
    /// [`uuid::Uuid`]: set by PROCESS_PAYMENT.
    pub const PAYMENT_ID: &str = "payment_id";
}

pub struct CreateOrderStep {
    orders: Arc<OrderService>,
}

impl CreateOrderStep {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl SagaStep for CreateOrderStep {
    fn name(&self) -> &'static str {
        "CREATE_ORDER"
    }

    async fn execute(&self, ctx: &mut SagaContext) -> EngineResult<()> {
        let command: CreateOrderCommand = ctx.require(keys::ORDER_REQUEST)?;
        let tenant = ctx.tenant.clone();

        let order = self.orders.create_order(&tenant, command).await?;

        ctx.put(keys::ORDER_ID, &order.id)?;
        ctx.put(keys::ORDER_TOTAL, &order.total_amount)?;
        Ok(())
    }

    async fn compensate(&self, ctx: &mut SagaContext) -> EngineResult<()> {
        // Nothing to undo when the step failed before creating the order.
        let Some(order_id) = ctx.get::<OrderId>(keys::ORDER_ID)? else {
            return Ok(());
        };
        let tenant = ctx.tenant.clone();

        self.orders.cancel_order(&tenant, order_id).await?;
        Ok(())
    }
}

pub struct ProcessPaymentStep {
    payments: Arc<PaymentService>,
}

impl ProcessPaymentStep {
    pub fn new(payments: Arc<PaymentService>) -> Self {
        Self { payments }
    }
}

#[async_trait]
impl SagaStep for ProcessPaymentStep {
    fn name(&self) -> &'static str {
        "PROCESS_PAYMENT"
    }

    async fn execute(&self, ctx: &mut SagaContext) -> EngineResult<()> {
        let order_id: OrderId = ctx.require(keys::ORDER_ID)?;
        let total: Money = ctx.require(keys::ORDER_TOTAL)?;
        let tenant = ctx.tenant.clone();

        let payment = self.payments.create_payment(&tenant, order_id, total).await?;

        ctx.put(keys::PAYMENT_ID, &payment.id)?;
        Ok(())
    }

    async fn compensate(&self, ctx: &mut SagaContext) -> EngineResult<()> {
        let Some(payment_id) = ctx.get::<PaymentId>(keys::PAYMENT_ID)? else {
            return Ok(());
        };
        let tenant = ctx.tenant.clone();

        self.payments
            .fail_payment(&tenant, payment_id, "Saga compensation")
            .await?;
        Ok(())
    }
}

/// Assemble the payment saga definition.
pub fn payment_saga(
    orders: Arc<OrderService>,
    payments: Arc<PaymentService>,
) -> SagaDefinition {
    SagaDefinition::new(
        PAYMENT_SAGA_TYPE,
        vec![
            Arc::new(CreateOrderStep::new(orders)),
            Arc::new(ProcessPaymentStep::new(payments)),
        ],
    )
}
