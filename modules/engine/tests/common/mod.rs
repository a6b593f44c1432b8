//! Shared test harness: the full engine wired against the in-memory store,
//! the in-memory bus, and the mock payment gateway.

// Each integration test binary compiles this module; not every binary uses
// every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use event_bus::InMemoryBus;
use rust_decimal::Decimal;

use fluxpay_rs::config::Config;
use fluxpay_rs::domain::{Currency, LineItem, Money};
use fluxpay_rs::gateway::MockPgClient;
use fluxpay_rs::idempotency::IdempotencyGuard;
use fluxpay_rs::outbox::publisher::OutboxPublisher;
use fluxpay_rs::repos::memory::InMemoryStore;
use fluxpay_rs::routes::AppState;
use fluxpay_rs::saga::payment_saga::payment_saga;
use fluxpay_rs::saga::{SagaDefinition, SagaOrchestrator};
use fluxpay_rs::services::{CreateOrderCommand, OrderService, PaymentService, RefundService};
use fluxpay_rs::tenant::TenantContext;

pub struct TestEngine {
    pub config: Arc<Config>,
    pub store: Arc<InMemoryStore>,
    pub bus: Arc<InMemoryBus>,
    pub pg: Arc<MockPgClient>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub refunds: Arc<RefundService>,
    pub orchestrator: Arc<SagaOrchestrator>,
    pub saga: SagaDefinition,
    pub guard: Arc<IdempotencyGuard>,
    pub publisher: OutboxPublisher,
}

/// Test-speed configuration: real semantics, millisecond delays.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.saga.compensation_retry_delay = Duration::from_millis(10);
    config.saga.step_timeout = Duration::from_secs(2);
    config.saga.timeout = Duration::from_secs(5);
    config.webhook.base_backoff = Duration::from_millis(50);
    config.webhook.max_backoff = Duration::from_millis(400);
    config.webhook.jitter = Duration::from_millis(10);
    config.webhook.request_timeout = Duration::from_secs(2);
    config
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(InMemoryStore::new());
        let bus = Arc::new(InMemoryBus::new());
        let pg = Arc::new(MockPgClient::new());

        let orders = Arc::new(OrderService::new(store.clone()));
        let payments = Arc::new(PaymentService::new(
            store.clone(),
            store.clone(),
            orders.clone(),
            pg.clone(),
        ));
        let refunds = Arc::new(RefundService::new(
            store.clone(),
            store.clone(),
            pg.clone(),
            config.refund.clone(),
        ));

        let orchestrator = Arc::new(SagaOrchestrator::new(store.clone(), config.saga.clone()));
        let saga = payment_saga(orders.clone(), payments.clone());

        let guard = Arc::new(IdempotencyGuard::new(
            store.clone(),
            None,
            &config.idempotency,
        ));

        let publisher = OutboxPublisher::new(store.clone(), bus.clone(), config.outbox.clone());

        Self {
            config,
            store,
            bus,
            pg,
            orders,
            payments,
            refunds,
            orchestrator,
            saga,
            guard,
            publisher,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            config: self.config.clone(),
            orders: self.orders.clone(),
            payments: self.payments.clone(),
            refunds: self.refunds.clone(),
            orchestrator: self.orchestrator.clone(),
            payment_saga: self.saga.clone(),
            guard: self.guard.clone(),
        }
    }
}

pub fn ctx(tenant: &str) -> TenantContext {
    TenantContext::from_header(tenant).unwrap()
}

pub fn krw(amount: i64) -> Money {
    Money::new(Currency::Krw, Decimal::from(amount)).unwrap()
}

/// One line of 2 × ₩10,000 — the canonical ₩20,000 order.
pub fn order_command(user_id: &str) -> CreateOrderCommand {
    CreateOrderCommand {
        user_id: user_id.to_string(),
        currency: Currency::Krw,
        line_items: vec![LineItem {
            name: "concert ticket".to_string(),
            unit_price: krw(10_000),
            quantity: 2,
        }],
        metadata: serde_json::json!({}),
    }
}
