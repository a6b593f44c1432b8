use event_bus::{retry_with_policy, EventBus, InMemoryBus, NatsBus, RetryPolicy};
use std::time::Duration;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use fluxpay_rs::config::Config;
use fluxpay_rs::gateway::http::PgHttpConfig;
use fluxpay_rs::gateway::{HttpPgClient, MockPgClient, PgClient};
use fluxpay_rs::idempotency::{
    run_expiry_sweeper, IdempotencyGuard, InMemoryIdempotencyCache,
};
use fluxpay_rs::outbox::maintenance::run_maintenance;
use fluxpay_rs::outbox::publisher::OutboxPublisher;
use fluxpay_rs::repos::memory::InMemoryStore;
use fluxpay_rs::repos::postgres::PostgresStore;
use fluxpay_rs::repos::{
    IdempotencyRepository, OrderRepository, OutboxRepository, PaymentRepository,
    RefundRepository, SagaRepository, WebhookRepository,
};
use fluxpay_rs::routes::{self, AppState};
use fluxpay_rs::saga::payment_saga::payment_saga;
use fluxpay_rs::saga::{SagaOrchestrator, SagaRecovery};
use fluxpay_rs::services::{OrderService, PaymentService, RefundService};
use fluxpay_rs::webhook::scheduler::run_retry_scheduler;
use fluxpay_rs::webhook::{fanout, WebhookDeliveryWorker};

/// Every repository handle the engine wires, independent of the backing
/// store.
struct Repos {
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn PaymentRepository>,
    refunds: Arc<dyn RefundRepository>,
    outbox: Arc<dyn OutboxRepository>,
    idempotency: Arc<dyn IdempotencyRepository>,
    sagas: Arc<dyn SagaRepository>,
    webhooks: Arc<dyn WebhookRepository>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Arc::new(Config::from_env());

    // Event bus: NATS in production, in-memory for dev/test.
    let event_bus: Arc<dyn EventBus> = match config.bus_type.to_lowercase().as_str() {
        "nats" => {
            tracing::info!(nats_url = %config.nats_url, "connecting to NATS");
            let policy = RetryPolicy::exponential(5, Duration::from_millis(500), Duration::from_secs(10));
            let nats_client = retry_with_policy(
                || async_nats::connect(&config.nats_url),
                &policy,
                "nats-connect",
            )
            .await
            .expect("Failed to connect to NATS");
            Arc::new(NatsBus::new(nats_client))
        }
        _ => {
            tracing::info!("using in-memory event bus");
            Arc::new(InMemoryBus::new())
        }
    };

    // Store: Postgres in production, in-memory for dev/test.
    let repos = match config.store_type.to_lowercase().as_str() {
        "postgres" => {
            let database_url = config
                .database_url
                .clone()
                .expect("DATABASE_URL must be set when STORE_TYPE=postgres");

            let pool = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(std::time::Duration::from_secs(10))
                .connect(&database_url)
                .await
                .expect("Failed to connect to Postgres");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("database migrations applied");

            let store = Arc::new(PostgresStore::new(pool));
            Repos {
                orders: store.clone(),
                payments: store.clone(),
                refunds: store.clone(),
                outbox: store.clone(),
                idempotency: store.clone(),
                sagas: store.clone(),
                webhooks: store,
            }
        }
        _ => {
            tracing::info!("using in-memory store");
            let store = Arc::new(InMemoryStore::new());
            Repos {
                orders: store.clone(),
                payments: store.clone(),
                refunds: store.clone(),
                outbox: store.clone(),
                idempotency: store.clone(),
                sagas: store.clone(),
                webhooks: store,
            }
        }
    };

    // Payment gateway client.
    let pg: Arc<dyn PgClient> = match config.pg_mode.to_lowercase().as_str() {
        "http" => {
            let pg_config = PgHttpConfig::new(&config.pg_base_url, &config.pg_secret_key);
            Arc::new(HttpPgClient::new(pg_config).expect("Failed to build gateway client"))
        }
        _ => {
            tracing::info!("using mock payment gateway");
            Arc::new(MockPgClient::new())
        }
    };

    // Services and the saga machinery.
    let order_service = Arc::new(OrderService::new(repos.orders.clone()));
    let payment_service = Arc::new(PaymentService::new(
        repos.payments.clone(),
        repos.orders.clone(),
        order_service.clone(),
        pg.clone(),
    ));
    let refund_service = Arc::new(RefundService::new(
        repos.refunds.clone(),
        repos.payments.clone(),
        pg.clone(),
        config.refund.clone(),
    ));

    let orchestrator = Arc::new(SagaOrchestrator::new(
        repos.sagas.clone(),
        config.saga.clone(),
    ));
    let payment_saga_def = payment_saga(order_service.clone(), payment_service.clone());

    let guard = Arc::new(IdempotencyGuard::new(
        repos.idempotency.clone(),
        Some(Arc::new(InMemoryIdempotencyCache::new())),
        &config.idempotency,
    ));

    // Background workers.
    let publisher = OutboxPublisher::new(
        repos.outbox.clone(),
        event_bus.clone(),
        config.outbox.clone(),
    );
    tokio::spawn(publisher.run());

    tokio::spawn(run_maintenance(repos.outbox.clone(), config.outbox.clone()));

    let recovery = SagaRecovery::new(
        repos.sagas.clone(),
        orchestrator.clone(),
        config.saga.clone(),
        vec![payment_saga_def.clone()],
    );
    tokio::spawn(recovery.run());

    tokio::spawn(refund_service.clone().run());

    tokio::spawn(run_expiry_sweeper(
        repos.idempotency.clone(),
        config.idempotency.clone(),
    ));

    let webhook_worker = Arc::new(
        WebhookDeliveryWorker::new(repos.webhooks.clone(), config.webhook.clone())
            .expect("Failed to build webhook worker"),
    );
    tokio::spawn(run_retry_scheduler(
        repos.webhooks.clone(),
        webhook_worker.clone(),
        config.webhook.clone(),
    ));
    tokio::spawn(fanout::run_fanout(
        event_bus.clone(),
        repos.webhooks.clone(),
        webhook_worker,
        config.outbox.clone(),
        config.webhook.clone(),
    ));

    tracing::info!("background workers started");

    let state = AppState {
        config: config.clone(),
        orders: order_service,
        payments: payment_service,
        refunds: refund_service,
        orchestrator,
        payment_saga: payment_saga_def,
        guard,
    };

    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .into_make_service_with_connect_info::<SocketAddr>();

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid HOST:PORT");

    tracing::info!("fluxpay engine listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
