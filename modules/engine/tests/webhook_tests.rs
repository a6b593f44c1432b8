//! Webhook delivery against a real local subscriber: signatures, retry
//! scheduling, poisoning, and event fan-out.

mod common;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use common::{ctx, order_command, test_config, TestEngine};
use event_bus::{headers as bus_headers, EventBus};
use fluxpay_rs::domain::{WebhookDelivery, WebhookStatus, WebhookSubscription};
use fluxpay_rs::repos::WebhookRepository;
use fluxpay_rs::tenant::TenantId;
use fluxpay_rs::webhook::{fanout, verify_signature, wire, WebhookDeliveryWorker};

struct ReceivedHook {
    headers: HeaderMap,
    body: Bytes,
}

#[derive(Clone)]
struct ReceiverState {
    tx: mpsc::UnboundedSender<ReceivedHook>,
    /// Statuses to respond with, consumed front-to-back; 200 once empty.
    responses: Arc<Mutex<VecDeque<u16>>>,
}

async fn receive(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let _ = state.tx.send(ReceivedHook { headers, body });
    let status = state
        .responses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(200);
    StatusCode::from_u16(status).unwrap_or(StatusCode::OK)
}

/// Local HTTP subscriber; returns its URL, the hook channel, and the
/// scripted response queue.
async fn spawn_receiver() -> (
    String,
    mpsc::UnboundedReceiver<ReceivedHook>,
    Arc<Mutex<VecDeque<u16>>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let responses = Arc::new(Mutex::new(VecDeque::new()));
    let state = ReceiverState {
        tx,
        responses: responses.clone(),
    };

    let app = Router::new().route("/hooks", post(receive)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/hooks"), rx, responses)
}

fn subscription(url: &str) -> WebhookSubscription {
    WebhookSubscription::new(
        TenantId::new("tenant-a").unwrap(),
        url,
        "whsec_test_secret",
        vec![],
    )
}

fn delivery_for(sub: &WebhookSubscription, max_retries: i32) -> WebhookDelivery {
    WebhookDelivery::create(
        sub,
        Uuid::new_v4(),
        "payment.confirmed",
        serde_json::json!({
            "specversion": "1.0",
            "type": "com.fluxpay.payment.confirmed",
            "tenantid": "tenant-a",
            "data": {"payment_id": "p-1"}
        }),
        max_retries,
    )
}

#[tokio::test]
async fn test_delivery_is_signed_and_verifiable() {
    let engine = TestEngine::new();
    let (url, mut rx, _) = spawn_receiver().await;

    let sub = subscription(&url);
    engine.store.create_subscription(&sub).await.unwrap();
    let delivery = delivery_for(&sub, 5);
    engine.store.create_delivery(&delivery).await.unwrap();

    let worker =
        WebhookDeliveryWorker::new(engine.store.clone(), engine.config.webhook.clone()).unwrap();
    let status = worker.deliver(&delivery.id).await.unwrap();
    assert_eq!(status, WebhookStatus::Delivered);

    let hook = rx.recv().await.unwrap();
    assert_eq!(
        hook.headers.get(wire::EVENT_TYPE).unwrap(),
        "payment.confirmed"
    );
    assert_eq!(
        hook.headers.get(wire::EVENT_ID).unwrap().to_str().unwrap(),
        delivery.event_id.to_string()
    );

    // The signature verifies over timestamp.payload with the secret.
    let timestamp: i64 = hook
        .headers
        .get(wire::TIMESTAMP)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let signature = hook.headers.get(wire::SIGNATURE).unwrap().to_str().unwrap();
    let body = std::str::from_utf8(&hook.body).unwrap();
    assert!(verify_signature(
        "whsec_test_secret",
        timestamp,
        body,
        signature,
        Some(300),
        Utc::now().timestamp()
    ));
    assert!(!verify_signature(
        "wrong_secret",
        timestamp,
        body,
        signature,
        Some(300),
        Utc::now().timestamp()
    ));

    let saved = engine
        .store
        .find_delivery(&delivery.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.status, WebhookStatus::Delivered);
    assert!(saved.delivered_at.is_some());
}

#[tokio::test]
async fn test_server_errors_schedule_retries_until_success() {
    let engine = TestEngine::new();
    let (url, mut rx, responses) = spawn_receiver().await;
    responses.lock().unwrap().extend([500u16, 503]);

    let sub = subscription(&url);
    engine.store.create_subscription(&sub).await.unwrap();
    let delivery = delivery_for(&sub, 5);
    engine.store.create_delivery(&delivery).await.unwrap();

    let worker =
        WebhookDeliveryWorker::new(engine.store.clone(), engine.config.webhook.clone()).unwrap();

    // Attempt 1: 500 -> RETRYING with a scheduled next attempt.
    let status = worker.deliver(&delivery.id).await.unwrap();
    assert_eq!(status, WebhookStatus::Retrying);
    let saved = engine
        .store
        .find_delivery(&delivery.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.retry_count, 1);
    let next_retry = saved.next_retry_at.unwrap();
    assert!(next_retry > Utc::now());

    // Attempt 2: 503 -> retry again.
    let status = worker.deliver(&delivery.id).await.unwrap();
    assert_eq!(status, WebhookStatus::Retrying);

    // Attempt 3: 200 -> delivered.
    let status = worker.deliver(&delivery.id).await.unwrap();
    assert_eq!(status, WebhookStatus::Delivered);

    // All three attempts reached the subscriber.
    for _ in 0..3 {
        rx.recv().await.unwrap();
    }
}

#[tokio::test]
async fn test_client_error_is_terminal() {
    let engine = TestEngine::new();
    let (url, _rx, responses) = spawn_receiver().await;
    responses.lock().unwrap().push_back(410);

    let sub = subscription(&url);
    engine.store.create_subscription(&sub).await.unwrap();
    let delivery = delivery_for(&sub, 5);
    engine.store.create_delivery(&delivery).await.unwrap();

    let worker =
        WebhookDeliveryWorker::new(engine.store.clone(), engine.config.webhook.clone()).unwrap();
    let status = worker.deliver(&delivery.id).await.unwrap();
    assert_eq!(status, WebhookStatus::Failed);

    let saved = engine
        .store
        .find_delivery(&delivery.id)
        .await
        .unwrap()
        .unwrap();
    assert!(saved.last_error.as_deref().unwrap().contains("410"));
}

#[tokio::test]
async fn test_exhausted_retries_poison_delivery() {
    let mut config = test_config();
    config.webhook.max_retries = 0;
    let engine = TestEngine::with_config(config);
    let (url, _rx, responses) = spawn_receiver().await;
    responses.lock().unwrap().push_back(500);

    let sub = subscription(&url);
    engine.store.create_subscription(&sub).await.unwrap();
    let delivery = delivery_for(&sub, 0);
    engine.store.create_delivery(&delivery).await.unwrap();

    let worker =
        WebhookDeliveryWorker::new(engine.store.clone(), engine.config.webhook.clone()).unwrap();
    let status = worker.deliver(&delivery.id).await.unwrap();
    assert_eq!(status, WebhookStatus::Failed);
}

#[tokio::test]
async fn test_due_for_retry_selection() {
    let engine = TestEngine::new();
    let (url, _rx, responses) = spawn_receiver().await;
    responses.lock().unwrap().push_back(500);

    let sub = subscription(&url);
    engine.store.create_subscription(&sub).await.unwrap();
    let delivery = delivery_for(&sub, 5);
    engine.store.create_delivery(&delivery).await.unwrap();

    let worker =
        WebhookDeliveryWorker::new(engine.store.clone(), engine.config.webhook.clone()).unwrap();
    worker.deliver(&delivery.id).await.unwrap();

    // Not due yet.
    let due = engine.store.due_for_retry(Utc::now(), 10).await.unwrap();
    assert!(due.is_empty());

    // Due once next_retry_at passes.
    let due = engine
        .store
        .due_for_retry(Utc::now() + chrono::Duration::seconds(30), 10)
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, delivery.id);
}

#[tokio::test]
async fn test_fanout_delivers_published_events() {
    let engine = TestEngine::new();
    let ctx = ctx("tenant-a");
    let (url, mut rx, _) = spawn_receiver().await;

    let sub = subscription(&url);
    engine.store.create_subscription(&sub).await.unwrap();

    let worker = Arc::new(
        WebhookDeliveryWorker::new(engine.store.clone(), engine.config.webhook.clone()).unwrap(),
    );
    tokio::spawn(fanout::run_fanout(
        engine.bus.clone(),
        engine.store.clone(),
        worker,
        engine.config.outbox.clone(),
        engine.config.webhook.clone(),
    ));
    // Let the consumer subscribe before publishing.
    tokio::time::sleep(Duration::from_millis(100)).await;

    engine
        .orders
        .create_order(&ctx, order_command("u1"))
        .await
        .unwrap();
    let (published, failed) = engine.publisher.publish_batch().await.unwrap();
    assert_eq!((published, failed), (1, 0));

    // The subscriber receives the CloudEvents body the broker saw.
    let hook = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timeout")
        .unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&hook.body).unwrap();
    assert_eq!(payload["type"], "com.fluxpay.order.created");
    assert_eq!(payload["tenantid"], "tenant-a");
    assert_eq!(
        hook.headers.get(wire::EVENT_TYPE).unwrap(),
        "order.created"
    );

    // Exactly one delivery row exists for the event.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.store.delivery_rows().len(), 1);
}

#[tokio::test]
async fn test_fanout_ignores_duplicate_broker_delivery() {
    let engine = TestEngine::new();
    let (url, _rx, _) = spawn_receiver().await;

    let sub = subscription(&url);
    engine.store.create_subscription(&sub).await.unwrap();

    let worker = Arc::new(
        WebhookDeliveryWorker::new(engine.store.clone(), engine.config.webhook.clone()).unwrap(),
    );
    tokio::spawn(fanout::run_fanout(
        engine.bus.clone(),
        engine.store.clone(),
        worker,
        engine.config.outbox.clone(),
        engine.config.webhook.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The broker redelivers the same event twice.
    let event_id = Uuid::new_v4();
    let payload = serde_json::json!({
        "specversion": "1.0",
        "id": event_id,
        "source": "fluxpay-engine",
        "type": "com.fluxpay.payment.confirmed",
        "time": Utc::now(),
        "datacontenttype": "application/json",
        "tenantid": "tenant-a",
        "data": {}
    });
    let mut headers = std::collections::HashMap::new();
    headers.insert(bus_headers::EVENT_ID.to_string(), event_id.to_string());
    headers.insert(
        bus_headers::EVENT_TYPE.to_string(),
        "payment.confirmed".to_string(),
    );
    headers.insert(bus_headers::TENANT_ID.to_string(), "tenant-a".to_string());

    for _ in 0..2 {
        engine
            .bus
            .publish_with_headers(
                "fluxpay.events.p-1",
                headers.clone(),
                serde_json::to_vec(&payload).unwrap(),
            )
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.store.delivery_rows().len(), 1);
}
