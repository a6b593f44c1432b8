//! HTTP surface: envelope shape, idempotent retries over the wire, and
//! tenant scoping of the command surface.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

use common::{ctx, krw, order_command, TestEngine};
use fluxpay_rs::domain::PaymentMethod;

const KEY_1: &str = "a81bc81b-dead-4e5d-abff-90865d1e13b1";
const KEY_2: &str = "b81bc81b-dead-4e5d-abff-90865d1e13b2";

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    tenant: Option<&str>,
    idempotency_key: Option<&str>,
    body: JsonValue,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(tenant) = tenant {
        builder = builder.header("X-Tenant-Id", tenant);
    }
    if let Some(key) = idempotency_key {
        builder = builder.header("X-Idempotency-Key", key);
    }

    let request = builder.body(Body::from(body.to_string())).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
    (status, json)
}

#[tokio::test]
async fn test_create_order_endpoint_runs_saga() {
    let engine = TestEngine::new();
    let router = fluxpay_rs::routes::router(engine.app_state());

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/orders",
        Some("tenant-a"),
        Some(KEY_1),
        json!({
            "user_id": "u1",
            "currency": "KRW",
            "line_items": [{"name": "concert ticket", "unit_price": "10000", "quantity": 2}],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["isSuccess"], true);
    assert_eq!(body["result"]["order"]["status"], "PENDING");
    assert_eq!(body["result"]["order"]["total_amount"]["amount"], "20000");
    assert_eq!(body["result"]["order"]["total_amount"]["currency"], "KRW");
    assert!(body["result"]["payment_id"].is_string());
}

#[tokio::test]
async fn test_refund_idempotent_retry_over_http() {
    let engine = TestEngine::new();
    let router = fluxpay_rs::routes::router(engine.app_state());
    let ctx = ctx("tenant-a");

    // A confirmed payment to refund.
    let order = engine
        .orders
        .create_order(&ctx, order_command("u1"))
        .await
        .unwrap();
    let payment = engine
        .payments
        .create_payment(&ctx, order.id, krw(20_000))
        .await
        .unwrap();
    engine
        .payments
        .request_approval(&ctx, payment.id, PaymentMethod::Card)
        .await
        .unwrap();
    engine
        .payments
        .confirm_payment(&ctx, payment.id)
        .await
        .unwrap();

    let payload = json!({
        "payment_id": payment.id,
        "amount": {"amount": "12000", "currency": "KRW"},
        "reason": "damaged goods",
    });

    // First request creates the refund.
    let (status, first_body) = send(
        &router,
        "POST",
        "/api/v1/refunds",
        Some("tenant-a"),
        Some(KEY_1),
        payload.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first_body["result"]["refund"]["status"], "REQUESTED");

    // Identical retry replays the identical 201.
    let (status, second_body) = send(
        &router,
        "POST",
        "/api/v1/refunds",
        Some("tenant-a"),
        Some(KEY_1),
        payload.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second_body, first_body);

    // Exactly one refund exists.
    let refunds = engine
        .refunds
        .list_refunds_for_payment(&ctx, payment.id)
        .await
        .unwrap();
    assert_eq!(refunds.len(), 1);

    // Same key with an altered payload is a 422 conflict.
    let altered = json!({
        "payment_id": payment.id,
        "amount": {"amount": "13000", "currency": "KRW"},
        "reason": "damaged goods",
    });
    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/refunds",
        Some("tenant-a"),
        Some(KEY_1),
        altered,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VAL_004");
    assert_eq!(body["isSuccess"], false);
}

#[tokio::test]
async fn test_write_requires_idempotency_key() {
    let engine = TestEngine::new();
    let router = fluxpay_rs::routes::router(engine.app_state());

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/orders",
        Some("tenant-a"),
        None,
        json!({"user_id": "u1", "currency": "KRW", "line_items": []}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VAL_002");

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/orders",
        Some("tenant-a"),
        Some("not-a-uuid"),
        json!({"user_id": "u1", "currency": "KRW", "line_items": []}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VAL_003");
}

#[tokio::test]
async fn test_write_requires_tenant() {
    let engine = TestEngine::new();
    let router = fluxpay_rs::routes::router(engine.app_state());

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/orders",
        None,
        Some(KEY_1),
        json!({"user_id": "u1", "currency": "KRW", "line_items": []}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "TNT_001");
}

#[tokio::test]
async fn test_cross_tenant_get_is_not_found() {
    let engine = TestEngine::new();
    let router = fluxpay_rs::routes::router(engine.app_state());
    let ctx_a = ctx("tenant-a");

    let order = engine
        .orders
        .create_order(&ctx_a, order_command("u1"))
        .await
        .unwrap();

    let (status, body) = send(
        &router,
        "GET",
        &format!("/api/v1/orders/{}", order.id),
        Some("tenant-b"),
        None,
        JsonValue::Null,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ORD_001");

    let (status, body) = send(
        &router,
        "GET",
        &format!("/api/v1/orders/{}", order.id),
        Some("tenant-a"),
        None,
        JsonValue::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["order"]["user_id"], "u1");
}

#[tokio::test]
async fn test_health_endpoint() {
    let engine = TestEngine::new();
    let router = fluxpay_rs::routes::router(engine.app_state());

    let (status, body) = send(&router, "GET", "/api/v1/health", None, None, JsonValue::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["status"], "healthy");
}
