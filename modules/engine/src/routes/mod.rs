//! HTTP surface
//!
//! Thin JSON handlers mapping requests onto the core services. Every write
//! requires `X-Tenant-Id` (unless tenancy is disabled) and an
//! `X-Idempotency-Key` UUID; write handlers run through the idempotency
//! guard so a retried request replays the stored response byte-for-byte.
//!
//! Response envelope: `{isSuccess, code, message, result}`.

mod health;
mod orders;
mod payments;
mod refunds;

use axum::body::Bytes;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::idempotency::{IdempotencyGuard, LockOutcome};
use crate::saga::{SagaDefinition, SagaOrchestrator};
use crate::services::{OrderService, PaymentService, RefundService};
use crate::tenant::TenantContext;

pub const TENANT_HEADER: &str = "X-Tenant-Id";
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub refunds: Arc<RefundService>,
    pub orchestrator: Arc<SagaOrchestrator>,
    pub payment_saga: SagaDefinition,
    pub guard: Arc<IdempotencyGuard>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health::health))
        .route("/api/v1/orders", post(orders::create_order))
        .route("/api/v1/orders/{id}", get(orders::get_order))
        .route("/api/v1/payments", post(payments::create_payment))
        .route("/api/v1/payments/{id}", get(payments::get_payment))
        .route(
            "/api/v1/payments/{id}/approve",
            post(payments::approve_payment),
        )
        .route(
            "/api/v1/payments/{id}/confirm",
            post(payments::confirm_payment),
        )
        .route(
            "/api/v1/payments/{id}/refunds",
            get(refunds::list_refunds_for_payment),
        )
        .route("/api/v1/refunds", post(refunds::create_refund))
        .route("/api/v1/refunds/{id}", get(refunds::get_refund))
        .with_state(state)
}

/// Success envelope.
pub(crate) fn envelope(result: JsonValue) -> JsonValue {
    json!({
        "isSuccess": true,
        "code": "OK",
        "message": "success",
        "result": result,
    })
}

pub(crate) fn ok_response(result: JsonValue) -> Response {
    (StatusCode::OK, Json(envelope(result))).into_response()
}

impl FromRequestParts<AppState> for TenantContext {
    type Rejection = EngineError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(value) => Ok(TenantContext::from_header(value)?),
            None if !state.config.tenant_enabled => {
                Ok(TenantContext::from_header("default").expect("static tenant id"))
            }
            None => Err(EngineError::TenantMissing),
        }
    }
}

/// Extract and validate the idempotency key (a UUID) from the headers.
pub(crate) fn idempotency_key(headers: &HeaderMap) -> EngineResult<String> {
    let key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(EngineError::IdempotencyKeyMissing)?;
    Uuid::parse_str(key).map_err(|_| EngineError::IdempotencyKeyInvalid)?;
    Ok(key.to_string())
}

/// Run a write operation under the idempotency guard.
///
/// On MISS the operation executes and its `(status, envelope)` is stored for
/// replay; on failure the lock is released so the client's retry can run.
pub(crate) async fn with_idempotency<F, Fut>(
    state: &AppState,
    ctx: &TenantContext,
    endpoint: &str,
    key: &str,
    body: &Bytes,
    operation: F,
) -> EngineResult<Response>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = EngineResult<(StatusCode, JsonValue)>>,
{
    match state.guard.acquire(ctx, endpoint, key, body).await? {
        LockOutcome::Hit { body, http_status } => {
            let status = StatusCode::from_u16(http_status).unwrap_or(StatusCode::OK);
            Ok((status, Json(body)).into_response())
        }
        LockOutcome::Conflict => Err(EngineError::IdempotencyConflict),
        LockOutcome::Processing => Err(EngineError::IdempotencyProcessing),
        LockOutcome::Miss => match operation().await {
            Ok((status, response_body)) => {
                state
                    .guard
                    .store(
                        ctx,
                        endpoint,
                        key,
                        body,
                        response_body.clone(),
                        status.as_u16(),
                    )
                    .await?;
                Ok((status, Json(response_body)).into_response())
            }
            Err(e) => {
                if let Err(release_err) = state.guard.release(ctx, endpoint, key).await {
                    tracing::error!(
                        endpoint,
                        error = %release_err,
                        "failed to release idempotency lock"
                    );
                }
                Err(e)
            }
        },
    }
}

/// Parse a JSON request body, mapping malformed input to a validation error.
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> EngineResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| EngineError::Validation(format!("malformed request body: {e}")))
}
