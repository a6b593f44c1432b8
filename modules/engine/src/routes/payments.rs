//! Payment endpoints

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{envelope, idempotency_key, ok_response, parse_body, with_idempotency, AppState};
use crate::domain::{Money, OrderId, PaymentId, PaymentMethod};
use crate::error::EngineResult;
use crate::tenant::TenantContext;

#[derive(Debug, Deserialize)]
struct CreatePaymentRequest {
    order_id: Uuid,
    amount: Money,
}

#[derive(Debug, Deserialize)]
struct ApprovePaymentRequest {
    method: PaymentMethod,
}

pub async fn create_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    headers: HeaderMap,
    body: Bytes,
) -> EngineResult<Response> {
    let key = idempotency_key(&headers)?;
    let request: CreatePaymentRequest = parse_body(&body)?;

    let state_ref = &state;
    let ctx_ref = &ctx;
    with_idempotency(&state, &ctx, "payments.create", &key, &body, || async move {
        let payment = state_ref
            .payments
            .create_payment(ctx_ref, OrderId(request.order_id), request.amount)
            .await?;

        Ok((
            StatusCode::CREATED,
            envelope(json!({ "payment": payment })),
        ))
    })
    .await
}

pub async fn get_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> EngineResult<Response> {
    let payment = state.payments.get_payment(&ctx, PaymentId(id)).await?;
    Ok(ok_response(json!({ "payment": payment })))
}

pub async fn approve_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> EngineResult<Response> {
    let key = idempotency_key(&headers)?;
    let request: ApprovePaymentRequest = parse_body(&body)?;

    let state_ref = &state;
    let ctx_ref = &ctx;
    with_idempotency(&state, &ctx, "payments.approve", &key, &body, || async move {
        let payment = state_ref
            .payments
            .request_approval(ctx_ref, PaymentId(id), request.method)
            .await?;

        Ok((StatusCode::OK, envelope(json!({ "payment": payment }))))
    })
    .await
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> EngineResult<Response> {
    let key = idempotency_key(&headers)?;

    let state_ref = &state;
    let ctx_ref = &ctx;
    with_idempotency(&state, &ctx, "payments.confirm", &key, &body, || async move {
        let payment = state_ref
            .payments
            .confirm_payment(ctx_ref, PaymentId(id))
            .await?;

        Ok((StatusCode::OK, envelope(json!({ "payment": payment }))))
    })
    .await
}
