//! Refund endpoints

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{envelope, idempotency_key, ok_response, parse_body, with_idempotency, AppState};
use crate::domain::{Money, PaymentId, RefundId};
use crate::error::{EngineError, EngineResult};
use crate::tenant::TenantContext;

#[derive(Debug, Deserialize)]
struct CreateRefundRequest {
    payment_id: Uuid,
    amount: Money,
    reason: Option<String>,
}

pub async fn create_refund(
    State(state): State<AppState>,
    ctx: TenantContext,
    headers: HeaderMap,
    body: Bytes,
) -> EngineResult<Response> {
    let key = idempotency_key(&headers)?;
    let request: CreateRefundRequest = parse_body(&body)?;

    let state_ref = &state;
    let ctx_ref = &ctx;
    with_idempotency(&state, &ctx, "refunds.create", &key, &body, || async move {
        let refund = state_ref
            .refunds
            .create_refund(
                ctx_ref,
                PaymentId(request.payment_id),
                request.amount,
                request.reason,
            )
            .await?;

        Ok((StatusCode::CREATED, envelope(json!({ "refund": refund }))))
    })
    .await
}

pub async fn get_refund(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> EngineResult<Response> {
    let refund_id =
        RefundId::parse(&id).map_err(|e| EngineError::Validation(e.to_string()))?;
    let refund = state.refunds.get_refund(&ctx, &refund_id).await?;
    Ok(ok_response(json!({ "refund": refund })))
}

pub async fn list_refunds_for_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> EngineResult<Response> {
    let refunds = state
        .refunds
        .list_refunds_for_payment(&ctx, PaymentId(id))
        .await?;
    Ok(ok_response(json!({ "refunds": refunds })))
}
