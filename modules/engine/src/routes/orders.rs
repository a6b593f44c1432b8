//! Order endpoints
//!
//! Creating an order runs the payment saga (create order, then its READY
//! payment) so the pair either exists together or is fully compensated.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use super::{envelope, idempotency_key, ok_response, parse_body, with_idempotency, AppState};
use crate::domain::{Currency, LineItem, Money, OrderId, PaymentId};
use crate::error::{EngineError, EngineResult};
use crate::saga::payment_saga::keys;
use crate::saga::SagaContext;
use crate::services::CreateOrderCommand;
use crate::tenant::TenantContext;
use rust_decimal::Decimal;

#[derive(Debug, Deserialize)]
struct LineItemRequest {
    name: String,
    unit_price: Decimal,
    quantity: i64,
}

#[derive(Debug, Deserialize)]
struct CreateOrderRequest {
    user_id: String,
    currency: Currency,
    line_items: Vec<LineItemRequest>,
    #[serde(default)]
    metadata: JsonValue,
}

pub async fn create_order(
    State(state): State<AppState>,
    ctx: TenantContext,
    headers: HeaderMap,
    body: Bytes,
) -> EngineResult<Response> {
    let key = idempotency_key(&headers)?;
    let request: CreateOrderRequest = parse_body(&body)?;

    let mut line_items = Vec::with_capacity(request.line_items.len());
    for item in request.line_items {
        line_items.push(LineItem {
            name: item.name,
            unit_price: Money::new(request.currency, item.unit_price)?,
            quantity: item.quantity,
        });
    }

    let command = CreateOrderCommand {
        user_id: request.user_id,
        currency: request.currency,
        line_items,
        metadata: request.metadata,
    };

    let state_ref = &state;
    let ctx_ref = &ctx;
    let key_ref = key.as_str();
    with_idempotency(&state, &ctx, "orders.create", &key, &body, || async move {
        // The idempotency key doubles as the saga correlation id, so a
        // replayed request cannot start a second saga.
        let mut saga_ctx = SagaContext::new(ctx_ref.clone(), key_ref);
        saga_ctx.put(keys::ORDER_REQUEST, &command)?;

        let outcome = state_ref
            .orchestrator
            .run(&state_ref.payment_saga, saga_ctx)
            .await?;

        if !outcome.is_completed() {
            return Err(outcome.failure.unwrap_or_else(|| {
                EngineError::Internal(
                    outcome
                        .error
                        .unwrap_or_else(|| "order creation failed".to_string()),
                )
            }));
        }

        let order_id: OrderId = outcome.context.require(keys::ORDER_ID)?;
        let payment_id: PaymentId = outcome.context.require(keys::PAYMENT_ID)?;
        let order = state_ref.orders.get_order(ctx_ref, order_id).await?;

        Ok((
            StatusCode::CREATED,
            envelope(json!({
                "order": order,
                "payment_id": payment_id,
            })),
        ))
    })
    .await
}

pub async fn get_order(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> EngineResult<Response> {
    let order = state.orders.get_order(&ctx, OrderId(id)).await?;
    Ok(ok_response(json!({ "order": order })))
}
