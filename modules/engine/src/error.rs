//! Engine error taxonomy
//!
//! One closed error enum with a stable wire code and HTTP status per
//! variant. Gateway, broker, and webhook transport errors never reach this
//! type raw: each is contained at its boundary and translated into a domain
//! failure first.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::domain::order::OrderError;
use crate::domain::{MoneyError, TransitionError};
use crate::repos::RepoError;
use crate::tenant::TenantError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    // Orders
    #[error("order not found")]
    OrderNotFound,
    #[error("order already processed")]
    OrderAlreadyProcessed,
    #[error("invalid order transition: {0}")]
    InvalidOrderTransition(String),

    // Payments
    #[error("payment not found")]
    PaymentNotFound,
    #[error("a payment already exists for this order")]
    PaymentAlreadyExists,
    #[error("invalid payment state: {0}")]
    InvalidPaymentState(String),
    #[error("payment gateway rejected the request: {0}")]
    PgRejected(String),

    // Refunds
    #[error("refund not found")]
    RefundNotFound,
    #[error("invalid refund state: {0}")]
    InvalidRefundState(String),
    #[error("refund amount exceeds the refundable balance")]
    RefundAmountExceeded,
    #[error("refund window has expired")]
    RefundPeriodExpired,
    #[error("partial refund count limit reached")]
    RefundCountExceeded,
    #[error("monetary rule violated: {0}")]
    Money(String),

    // Request validation & idempotency
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("idempotency key missing")]
    IdempotencyKeyMissing,
    #[error("idempotency key invalid")]
    IdempotencyKeyInvalid,
    #[error("idempotency key reused with a different payload")]
    IdempotencyConflict,
    #[error("request with this idempotency key is still being processed")]
    IdempotencyProcessing,
    #[error("webhook signature invalid")]
    WebhookSignatureInvalid,

    // Tenancy
    #[error("tenant id missing")]
    TenantMissing,
    #[error("unknown tenant: {0}")]
    TenantUnknown(String),

    // System
    #[error("internal error: {0}")]
    Internal(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),
}

impl EngineError {
    /// Stable wire code for the standard response envelope.
    pub fn code(&self) -> &'static str {
        use EngineError::*;
        match self {
            OrderNotFound => "ORD_001",
            OrderAlreadyProcessed => "ORD_002",
            InvalidOrderTransition(_) => "ORD_003",
            PaymentNotFound => "PAY_001",
            PaymentAlreadyExists => "PAY_002",
            InvalidPaymentState(_) => "PAY_003",
            PgRejected(_) => "PAY_004",
            RefundNotFound => "PAY_005",
            InvalidRefundState(_) => "PAY_006",
            RefundAmountExceeded => "PAY_007",
            RefundPeriodExpired => "PAY_008",
            RefundCountExceeded => "PAY_009",
            Money(_) => "PAY_010",
            Validation(_) => "VAL_001",
            IdempotencyKeyMissing => "VAL_002",
            IdempotencyKeyInvalid => "VAL_003",
            IdempotencyConflict => "VAL_004",
            IdempotencyProcessing => "VAL_005",
            WebhookSignatureInvalid => "VAL_006",
            TenantMissing => "TNT_001",
            TenantUnknown(_) => "TNT_002",
            Internal(_) => "SYS_001",
            Unavailable(_) => "SYS_002",
            UpstreamTimeout(_) => "SYS_003",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        use EngineError::*;
        match self {
            OrderNotFound | PaymentNotFound | RefundNotFound => StatusCode::NOT_FOUND,
            OrderAlreadyProcessed
            | InvalidOrderTransition(_)
            | PaymentAlreadyExists
            | InvalidPaymentState(_)
            | InvalidRefundState(_)
            | IdempotencyProcessing => StatusCode::CONFLICT,
            PgRejected(_)
            | RefundAmountExceeded
            | RefundPeriodExpired
            | RefundCountExceeded
            | IdempotencyConflict => StatusCode::UNPROCESSABLE_ENTITY,
            Money(_) | Validation(_) | IdempotencyKeyMissing | IdempotencyKeyInvalid
            | TenantMissing => StatusCode::BAD_REQUEST,
            WebhookSignatureInvalid => StatusCode::UNAUTHORIZED,
            TenantUnknown(_) => StatusCode::FORBIDDEN,
            Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.http_status();

        // 5xx details stay in the logs; clients get the code plus a
        // correlation id to quote back.
        let message = if status.is_server_error() {
            let correlation_id = Uuid::new_v4();
            tracing::error!(
                code = self.code(),
                correlation_id = %correlation_id,
                error = %self,
                "request failed"
            );
            format!("internal error (correlation id {correlation_id})")
        } else {
            self.to_string()
        };

        let body = json!({
            "isSuccess": false,
            "code": self.code(),
            "message": message,
            "result": null,
        });

        (status, Json(body)).into_response()
    }
}

impl From<TransitionError> for EngineError {
    fn from(e: TransitionError) -> Self {
        let detail = e.to_string();
        match e.entity {
            "order" => EngineError::InvalidOrderTransition(detail),
            "refund" => EngineError::InvalidRefundState(detail),
            "payment" => EngineError::InvalidPaymentState(detail),
            _ => EngineError::Internal(detail),
        }
    }
}

impl From<MoneyError> for EngineError {
    fn from(e: MoneyError) -> Self {
        EngineError::Money(e.to_string())
    }
}

impl From<OrderError> for EngineError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::EmptyLineItems | OrderError::InvalidQuantity(_) => {
                EngineError::Validation(e.to_string())
            }
            OrderError::Money(m) => m.into(),
            OrderError::Transition(t) => t.into(),
        }
    }
}

impl From<TenantError> for EngineError {
    fn from(e: TenantError) -> Self {
        match e {
            TenantError::Missing => EngineError::TenantMissing,
            TenantError::Unknown(t) => EngineError::TenantUnknown(t),
        }
    }
}

impl From<RepoError> for EngineError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::TenantMissing => EngineError::TenantMissing,
            // An optimistic-lock race: the aggregate moved between read and
            // write. Surfaced as an invalid-state conflict per the
            // concurrency model.
            RepoError::Conflict => {
                EngineError::InvalidPaymentState("conflicting concurrent update".to_string())
            }
            RepoError::Duplicate(what) => {
                EngineError::Validation(format!("duplicate {what}"))
            }
            RepoError::NotFound => {
                EngineError::Internal("row disappeared mid-operation".to_string())
            }
            RepoError::Storage(msg) => EngineError::Internal(msg),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Internal(format!("serialization error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_pinned_codes() {
        assert_eq!(EngineError::RefundAmountExceeded.code(), "PAY_007");
        assert_eq!(EngineError::IdempotencyConflict.code(), "VAL_004");
        assert_eq!(EngineError::OrderNotFound.code(), "ORD_001");
        assert_eq!(EngineError::TenantMissing.code(), "TNT_001");
    }

    #[test]
    fn test_http_dispositions() {
        assert_eq!(
            EngineError::IdempotencyConflict.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            EngineError::IdempotencyProcessing.http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(EngineError::OrderNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            EngineError::Unavailable("cache and store down".into()).http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_transition_error_dispatch() {
        let e: EngineError = TransitionError::new("order", "COMPLETED", "PAID").into();
        assert_eq!(e.code(), "ORD_003");

        let e: EngineError = TransitionError::new("payment", "READY", "CONFIRMED").into();
        assert_eq!(e.code(), "PAY_003");

        let e: EngineError = TransitionError::new("refund", "REQUESTED", "COMPLETED").into();
        assert_eq!(e.code(), "PAY_006");
    }
}
