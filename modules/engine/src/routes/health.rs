use axum::response::Response;
use serde_json::json;

use super::ok_response;

pub async fn health() -> Response {
    ok_response(json!({
        "status": "healthy",
        "service": "fluxpay-engine",
    }))
}
