//! HTTP payment-gateway adapter
//!
//! Talks to a Toss-style payments API over JSON. Every failure — transport,
//! timeout, non-2xx, unparseable body — is folded into a `success = false`
//! result per the gateway contract.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{PgApproval, PgCancellation, PgClient, PgConfirmation};
use crate::domain::{Money, OrderId, PaymentMethod};

/// Configuration for the gateway HTTP client.
#[derive(Debug, Clone)]
pub struct PgHttpConfig {
    pub base_url: String,
    pub secret_key: String,
    pub timeout: Duration,
}

impl PgHttpConfig {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            secret_key: secret_key.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct HttpPgClient {
    config: PgHttpConfig,
    http_client: Client,
}

#[derive(Debug, Serialize)]
struct ApprovalRequest<'a> {
    order_id: String,
    amount: String,
    currency: &'a str,
    method: &'a str,
}

#[derive(Debug, Serialize)]
struct ConfirmRequest<'a> {
    payment_key: &'a str,
    order_id: String,
    amount: String,
    currency: &'a str,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    cancel_reason: &'a str,
}

#[derive(Debug, Deserialize)]
struct GatewayPaymentResponse {
    transaction_id: String,
    #[serde(default)]
    payment_key: Option<String>,
}

impl HttpPgClient {
    pub fn new(config: PgHttpConfig) -> Result<Self, String> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| format!("failed to build gateway http client: {e}"))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Gateway auth: `Basic base64("<secret-key>:")`.
    fn auth_header(&self) -> String {
        let token =
            base64::engine::general_purpose::STANDARD.encode(format!("{}:", self.config.secret_key));
        format!("Basic {token}")
    }

    async fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<GatewayPaymentResponse, String> {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .http_client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("gateway timeout: {e}")
                } else {
                    format!("gateway transport error: {e}")
                }
            })?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<GatewayPaymentResponse>()
                .await
                .map_err(|e| format!("gateway response parse error: {e}"))
        } else {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error response".to_string());
            Err(format!("gateway error (status {status}): {error_body}"))
        }
    }
}

#[async_trait]
impl PgClient for HttpPgClient {
    async fn request_approval(
        &self,
        order_id: OrderId,
        amount: &Money,
        method: PaymentMethod,
    ) -> PgApproval {
        let request = ApprovalRequest {
            order_id: order_id.to_string(),
            amount: amount.amount().to_string(),
            currency: amount.currency().as_str(),
            method: method.as_str(),
        };

        match self.post("/v1/payments", &request).await {
            Ok(response) => PgApproval {
                payment_key: response.payment_key.unwrap_or_default(),
                transaction_id: response.transaction_id,
                success: true,
                error_message: None,
            },
            Err(message) => {
                tracing::warn!(order_id = %order_id, error = %message, "gateway approval failed");
                PgApproval::failure(message)
            }
        }
    }

    async fn confirm_payment(
        &self,
        payment_key: &str,
        order_id: OrderId,
        amount: &Money,
    ) -> PgConfirmation {
        let request = ConfirmRequest {
            payment_key,
            order_id: order_id.to_string(),
            amount: amount.amount().to_string(),
            currency: amount.currency().as_str(),
        };

        match self.post("/v1/payments/confirm", &request).await {
            Ok(response) => PgConfirmation {
                transaction_id: response.transaction_id,
                success: true,
                error_message: None,
            },
            Err(message) => {
                tracing::warn!(order_id = %order_id, error = %message, "gateway confirm failed");
                PgConfirmation::failure(message)
            }
        }
    }

    async fn cancel_payment(&self, payment_key: &str, reason: &str) -> PgCancellation {
        let request = CancelRequest {
            cancel_reason: reason,
        };
        let path = format!("/v1/payments/{payment_key}/cancel");

        match self.post(&path, &request).await {
            Ok(response) => PgCancellation {
                transaction_id: response.transaction_id,
                success: true,
                error_message: None,
            },
            Err(message) => {
                tracing::warn!(payment_key = %payment_key, error = %message, "gateway cancel failed");
                PgCancellation::failure(message)
            }
        }
    }
}
