//! # CloudEvents Envelope
//!
//! Platform-wide event envelope following the CloudEvents 1.0 spec.
//!
//! Every event the engine emits — to the broker and to webhook subscribers —
//! is a CloudEvents 1.0 JSON document. The `tenantid` extension attribute
//! carries the multi-tenant isolation scope; the stable `id` lets consumers
//! deduplicate under at-least-once delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The CloudEvents spec version this platform emits.
pub const CLOUD_EVENTS_SPEC_VERSION: &str = "1.0";

/// CloudEvents 1.0 envelope.
///
/// # Type Parameter
///
/// * `T` - The event-specific `data` payload type
///
/// # Examples
///
/// ```rust
/// use event_bus::CloudEvent;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct PaymentApproved {
///     payment_id: String,
///     amount: String,
///     currency: String,
/// }
///
/// let event = CloudEvent::new(
///     "fluxpay-engine",
///     "com.fluxpay.payment.approved",
///     "tenant-123",
///     PaymentApproved {
///         payment_id: "7b6d…".to_string(),
///         amount: "20000".to_string(),
///         currency: "KRW".to_string(),
///     },
/// );
/// assert_eq!(event.specversion, "1.0");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEvent<T = serde_json::Value> {
    /// CloudEvents spec version, always "1.0"
    pub specversion: String,

    /// Unique event identifier (consumer-side dedup key)
    pub id: Uuid,

    /// Producing system, e.g. "fluxpay-engine"
    pub source: String,

    /// Event type, e.g. "com.fluxpay.payment.approved"
    #[serde(rename = "type")]
    pub ty: String,

    /// When the event occurred
    pub time: DateTime<Utc>,

    /// Content type of `data`, always "application/json"
    pub datacontenttype: String,

    /// Tenant isolation scope (extension attribute)
    pub tenantid: String,

    /// Event-specific payload
    pub data: T,
}

impl<T> CloudEvent<T> {
    /// Create a new envelope with a fresh event id and the current time.
    pub fn new(
        source: impl Into<String>,
        ty: impl Into<String>,
        tenant_id: impl Into<String>,
        data: T,
    ) -> Self {
        Self {
            specversion: CLOUD_EVENTS_SPEC_VERSION.to_string(),
            id: Uuid::new_v4(),
            source: source.into(),
            ty: ty.into(),
            time: Utc::now(),
            datacontenttype: "application/json".to_string(),
            tenantid: tenant_id.into(),
            data,
        }
    }

    /// Set an explicit event id (the outbox pins the id at enqueue time so
    /// republishing after a retry reuses it).
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Set an explicit occurrence time.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }
}

/// Validate the envelope fields of a serialized CloudEvent.
///
/// # Validation Rules
///
/// - `specversion`: must equal "1.0"
/// - `id`: must be a valid UUID
/// - `source`, `type`: must be non-empty
/// - `time`: must be present
/// - `tenantid`: must be non-empty
///
/// # Errors
///
/// Returns a descriptive error string if validation fails
pub fn validate_cloud_event(event: &serde_json::Value) -> Result<(), String> {
    let specversion = event
        .get("specversion")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid specversion")?;
    if specversion != CLOUD_EVENTS_SPEC_VERSION {
        return Err(format!("Unsupported specversion: {specversion}"));
    }

    let id = event
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid id")?;
    Uuid::parse_str(id).map_err(|_| "id is not a valid UUID".to_string())?;

    let source = event
        .get("source")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid source")?;
    if source.is_empty() {
        return Err("source cannot be empty".to_string());
    }

    let ty = event
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid type")?;
    if ty.is_empty() {
        return Err("type cannot be empty".to_string());
    }

    event
        .get("time")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid time")?;

    let tenant_id = event
        .get("tenantid")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid tenantid")?;
    if tenant_id.is_empty() {
        return Err("tenantid cannot be empty".to_string());
    }

    Ok(())
}
