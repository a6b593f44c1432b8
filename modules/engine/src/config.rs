//! Engine configuration
//!
//! Environment-driven, with defaults matching the documented option table.
//! Durations are configured in seconds unless the variable name says
//! otherwise.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Overall saga deadline; exceeding it in PROCESSING triggers compensation.
    pub timeout: Duration,
    /// Per-step execution deadline.
    pub step_timeout: Duration,
    /// Attempts per compensation step (including the first).
    pub compensation_max_retries: u32,
    /// Fixed delay between compensation attempts.
    pub compensation_retry_delay: Duration,
    /// Instances in PROCESSING/COMPENSATING untouched for this long are
    /// picked up by the recovery sweep.
    pub recovery_stale_after: Duration,
    /// How long a recovery worker's lease on an instance lasts.
    pub lease_duration: Duration,
    /// Recovery sweep interval.
    pub recovery_interval: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            step_timeout: Duration::from_secs(10),
            compensation_max_retries: 3,
            compensation_retry_delay: Duration::from_secs(1),
            recovery_stale_after: Duration::from_secs(60),
            lease_duration: Duration::from_secs(60),
            recovery_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Rows claimed per publisher cycle.
    pub batch_size: i64,
    /// Publish attempts before a row is poisoned (FAILED).
    pub max_retries: i32,
    /// PUBLISHED rows older than this are deleted by cleanup.
    pub retention_days: i64,
    /// IN_FLIGHT rows older than this are swept back to PENDING.
    pub claim_timeout: Duration,
    /// Publisher poll interval.
    pub poll_interval: Duration,
    /// Cleanup task interval.
    pub cleanup_interval: Duration,
    /// Subject prefix; the partition key is appended.
    pub subject_prefix: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            retention_days: 7,
            claim_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(60),
            subject_prefix: "fluxpay.events".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Entry lifetime; LOCKED entries also expire on this horizon.
    pub ttl: Duration,
    /// Expiry sweep interval.
    pub sweep_interval: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefundPolicy {
    /// Days from `confirmed_at` during which refunds are accepted.
    pub period_days: i64,
    /// Maximum non-FAILED refunds per payment.
    pub max_partial_refunds: usize,
    /// Background refund processor interval.
    pub process_interval: Duration,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            period_days: 14,
            max_partial_refunds: 5,
            process_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Delivery attempts before a webhook is poisoned.
    pub max_retries: i32,
    /// First retry delay; doubles each attempt.
    pub base_backoff: Duration,
    /// Cap on the computed backoff (before jitter).
    pub max_backoff: Duration,
    /// Upper bound of the uniform jitter added to every backoff.
    pub jitter: Duration,
    /// Retry scheduler interval.
    pub scheduler_interval: Duration,
    /// Outbound request timeout.
    pub request_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            jitter: Duration::from_secs(1),
            scheduler_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Required when `store_type` is "postgres".
    pub database_url: Option<String>,
    pub nats_url: String,
    /// "nats" or "inmemory".
    pub bus_type: String,
    /// "postgres" or "memory".
    pub store_type: String,
    /// When false, requests without `X-Tenant-Id` run under the "default"
    /// tenant instead of being rejected.
    pub tenant_enabled: bool,
    /// "mock" or "http".
    pub pg_mode: String,
    pub pg_base_url: String,
    pub pg_secret_key: String,

    pub saga: SagaConfig,
    pub outbox: OutboxConfig,
    pub idempotency: IdempotencyConfig,
    pub refund: RefundPolicy,
    pub webhook: WebhookConfig,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let saga_defaults = SagaConfig::default();
        let outbox_defaults = OutboxConfig::default();
        let idem_defaults = IdempotencyConfig::default();
        let refund_defaults = RefundPolicy::default();
        let webhook_defaults = WebhookConfig::default();

        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8080),
            database_url: env::var("DATABASE_URL").ok(),
            nats_url: env_or("NATS_URL", "nats://localhost:4222"),
            bus_type: env_or("BUS_TYPE", "inmemory"),
            store_type: env_or("STORE_TYPE", "memory"),
            tenant_enabled: env_parse("TENANT_ENABLED", true),
            pg_mode: env_or("PG_MODE", "mock"),
            pg_base_url: env_or("PG_BASE_URL", "https://api.tosspayments.com"),
            pg_secret_key: env_or("PG_SECRET_KEY", ""),

            saga: SagaConfig {
                timeout: env_secs("SAGA_TIMEOUT_SECS", saga_defaults.timeout),
                step_timeout: env_secs("SAGA_STEP_TIMEOUT_SECS", saga_defaults.step_timeout),
                compensation_max_retries: env_parse(
                    "SAGA_COMPENSATION_MAX_RETRIES",
                    saga_defaults.compensation_max_retries,
                ),
                compensation_retry_delay: env_secs(
                    "SAGA_COMPENSATION_RETRY_DELAY_SECS",
                    saga_defaults.compensation_retry_delay,
                ),
                recovery_stale_after: env_secs(
                    "SAGA_RECOVERY_STALE_AFTER_SECS",
                    saga_defaults.recovery_stale_after,
                ),
                lease_duration: env_secs("SAGA_LEASE_SECS", saga_defaults.lease_duration),
                recovery_interval: env_secs(
                    "SAGA_RECOVERY_INTERVAL_SECS",
                    saga_defaults.recovery_interval,
                ),
            },
            outbox: OutboxConfig {
                batch_size: env_parse("OUTBOX_BATCH_SIZE", outbox_defaults.batch_size),
                max_retries: env_parse("OUTBOX_MAX_RETRIES", outbox_defaults.max_retries),
                retention_days: env_parse("OUTBOX_RETENTION_DAYS", outbox_defaults.retention_days),
                claim_timeout: env_secs("OUTBOX_CLAIM_TIMEOUT_SECS", outbox_defaults.claim_timeout),
                poll_interval: env_secs("OUTBOX_POLL_INTERVAL_SECS", outbox_defaults.poll_interval),
                cleanup_interval: env_secs(
                    "OUTBOX_CLEANUP_INTERVAL_SECS",
                    outbox_defaults.cleanup_interval,
                ),
                subject_prefix: env_or("OUTBOX_SUBJECT_PREFIX", &outbox_defaults.subject_prefix),
            },
            idempotency: IdempotencyConfig {
                ttl: env_secs("IDEMPOTENCY_TTL_SECS", idem_defaults.ttl),
                sweep_interval: env_secs(
                    "IDEMPOTENCY_SWEEP_INTERVAL_SECS",
                    idem_defaults.sweep_interval,
                ),
            },
            refund: RefundPolicy {
                period_days: env_parse("REFUND_PERIOD_DAYS", refund_defaults.period_days),
                max_partial_refunds: env_parse(
                    "REFUND_MAX_PARTIAL_REFUNDS",
                    refund_defaults.max_partial_refunds,
                ),
                process_interval: env_secs(
                    "REFUND_PROCESS_INTERVAL_SECS",
                    refund_defaults.process_interval,
                ),
            },
            webhook: WebhookConfig {
                max_retries: env_parse("WEBHOOK_MAX_RETRIES", webhook_defaults.max_retries),
                base_backoff: env_secs("WEBHOOK_BASE_BACKOFF_SECS", webhook_defaults.base_backoff),
                max_backoff: env_secs("WEBHOOK_MAX_BACKOFF_SECS", webhook_defaults.max_backoff),
                jitter: env_secs("WEBHOOK_JITTER_SECS", webhook_defaults.jitter),
                scheduler_interval: env_secs(
                    "WEBHOOK_SCHEDULER_INTERVAL_SECS",
                    webhook_defaults.scheduler_interval,
                ),
                request_timeout: env_secs(
                    "WEBHOOK_REQUEST_TIMEOUT_SECS",
                    webhook_defaults.request_timeout,
                ),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: None,
            nats_url: "nats://localhost:4222".to_string(),
            bus_type: "inmemory".to_string(),
            store_type: "memory".to_string(),
            tenant_enabled: true,
            pg_mode: "mock".to_string(),
            pg_base_url: "https://api.tosspayments.com".to_string(),
            pg_secret_key: String::new(),
            saga: SagaConfig::default(),
            outbox: OutboxConfig::default(),
            idempotency: IdempotencyConfig::default(),
            refund: RefundPolicy::default(),
            webhook: WebhookConfig::default(),
        }
    }
}
