//! Idempotency guard
//!
//! Deduplicates retried write requests so re-delivery of the same logical
//! command produces the same observable outcome. Two tiers share one
//! contract: the persistent store (authoritative, atomic insert-or-inspect)
//! and an optional cache accelerator. A cache outage falls back to the
//! store; only when the store is also unreachable does the guard refuse the
//! request — it never fails open.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::IdempotencyConfig;
use crate::error::{EngineError, EngineResult};
use crate::repos::IdempotencyRepository;
use crate::tenant::TenantContext;

/// A completed request's serialized outcome, replayed on retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    /// Hash of the request payload the response was produced for.
    pub payload_hash: String,
    pub body: JsonValue,
    pub http_status: u16,
}

/// Store-level result of the atomic insert-or-inspect.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    /// No live entry existed; a LOCKED entry was inserted. Caller executes.
    Acquired,
    /// A STORED entry with the same payload hash exists.
    Hit(StoredResponse),
    /// A STORED entry exists but the payload hash differs.
    Conflict,
    /// An unexpired LOCKED entry exists; another attempt is in flight.
    Processing,
}

/// Guard-level outcome handed to the request handler.
#[derive(Debug, Clone)]
pub enum LockOutcome {
    /// Proceed; the caller must `store` or `release` afterwards.
    Miss,
    /// Replay the cached response verbatim.
    Hit { body: JsonValue, http_status: u16 },
    /// Same key, different payload: application-level conflict.
    Conflict,
    /// A previous attempt is still running: retry later.
    Processing,
}

/// Hex SHA-256 of a request payload.
pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

#[derive(Debug, thiserror::Error)]
#[error("cache error: {0}")]
pub struct CacheError(pub String);

/// Cached STORED entry. Only completed responses are cached; lock state
/// lives solely in the authoritative store.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub response: StoredResponse,
}

/// Accelerator tier contract. A Redis `SET NX`-style implementation slots in
/// here; the in-memory implementation below serves single-process setups.
#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheError>;
    async fn put(&self, key: &str, entry: CachedEntry, ttl: Duration) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// Process-local cache tier.
#[derive(Default)]
pub struct InMemoryIdempotencyCache {
    entries: Mutex<HashMap<String, (CachedEntry, Instant)>>,
}

impl InMemoryIdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyCache for InMemoryIdempotencyCache {
    async fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheError> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        match entries.get(key) {
            Some((_, expires)) if *expires <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((entry, _)) => Ok(Some(entry.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, entry: CachedEntry, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(key.to_string(), (entry, Instant::now() + ttl));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.remove(key);
        Ok(())
    }
}

/// Two-tier request deduplication.
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyRepository>,
    cache: Option<Arc<dyn IdempotencyCache>>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(
        store: Arc<dyn IdempotencyRepository>,
        cache: Option<Arc<dyn IdempotencyCache>>,
        config: &IdempotencyConfig,
    ) -> Self {
        Self {
            store,
            cache,
            ttl: config.ttl,
        }
    }

    fn cache_key(ctx: &TenantContext, endpoint: &str, key: &str) -> String {
        format!("{}:{}:{}", ctx.tenant_str(), endpoint, key)
    }

    /// Acquire the lock for `(tenant, endpoint, key)` or learn the fate of a
    /// previous attempt. On `Miss` the caller owns a LOCKED entry and must
    /// finish with [`store`](Self::store) or [`release`](Self::release).
    pub async fn acquire(
        &self,
        ctx: &TenantContext,
        endpoint: &str,
        key: &str,
        payload: &[u8],
    ) -> EngineResult<LockOutcome> {
        let payload_hash = hash_payload(payload);

        // Cache tier first: a completed response can be replayed without
        // touching the store. Cache failures degrade to the store.
        if let Some(cache) = &self.cache {
            match cache.get(&Self::cache_key(ctx, endpoint, key)).await {
                Ok(Some(cached)) => {
                    if cached.response.payload_hash == payload_hash {
                        return Ok(LockOutcome::Hit {
                            body: cached.response.body,
                            http_status: cached.response.http_status,
                        });
                    }
                    return Ok(LockOutcome::Conflict);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "idempotency cache unavailable, using store");
                }
            }
        }

        let outcome = self
            .store
            .try_acquire(ctx, endpoint, key, &payload_hash, self.ttl)
            .await
            .map_err(|e| EngineError::Unavailable(format!("idempotency store: {e}")))?;

        match outcome {
            AcquireOutcome::Acquired => Ok(LockOutcome::Miss),
            AcquireOutcome::Hit(response) => {
                self.backfill_cache(ctx, endpoint, key, &response).await;
                Ok(LockOutcome::Hit {
                    body: response.body,
                    http_status: response.http_status,
                })
            }
            AcquireOutcome::Conflict => Ok(LockOutcome::Conflict),
            AcquireOutcome::Processing => Ok(LockOutcome::Processing),
        }
    }

    /// Promote the LOCKED entry to STORED with the response to replay.
    pub async fn store(
        &self,
        ctx: &TenantContext,
        endpoint: &str,
        key: &str,
        payload: &[u8],
        body: JsonValue,
        http_status: u16,
    ) -> EngineResult<()> {
        let response = StoredResponse {
            payload_hash: hash_payload(payload),
            body,
            http_status,
        };

        self.store
            .store_response(ctx, endpoint, key, &response, self.ttl)
            .await
            .map_err(|e| EngineError::Unavailable(format!("idempotency store: {e}")))?;

        self.backfill_cache(ctx, endpoint, key, &response).await;
        Ok(())
    }

    /// Drop the LOCKED entry after a processing failure so the client's
    /// retry can run.
    pub async fn release(
        &self,
        ctx: &TenantContext,
        endpoint: &str,
        key: &str,
    ) -> EngineResult<()> {
        self.store
            .release(ctx, endpoint, key)
            .await
            .map_err(|e| EngineError::Unavailable(format!("idempotency store: {e}")))?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remove(&Self::cache_key(ctx, endpoint, key)).await {
                tracing::warn!(error = %e, "failed to evict idempotency cache entry");
            }
        }
        Ok(())
    }

    async fn backfill_cache(
        &self,
        ctx: &TenantContext,
        endpoint: &str,
        key: &str,
        response: &StoredResponse,
    ) {
        if let Some(cache) = &self.cache {
            let entry = CachedEntry {
                response: response.clone(),
            };
            if let Err(e) = cache
                .put(&Self::cache_key(ctx, endpoint, key), entry, self.ttl)
                .await
            {
                tracing::warn!(error = %e, "failed to backfill idempotency cache");
            }
        }
    }
}

/// Periodic sweep deleting entries past `expires_at`.
pub async fn run_expiry_sweeper(store: Arc<dyn IdempotencyRepository>, config: IdempotencyConfig) {
    tracing::info!(
        interval_secs = config.sweep_interval.as_secs(),
        "starting idempotency expiry sweeper"
    );

    let mut ticker = tokio::time::interval(config.sweep_interval);

    loop {
        ticker.tick().await;

        match store.purge_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(purged) => {
                tracing::debug!(purged, "purged expired idempotency entries");
            }
            Err(e) => {
                tracing::error!(error = %e, "idempotency expiry sweep failed");
            }
        }
    }
}
