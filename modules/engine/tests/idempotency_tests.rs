//! Idempotency guard: replay, conflict, in-flight coordination, expiry, and
//! cache-tier degradation.

mod common;

use async_trait::async_trait;
use common::{ctx, test_config};
use std::sync::Arc;
use std::time::Duration;

use fluxpay_rs::config::IdempotencyConfig;
use fluxpay_rs::idempotency::{
    CacheError, CachedEntry, IdempotencyCache, IdempotencyGuard, LockOutcome,
};
use fluxpay_rs::repos::memory::InMemoryStore;
use serde_json::json;

const ENDPOINT: &str = "refunds.create";
const KEY: &str = "3f1c9a3e-8f3f-4c1d-9a40-111111111111";

fn guard_with(
    store: Arc<InMemoryStore>,
    cache: Option<Arc<dyn IdempotencyCache>>,
    config: &IdempotencyConfig,
) -> IdempotencyGuard {
    IdempotencyGuard::new(store, cache, config)
}

#[tokio::test]
async fn test_replay_is_byte_identical() {
    let config = test_config();
    let store = Arc::new(InMemoryStore::new());
    let guard = guard_with(store, None, &config.idempotency);
    let ctx = ctx("tenant-a");
    let payload = br#"{"payment_id":"p1","amount":{"amount":"12000","currency":"KRW"}}"#;

    // First attempt: MISS, execute, store.
    let outcome = guard.acquire(&ctx, ENDPOINT, KEY, payload).await.unwrap();
    assert!(matches!(outcome, LockOutcome::Miss));

    let response = json!({"isSuccess": true, "code": "OK", "result": {"refund_id": "ref_1"}});
    guard
        .store(&ctx, ENDPOINT, KEY, payload, response.clone(), 201)
        .await
        .unwrap();

    // Any number of retries replays the identical response.
    for _ in 0..3 {
        match guard.acquire(&ctx, ENDPOINT, KEY, payload).await.unwrap() {
            LockOutcome::Hit { body, http_status } => {
                assert_eq!(http_status, 201);
                assert_eq!(body, response);
            }
            other => panic!("expected Hit, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_same_key_different_payload_conflicts() {
    let config = test_config();
    let store = Arc::new(InMemoryStore::new());
    let guard = guard_with(store, None, &config.idempotency);
    let ctx = ctx("tenant-a");

    assert!(matches!(
        guard.acquire(&ctx, ENDPOINT, KEY, b"payload-a").await.unwrap(),
        LockOutcome::Miss
    ));
    guard
        .store(&ctx, ENDPOINT, KEY, b"payload-a", json!({"ok": true}), 201)
        .await
        .unwrap();

    assert!(matches!(
        guard.acquire(&ctx, ENDPOINT, KEY, b"payload-b").await.unwrap(),
        LockOutcome::Conflict
    ));
}

#[tokio::test]
async fn test_in_flight_lock_reports_processing() {
    let config = test_config();
    let store = Arc::new(InMemoryStore::new());
    let guard = guard_with(store, None, &config.idempotency);
    let ctx = ctx("tenant-a");

    assert!(matches!(
        guard.acquire(&ctx, ENDPOINT, KEY, b"payload").await.unwrap(),
        LockOutcome::Miss
    ));

    // A concurrent retry arrives before the first attempt stored anything.
    assert!(matches!(
        guard.acquire(&ctx, ENDPOINT, KEY, b"payload").await.unwrap(),
        LockOutcome::Processing
    ));

    // Releasing the lock lets the retry execute.
    guard.release(&ctx, ENDPOINT, KEY).await.unwrap();
    assert!(matches!(
        guard.acquire(&ctx, ENDPOINT, KEY, b"payload").await.unwrap(),
        LockOutcome::Miss
    ));
}

#[tokio::test]
async fn test_keys_are_scoped_per_tenant_and_endpoint() {
    let config = test_config();
    let store = Arc::new(InMemoryStore::new());
    let guard = guard_with(store, None, &config.idempotency);
    let ctx_a = ctx("tenant-a");
    let ctx_b = ctx("tenant-b");

    assert!(matches!(
        guard.acquire(&ctx_a, ENDPOINT, KEY, b"p").await.unwrap(),
        LockOutcome::Miss
    ));

    // Same key under another tenant or endpoint is an independent request.
    assert!(matches!(
        guard.acquire(&ctx_b, ENDPOINT, KEY, b"p").await.unwrap(),
        LockOutcome::Miss
    ));
    assert!(matches!(
        guard.acquire(&ctx_a, "payments.create", KEY, b"p").await.unwrap(),
        LockOutcome::Miss
    ));
}

#[tokio::test]
async fn test_expired_entries_are_reusable() {
    let mut config = test_config();
    config.idempotency.ttl = Duration::from_millis(30);
    let store = Arc::new(InMemoryStore::new());
    let guard = guard_with(store, None, &config.idempotency);
    let ctx = ctx("tenant-a");

    assert!(matches!(
        guard.acquire(&ctx, ENDPOINT, KEY, b"p").await.unwrap(),
        LockOutcome::Miss
    ));
    guard
        .store(&ctx, ENDPOINT, KEY, b"p", json!({"ok": true}), 201)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;

    // Past the TTL the entry is treated as absent.
    assert!(matches!(
        guard.acquire(&ctx, ENDPOINT, KEY, b"p").await.unwrap(),
        LockOutcome::Miss
    ));
}

/// Cache tier that always errors.
struct BrokenCache;

#[async_trait]
impl IdempotencyCache for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<CachedEntry>, CacheError> {
        Err(CacheError("cache down".to_string()))
    }

    async fn put(
        &self,
        _key: &str,
        _entry: CachedEntry,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Err(CacheError("cache down".to_string()))
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError("cache down".to_string()))
    }
}

#[tokio::test]
async fn test_cache_outage_falls_back_to_store() {
    let config = test_config();
    let store = Arc::new(InMemoryStore::new());
    let guard = guard_with(store, Some(Arc::new(BrokenCache)), &config.idempotency);
    let ctx = ctx("tenant-a");

    // The guard does not fail open: the authoritative store still serves.
    assert!(matches!(
        guard.acquire(&ctx, ENDPOINT, KEY, b"p").await.unwrap(),
        LockOutcome::Miss
    ));
    guard
        .store(&ctx, ENDPOINT, KEY, b"p", json!({"ok": true}), 201)
        .await
        .unwrap();

    match guard.acquire(&ctx, ENDPOINT, KEY, b"p").await.unwrap() {
        LockOutcome::Hit { http_status, .. } => assert_eq!(http_status, 201),
        other => panic!("expected Hit, got {other:?}"),
    }
}
