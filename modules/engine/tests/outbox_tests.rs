//! Outbox publisher: broker-outage retry cycles, poisoning, stale-claim
//! recovery, and retention cleanup.

mod common;

use common::{ctx, order_command, TestEngine};
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;

use event_bus::{headers, EventBus};
use fluxpay_rs::outbox::OutboxStatus;
use fluxpay_rs::repos::OutboxRepository;

#[tokio::test]
async fn test_broker_outage_retries_then_publishes_once() {
    let engine = TestEngine::new();
    let ctx = ctx("tenant-a");

    engine
        .orders
        .create_order(&ctx, order_command("u1"))
        .await
        .unwrap();
    assert_eq!(engine.store.outbox_rows().len(), 1);

    let mut stream = engine.bus.subscribe("fluxpay.events.>").await.unwrap();

    // Broker down for two publisher cycles.
    engine.bus.fail_next_publishes(2);

    // Cycle 1: PENDING -> IN_FLIGHT -> PENDING (retry 1).
    let (published, failed) = engine.publisher.publish_batch().await.unwrap();
    assert_eq!((published, failed), (0, 1));
    let row = &engine.store.outbox_rows()[0];
    assert_eq!(row.status, OutboxStatus::Pending);
    assert_eq!(row.retry_count, 1);
    assert!(row.last_error.is_some());

    // Backoff: the row is not claimable until next_attempt_at.
    let (published, failed) = engine.publisher.publish_batch().await.unwrap();
    assert_eq!((published, failed), (0, 0));

    // Cycle 2 (after backoff): retry 2.
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let (published, failed) = engine.publisher.publish_batch().await.unwrap();
    assert_eq!((published, failed), (0, 1));
    assert_eq!(engine.store.outbox_rows()[0].retry_count, 2);

    // Broker recovered: the event publishes.
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    let (published, failed) = engine.publisher.publish_batch().await.unwrap();
    assert_eq!((published, failed), (1, 0));

    let row = &engine.store.outbox_rows()[0];
    assert_eq!(row.status, OutboxStatus::Published);
    assert!(row.published_at.is_some());

    // Exactly one delivery reached the broker (dedup by event id).
    let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("timeout")
        .expect("stream ended");
    let mut seen = HashSet::new();
    seen.insert(msg.header(headers::EVENT_ID).unwrap().to_string());
    assert!(
        tokio::time::timeout(Duration::from_millis(200), stream.next())
            .await
            .is_err(),
        "no duplicate delivery expected"
    );
    assert_eq!(seen.len(), 1);
}

#[tokio::test]
async fn test_retries_exhausted_poisons_row() {
    let mut config = common::test_config();
    config.outbox.max_retries = 0;
    let engine = TestEngine::with_config(config);
    let ctx = ctx("tenant-a");

    engine
        .orders
        .create_order(&ctx, order_command("u1"))
        .await
        .unwrap();

    engine.bus.fail_next_publishes(1);
    let (published, failed) = engine.publisher.publish_batch().await.unwrap();
    assert_eq!((published, failed), (0, 1));

    let row = &engine.store.outbox_rows()[0];
    assert_eq!(row.status, OutboxStatus::Failed);
    assert!(row.last_error.is_some());

    // A poisoned row is never claimed again.
    let (published, failed) = engine.publisher.publish_batch().await.unwrap();
    assert_eq!((published, failed), (0, 0));
}

#[tokio::test]
async fn test_row_failure_does_not_abort_batch() {
    let engine = TestEngine::new();
    let ctx = ctx("tenant-a");

    // Three independent orders -> three outbox rows.
    for user in ["u1", "u2", "u3"] {
        engine
            .orders
            .create_order(&ctx, order_command(user))
            .await
            .unwrap();
    }

    // Only the first publish of the batch fails.
    engine.bus.fail_next_publishes(1);
    let (published, failed) = engine.publisher.publish_batch().await.unwrap();
    assert_eq!(failed, 1);
    assert_eq!(published, 2);

    let statuses: Vec<OutboxStatus> = engine
        .store
        .outbox_rows()
        .iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == OutboxStatus::Published)
            .count(),
        2
    );
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == OutboxStatus::Pending)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_stale_claims_return_to_pending() {
    let engine = TestEngine::new();
    let ctx = ctx("tenant-a");

    engine
        .orders
        .create_order(&ctx, order_command("u1"))
        .await
        .unwrap();

    // A publisher claimed the row and crashed.
    let claimed = engine
        .store
        .claim_batch(10, chrono::Utc::now())
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(engine.store.outbox_rows()[0].status, OutboxStatus::InFlight);

    // The sweep rescues it once the claim times out.
    let released = engine
        .store
        .release_stale_claims(Duration::from_secs(0))
        .await
        .unwrap();
    assert_eq!(released, 1);
    assert_eq!(engine.store.outbox_rows()[0].status, OutboxStatus::Pending);
}

#[tokio::test]
async fn test_retention_prunes_only_published() {
    let engine = TestEngine::new();
    let ctx = ctx("tenant-a");

    engine
        .orders
        .create_order(&ctx, order_command("u1"))
        .await
        .unwrap();
    engine
        .orders
        .create_order(&ctx, order_command("u2"))
        .await
        .unwrap();

    // Publish one row, leave the other pending.
    let claimed = engine
        .store
        .claim_batch(1, chrono::Utc::now())
        .await
        .unwrap();
    engine.store.mark_published(claimed[0].seq).await.unwrap();

    let deleted = engine
        .store
        .delete_published_before(chrono::Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let remaining = engine.store.outbox_rows();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].status, OutboxStatus::Pending);
}
