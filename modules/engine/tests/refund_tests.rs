//! Refund rules: the amount cap, the partial-refund limit, the window, and
//! the REFUNDED promotion on full refund.

mod common;

use common::{ctx, krw, order_command, TestEngine};

use fluxpay_rs::domain::{Payment, PaymentMethod, PaymentStatus, RefundStatus};
use fluxpay_rs::repos::PaymentRepository;
use fluxpay_rs::tenant::TenantContext;

/// Drive an order's payment to CONFIRMED and return it.
async fn confirmed_payment(engine: &TestEngine, ctx: &TenantContext) -> Payment {
    let order = engine
        .orders
        .create_order(ctx, order_command("u1"))
        .await
        .unwrap();
    let payment = engine
        .payments
        .create_payment(ctx, order.id, krw(20_000))
        .await
        .unwrap();
    engine
        .payments
        .request_approval(ctx, payment.id, PaymentMethod::Card)
        .await
        .unwrap();
    engine
        .payments
        .confirm_payment(ctx, payment.id)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_refund_cap_rejects_second_oversized_refund() {
    let engine = TestEngine::new();
    let ctx = ctx("tenant-a");
    let payment = confirmed_payment(&engine, &ctx).await;

    // First ₩12,000 refund on the ₩20,000 payment: accepted and completed.
    let refund = engine
        .refunds
        .create_refund(&ctx, payment.id, krw(12_000), Some("damaged".to_string()))
        .await
        .unwrap();
    assert_eq!(refund.status, RefundStatus::Requested);

    engine.refunds.process_pending(10).await.unwrap();
    let refund = engine.refunds.get_refund(&ctx, &refund.id).await.unwrap();
    assert_eq!(refund.status, RefundStatus::Completed);
    assert!(refund
        .pg_refund_id
        .as_deref()
        .unwrap()
        .starts_with("toss_refund_"));

    // Second ₩12,000 refund exceeds the remaining ₩8,000: rejected
    // synchronously.
    let err = engine
        .refunds
        .create_refund(&ctx, payment.id, krw(12_000), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PAY_007");

    // The remainder still goes through.
    engine
        .refunds
        .create_refund(&ctx, payment.id, krw(8_000), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_pending_refunds_count_against_cap() {
    let engine = TestEngine::new();
    let ctx = ctx("tenant-a");
    let payment = confirmed_payment(&engine, &ctx).await;

    // Not yet processed; still holds ₩12,000 of the cap.
    engine
        .refunds
        .create_refund(&ctx, payment.id, krw(12_000), None)
        .await
        .unwrap();

    let err = engine
        .refunds
        .create_refund(&ctx, payment.id, krw(12_000), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PAY_007");
}

#[tokio::test]
async fn test_full_refund_promotes_payment_to_refunded() {
    let engine = TestEngine::new();
    let ctx = ctx("tenant-a");
    let payment = confirmed_payment(&engine, &ctx).await;

    let refund = engine
        .refunds
        .create_refund(&ctx, payment.id, krw(20_000), None)
        .await
        .unwrap();
    engine.refunds.process_pending(10).await.unwrap();

    let refund = engine.refunds.get_refund(&ctx, &refund.id).await.unwrap();
    assert_eq!(refund.status, RefundStatus::Completed);

    let payment = engine.payments.get_payment(&ctx, payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);

    // The completion event announces the promotion.
    let completed_event = engine
        .store
        .outbox_rows()
        .into_iter()
        .find(|e| e.event_type == "refund.completed")
        .expect("refund.completed emitted");
    assert_eq!(completed_event.payload["data"]["payment_refunded"], true);
}

#[tokio::test]
async fn test_partial_refunds_promote_only_at_full_amount() {
    let engine = TestEngine::new();
    let ctx = ctx("tenant-a");
    let payment = confirmed_payment(&engine, &ctx).await;

    engine
        .refunds
        .create_refund(&ctx, payment.id, krw(12_000), None)
        .await
        .unwrap();
    engine.refunds.process_pending(10).await.unwrap();
    let current = engine.payments.get_payment(&ctx, payment.id).await.unwrap();
    assert_eq!(current.status, PaymentStatus::Confirmed);

    engine
        .refunds
        .create_refund(&ctx, payment.id, krw(8_000), None)
        .await
        .unwrap();
    engine.refunds.process_pending(10).await.unwrap();
    let current = engine.payments.get_payment(&ctx, payment.id).await.unwrap();
    assert_eq!(current.status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn test_partial_refund_count_limit() {
    let mut config = common::test_config();
    config.refund.max_partial_refunds = 2;
    let engine = TestEngine::with_config(config);
    let ctx = ctx("tenant-a");
    let payment = confirmed_payment(&engine, &ctx).await;

    engine
        .refunds
        .create_refund(&ctx, payment.id, krw(1_000), None)
        .await
        .unwrap();
    engine
        .refunds
        .create_refund(&ctx, payment.id, krw(1_000), None)
        .await
        .unwrap();

    let err = engine
        .refunds
        .create_refund(&ctx, payment.id, krw(1_000), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PAY_009");
}

#[tokio::test]
async fn test_refund_window_expired() {
    let engine = TestEngine::new();
    let ctx = ctx("tenant-a");
    let mut payment = confirmed_payment(&engine, &ctx).await;

    // Age the confirmation past the window.
    let expected_version = payment.version;
    payment.confirmed_at = Some(
        chrono::Utc::now()
            - chrono::Duration::days(engine.config.refund.period_days + 1),
    );
    payment.version += 1;
    engine
        .store
        .save(&ctx, &payment, expected_version, &[])
        .await
        .unwrap();

    let err = engine
        .refunds
        .create_refund(&ctx, payment.id, krw(1_000), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PAY_008");
}

#[tokio::test]
async fn test_refund_requires_confirmed_payment() {
    let engine = TestEngine::new();
    let ctx = ctx("tenant-a");

    let order = engine
        .orders
        .create_order(&ctx, order_command("u1"))
        .await
        .unwrap();
    let payment = engine
        .payments
        .create_payment(&ctx, order.id, krw(20_000))
        .await
        .unwrap();

    // READY payment: refunds are not acceptable yet.
    let err = engine
        .refunds
        .create_refund(&ctx, payment.id, krw(1_000), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PAY_006");
}

#[tokio::test]
async fn test_failed_gateway_cancel_fails_refund() {
    let engine = TestEngine::new();
    let ctx = ctx("tenant-a");
    let payment = confirmed_payment(&engine, &ctx).await;

    let refund = engine
        .refunds
        .create_refund(&ctx, payment.id, krw(5_000), None)
        .await
        .unwrap();

    engine.pg.fail_cancellations("gateway rejected cancel");
    engine.refunds.process_pending(10).await.unwrap();

    let refund = engine.refunds.get_refund(&ctx, &refund.id).await.unwrap();
    assert_eq!(refund.status, RefundStatus::Failed);
    assert_eq!(
        refund.error_message.as_deref(),
        Some("gateway rejected cancel")
    );

    // A FAILED refund releases its hold on the cap.
    engine.pg.succeed();
    engine
        .refunds
        .create_refund(&ctx, payment.id, krw(20_000), None)
        .await
        .unwrap();

    let event_types: Vec<String> = engine
        .store
        .outbox_rows()
        .iter()
        .map(|e| e.event_type.clone())
        .collect();
    assert!(event_types.contains(&"refund.failed".to_string()));
}
