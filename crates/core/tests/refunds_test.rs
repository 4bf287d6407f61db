//! Refund coverage: partial refunds, the refundable cap, and the
//! merchant-only rule.

mod common;

use common::{key, usd, Harness};

use tesoro_core::hold::{HoldCaptureRequest, HoldCreateRequest};
use tesoro_core::recipient::RecipientRef;
use tesoro_core::refund::RefundRequest;
use tesoro_core::LedgerError;
use tesoro_shared::types::EntryId;
use tesoro_shared::ApiKeyIdentity;

/// Runs hold → capture and returns the capture entry id.
async fn captured_payment(
    h: &Harness,
    payer: &ApiKeyIdentity,
    minor: i64,
) -> EntryId {
    let hold = h
        .engine
        .hold_create(
            payer,
            &key(),
            HoldCreateRequest {
                amount: usd(minor),
                expires_in_seconds: 600,
                metadata: serde_json::Map::new(),
            },
        )
        .await
        .unwrap();
    h.engine
        .hold_capture(
            payer,
            &key(),
            HoldCaptureRequest {
                hold_id: hold.hold_id,
                to: RecipientRef::Handle("@store".to_string()),
                amount: None,
            },
        )
        .await
        .unwrap()
        .entry_id
}

#[tokio::test]
async fn full_refund_returns_captured_funds() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let store_identity = h.user("@store", 0).await;

    let capture_id = captured_payment(&h, &alice, 10_000).await;
    assert_eq!(h.available(&store_identity).await, 10_000);

    let refund = h
        .engine
        .refund(
            &store_identity,
            &key(),
            RefundRequest {
                capture_entry_id: capture_id,
                amount: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(refund.amount, usd(10_000));
    assert_eq!(h.available(&store_identity).await, 0);
    assert_eq!(h.available(&alice).await, 100_000);
}

#[tokio::test]
async fn partial_refunds_accumulate_up_to_the_capture() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let store_identity = h.user("@store", 0).await;

    let capture_id = captured_payment(&h, &alice, 10_000).await;

    h.engine
        .refund(
            &store_identity,
            &key(),
            RefundRequest {
                capture_entry_id: capture_id,
                amount: Some(usd(4_000)),
            },
        )
        .await
        .unwrap();
    h.engine
        .refund(
            &store_identity,
            &key(),
            RefundRequest {
                capture_entry_id: capture_id,
                amount: Some(usd(3_000)),
            },
        )
        .await
        .unwrap();
    assert_eq!(h.available(&alice).await, 97_000);
    assert_eq!(h.available(&store_identity).await, 3_000);

    // 4000 + 3000 + 3001 would exceed the capture.
    let err = h
        .engine
        .refund(
            &store_identity,
            &key(),
            RefundRequest {
                capture_entry_id: capture_id,
                amount: Some(usd(3_001)),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::RefundExceedsCapture {
            requested: 3_001,
            refundable: 3_000,
        }
    );

    // A defaulted refund takes exactly what is left.
    let last = h
        .engine
        .refund(
            &store_identity,
            &key(),
            RefundRequest {
                capture_entry_id: capture_id,
                amount: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(last.amount, usd(3_000));
    assert_eq!(h.available(&alice).await, 100_000);
}

#[tokio::test]
async fn fully_refunded_capture_refuses_more() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let store_identity = h.user("@store", 0).await;

    let capture_id = captured_payment(&h, &alice, 5_000).await;
    h.engine
        .refund(
            &store_identity,
            &key(),
            RefundRequest {
                capture_entry_id: capture_id,
                amount: None,
            },
        )
        .await
        .unwrap();

    let err = h
        .engine
        .refund(
            &store_identity,
            &key(),
            RefundRequest {
                capture_entry_id: capture_id,
                amount: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::RefundExceedsCapture {
            requested: 0,
            refundable: 0,
        }
    );
}

#[tokio::test]
async fn only_the_merchant_can_refund() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let _store = h.user("@store", 0).await;

    let capture_id = captured_payment(&h, &alice, 5_000).await;

    // The payer cannot refund themselves.
    let err = h
        .engine
        .refund(
            &alice,
            &key(),
            RefundRequest {
                capture_entry_id: capture_id,
                amount: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ForbiddenScope(_)));
}

#[tokio::test]
async fn refund_requires_merchant_funds() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let store_identity = h.user("@store", 0).await;
    let _other = h.user("@other", 0).await;

    let capture_id = captured_payment(&h, &alice, 10_000).await;

    // The merchant spends the captured money elsewhere.
    h.engine
        .transfer(
            &store_identity,
            &key(),
            tesoro_core::transfer::TransferRequest {
                to: RecipientRef::Handle("@other".to_string()),
                amount: usd(8_000),
                reference_id: None,
                metadata: serde_json::Map::new(),
            },
        )
        .await
        .unwrap();

    let err = h
        .engine
        .refund(
            &store_identity,
            &key(),
            RefundRequest {
                capture_entry_id: capture_id,
                amount: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::InsufficientFunds {
            available: 2_000,
            required: 10_000,
        }
    );
}

#[tokio::test]
async fn refund_target_must_be_a_capture() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let store_identity = h.user("@store", 0).await;

    let transfer = h
        .engine
        .transfer(
            &alice,
            &key(),
            tesoro_core::transfer::TransferRequest {
                to: RecipientRef::Handle("@store".to_string()),
                amount: usd(1_000),
                reference_id: None,
                metadata: serde_json::Map::new(),
            },
        )
        .await
        .unwrap();

    let err = h
        .engine
        .refund(
            &store_identity,
            &key(),
            RefundRequest {
                capture_entry_id: transfer.entry_id,
                amount: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let bogus = EntryId::new();
    let err = h
        .engine
        .refund(
            &store_identity,
            &key(),
            RefundRequest {
                capture_entry_id: bogus,
                amount: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::CaptureNotFound(bogus));
}
