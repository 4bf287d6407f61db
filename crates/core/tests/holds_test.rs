//! Hold lifecycle coverage: partial captures, releases, expiry on access,
//! and the accounting identity across the whole lifecycle.

mod common;

use common::{key, usd, Harness};

use tesoro_core::hold::{HoldCaptureRequest, HoldCreateRequest, HoldReleaseRequest};
use tesoro_core::ledger::types::HoldStatus;
use tesoro_core::recipient::RecipientRef;
use tesoro_core::LedgerError;

fn to_store() -> RecipientRef {
    RecipientRef::Handle("@store".to_string())
}

async fn create_hold(
    h: &Harness,
    identity: &tesoro_shared::ApiKeyIdentity,
    minor: i64,
) -> tesoro_core::hold::HoldReceipt {
    h.engine
        .hold_create(
            identity,
            &key(),
            HoldCreateRequest {
                amount: usd(minor),
                expires_in_seconds: 600,
                metadata: serde_json::Map::new(),
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn hold_reserves_funds() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let _store = h.user("@store", 0).await;

    let hold = create_hold(&h, &alice, 10_000).await;
    assert_eq!(hold.status, HoldStatus::Active);
    assert_eq!(hold.remaining, usd(10_000));
    assert_eq!(h.available(&alice).await, 90_000);
    assert_eq!(h.held(&alice).await, 10_000);

    // Held funds are not spendable.
    let err = h
        .engine
        .transfer(
            &alice,
            &key(),
            tesoro_core::transfer::TransferRequest {
                to: to_store(),
                amount: usd(95_000),
                reference_id: None,
                metadata: serde_json::Map::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
}

#[tokio::test]
async fn hold_create_rejects_insufficient_available() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 5_000).await;

    let err = h
        .engine
        .hold_create(
            &alice,
            &key(),
            HoldCreateRequest {
                amount: usd(6_000),
                expires_in_seconds: 600,
                metadata: serde_json::Map::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    assert_eq!(h.held(&alice).await, 0);
}

#[tokio::test]
async fn expires_in_bounds_enforced() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 5_000).await;

    for bad in [0, -1, 86_401] {
        let err = h
            .engine
            .hold_create(
                &alice,
                &key(),
                HoldCreateRequest {
                    amount: usd(100),
                    expires_in_seconds: bad,
                    metadata: serde_json::Map::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}

#[tokio::test]
async fn default_capture_takes_full_remainder() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let store_identity = h.user("@store", 0).await;

    let hold = create_hold(&h, &alice, 10_000).await;
    let capture = h
        .engine
        .hold_capture(
            &alice,
            &key(),
            HoldCaptureRequest {
                hold_id: hold.hold_id,
                to: to_store(),
                amount: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(capture.captured, usd(10_000));
    assert_eq!(capture.remaining, usd(0));
    assert_eq!(capture.status, HoldStatus::Captured);
    assert_eq!(h.held(&alice).await, 0);
    assert_eq!(h.available(&store_identity).await, 10_000);
}

#[tokio::test]
async fn successive_partial_captures_exhaust_the_hold() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let store_identity = h.user("@store", 0).await;

    let hold = create_hold(&h, &alice, 10_000).await;

    let first = h
        .engine
        .hold_capture(
            &alice,
            &key(),
            HoldCaptureRequest {
                hold_id: hold.hold_id,
                to: to_store(),
                amount: Some(usd(4_000)),
            },
        )
        .await
        .unwrap();
    assert_eq!(first.status, HoldStatus::PartiallyCaptured);
    assert_eq!(first.remaining, usd(6_000));

    let second = h
        .engine
        .hold_capture(
            &alice,
            &key(),
            HoldCaptureRequest {
                hold_id: hold.hold_id,
                to: to_store(),
                amount: Some(usd(6_000)),
            },
        )
        .await
        .unwrap();
    assert_eq!(second.status, HoldStatus::Captured);
    assert_eq!(second.remaining, usd(0));

    assert_eq!(h.held(&alice).await, 0);
    assert_eq!(h.available(&alice).await, 90_000);
    assert_eq!(h.available(&store_identity).await, 10_000);

    // A third capture finds nothing left.
    let err = h
        .engine
        .hold_capture(
            &alice,
            &key(),
            HoldCaptureRequest {
                hold_id: hold.hold_id,
                to: to_store(),
                amount: Some(usd(1)),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::HoldNotActive {
            status: HoldStatus::Captured,
        }
    );
}

#[tokio::test]
async fn capture_above_remainder_rejected() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let _store = h.user("@store", 0).await;

    let hold = create_hold(&h, &alice, 10_000).await;
    let err = h
        .engine
        .hold_capture(
            &alice,
            &key(),
            HoldCaptureRequest {
                hold_id: hold.hold_id,
                to: to_store(),
                amount: Some(usd(10_001)),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::CaptureExceedsHold {
            requested: 10_001,
            remaining: 10_000,
        }
    );
}

#[tokio::test]
async fn release_after_capture_returns_remainder() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let _store = h.user("@store", 0).await;

    let hold = create_hold(&h, &alice, 10_000).await;
    h.engine
        .hold_capture(
            &alice,
            &key(),
            HoldCaptureRequest {
                hold_id: hold.hold_id,
                to: to_store(),
                amount: Some(usd(7_500)),
            },
        )
        .await
        .unwrap();

    let release = h
        .engine
        .hold_release(
            &alice,
            &key(),
            HoldReleaseRequest {
                hold_id: hold.hold_id,
            },
        )
        .await
        .unwrap();
    assert_eq!(release.released, usd(2_500));
    assert_eq!(release.status, HoldStatus::Released);
    assert_eq!(h.available(&alice).await, 92_500);
    assert_eq!(h.held(&alice).await, 0);

    // Captures and releases of a terminal hold are refused.
    let err = h
        .engine
        .hold_release(
            &alice,
            &key(),
            HoldReleaseRequest {
                hold_id: hold.hold_id,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::HoldNotActive {
            status: HoldStatus::Released,
        }
    );
}

#[tokio::test]
async fn expired_hold_releases_lazily_on_capture() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let _store = h.user("@store", 0).await;

    let hold = create_hold(&h, &alice, 10_000).await;
    h.force_hold_expiry(hold.hold_id).await;

    let err = h
        .engine
        .hold_capture(
            &alice,
            &key(),
            HoldCaptureRequest {
                hold_id: hold.hold_id,
                to: to_store(),
                amount: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::HoldExpired(hold.hold_id));

    // The expiry materialized: funds are back in available.
    assert_eq!(h.available(&alice).await, 100_000);
    assert_eq!(h.held(&alice).await, 0);

    // Subsequent accesses see the terminal state without double release.
    let err = h
        .engine
        .hold_release(
            &alice,
            &key(),
            HoldReleaseRequest {
                hold_id: hold.hold_id,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::HoldExpired(hold.hold_id));
    assert_eq!(h.available(&alice).await, 100_000);
}

#[tokio::test]
async fn foreign_hold_is_forbidden() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let mallory = h.user("@mallory", 1_000).await;
    let _store = h.user("@store", 0).await;

    let hold = create_hold(&h, &alice, 10_000).await;
    let err = h
        .engine
        .hold_capture(
            &mallory,
            &key(),
            HoldCaptureRequest {
                hold_id: hold.hold_id,
                to: to_store(),
                amount: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ForbiddenScope(_)));
    assert_eq!(h.held(&alice).await, 10_000);
}

#[tokio::test]
async fn unknown_hold_is_not_found() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 1_000).await;

    let bogus = tesoro_shared::types::HoldId::new();
    let err = h
        .engine
        .hold_release(&alice, &key(), HoldReleaseRequest { hold_id: bogus })
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::HoldNotFound(bogus));
}
