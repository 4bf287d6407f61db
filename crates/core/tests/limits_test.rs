//! Scope and spend-ceiling enforcement at the operation boundary.

mod common;

use common::{all_user_scopes, key, usd, Harness};

use tesoro_core::hold::HoldCreateRequest;
use tesoro_core::recipient::RecipientRef;
use tesoro_core::transfer::{DepositRequest, TransferRequest};
use tesoro_core::LedgerError;
use tesoro_shared::{Scope, SpendLimits};

fn transfer_req(minor: i64) -> TransferRequest {
    TransferRequest {
        to: RecipientRef::Handle("@store".to_string()),
        amount: usd(minor),
        reference_id: None,
        metadata: serde_json::Map::new(),
    }
}

#[tokio::test]
async fn write_scopes_gate_their_operations() {
    let h = Harness::new().await;
    let read_only = h
        .user_with("@reader", 10_000, vec![Scope::Read], SpendLimits::unlimited())
        .await;
    let _store = h.user("@store", 0).await;

    let err = h
        .engine
        .transfer(&read_only, &key(), transfer_req(100))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ForbiddenScope(_)));

    let err = h
        .engine
        .hold_create(
            &read_only,
            &key(),
            HoldCreateRequest {
                amount: usd(100),
                expires_in_seconds: 60,
                metadata: serde_json::Map::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ForbiddenScope(_)));

    // Balance still works with the read scope alone.
    assert_eq!(h.available(&read_only).await, 10_000);
}

#[tokio::test]
async fn admin_operations_require_admin_scope() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 10_000).await;

    let err = h
        .engine
        .deposit(
            &alice,
            &key(),
            DepositRequest {
                to: RecipientRef::Handle("@alice".to_string()),
                amount: usd(1_000_000),
                reference_id: None,
                metadata: serde_json::Map::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ForbiddenScope(_)));
    assert_eq!(h.available(&alice).await, 10_000);
}

#[tokio::test]
async fn per_transaction_ceiling_blocks_large_transfers() {
    let h = Harness::new().await;
    let capped = h
        .user_with(
            "@capped",
            100_000,
            all_user_scopes(),
            SpendLimits {
                per_tx_max: Some(5_000),
                window_max: None,
            },
        )
        .await;
    let _store = h.user("@store", 0).await;

    let err = h
        .engine
        .transfer(&capped, &key(), transfer_req(5_001))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::LimitExceeded {
            spent: 0,
            requested: 5_001,
            limit: 5_000,
        }
    );

    // At the ceiling is fine.
    h.engine
        .transfer(&capped, &key(), transfer_req(5_000))
        .await
        .unwrap();
    assert_eq!(h.available(&capped).await, 95_000);
}

#[tokio::test]
async fn window_ceiling_counts_committed_debits() {
    let h = Harness::new().await;
    let capped = h
        .user_with(
            "@capped",
            100_000,
            all_user_scopes(),
            SpendLimits {
                per_tx_max: None,
                window_max: Some(10_000),
            },
        )
        .await;
    let _store = h.user("@store", 0).await;

    h.engine
        .transfer(&capped, &key(), transfer_req(4_000))
        .await
        .unwrap();
    h.engine
        .transfer(&capped, &key(), transfer_req(4_000))
        .await
        .unwrap();

    let err = h
        .engine
        .transfer(&capped, &key(), transfer_req(4_000))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::LimitExceeded {
            spent: 8_000,
            requested: 4_000,
            limit: 10_000,
        }
    );

    // Exactly filling the window is allowed.
    h.engine
        .transfer(&capped, &key(), transfer_req(2_000))
        .await
        .unwrap();
    assert_eq!(h.available(&capped).await, 90_000);
}

#[tokio::test]
async fn hold_creation_counts_toward_the_window() {
    let h = Harness::new().await;
    let capped = h
        .user_with(
            "@capped",
            100_000,
            all_user_scopes(),
            SpendLimits {
                per_tx_max: None,
                window_max: Some(10_000),
            },
        )
        .await;
    let _store = h.user("@store", 0).await;

    h.engine
        .hold_create(
            &capped,
            &key(),
            HoldCreateRequest {
                amount: usd(8_000),
                expires_in_seconds: 600,
                metadata: serde_json::Map::new(),
            },
        )
        .await
        .unwrap();

    let err = h
        .engine
        .transfer(&capped, &key(), transfer_req(4_000))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::LimitExceeded { .. }));
}

#[tokio::test]
async fn limit_failures_are_not_replayed() {
    let h = Harness::new().await;
    let capped = h
        .user_with(
            "@capped",
            100_000,
            all_user_scopes(),
            SpendLimits {
                per_tx_max: Some(5_000),
                window_max: None,
            },
        )
        .await;
    let _store = h.user("@store", 0).await;

    // Authorization failures leave no idempotency record, so the same key
    // works once the request fits the ceiling.
    let k = key();
    let err = h
        .engine
        .transfer(&capped, &k, transfer_req(6_000))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::LimitExceeded { .. }));

    let receipt = h
        .engine
        .transfer(&capped, &k, transfer_req(5_000))
        .await
        .unwrap();
    assert_eq!(receipt.amount, usd(5_000));
}

#[tokio::test]
async fn frozen_account_cannot_send_or_receive() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 10_000).await;
    let _store = h.user("@store", 0).await;

    let (alice_account, _) = h
        .engine
        .account_for_wallet(alice.wallet_id)
        .await
        .unwrap()
        .expect("alice account");
    h.engine
        .set_account_frozen(&h.admin, alice_account, true)
        .await
        .unwrap();

    let err = h
        .engine
        .transfer(&alice, &key(), transfer_req(100))
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::AccountFrozen(alice_account));

    // A frozen recipient is rejected at resolution time.
    let bob = h.user("@bob", 10_000).await;
    let err = h
        .engine
        .transfer(
            &bob,
            &key(),
            TransferRequest {
                to: RecipientRef::Handle("@alice".to_string()),
                amount: usd(100),
                reference_id: None,
                metadata: serde_json::Map::new(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::AccountFrozen(alice_account));

    // Unfreezing restores service.
    h.engine
        .set_account_frozen(&h.admin, alice_account, false)
        .await
        .unwrap();
    h.engine
        .transfer(&alice, &key(), transfer_req(100))
        .await
        .unwrap();
}
