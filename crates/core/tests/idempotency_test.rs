//! Idempotency behavior: stable replay, conflict detection, and the
//! no-trace guarantee for transient failures.

mod common;

use common::{key, usd, Harness};

use tesoro_core::transfer::TransferRequest;
use tesoro_core::LedgerError;
use tesoro_shared::config::LedgerConfig;

fn transfer_req(amount_minor: i64) -> TransferRequest {
    TransferRequest {
        to: tesoro_core::recipient::RecipientRef::Handle("@store".to_string()),
        amount: usd(amount_minor),
        reference_id: None,
        metadata: serde_json::Map::new(),
    }
}

#[tokio::test]
async fn same_key_same_body_replays_first_response() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let _store = h.user("@store", 0).await;

    let k = key();
    let first = h
        .engine
        .transfer(&alice, &k, transfer_req(2_500))
        .await
        .unwrap();
    let second = h
        .engine
        .transfer(&alice, &k, transfer_req(2_500))
        .await
        .unwrap();

    // Byte-equal responses, and only one movement of money.
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(first.entry_id, second.entry_id);
    assert_eq!(h.available(&alice).await, 97_500);

    let page = h
        .engine
        .list_transactions(&alice, None, Some(50))
        .await
        .unwrap();
    let transfers = page
        .items
        .iter()
        .filter(|e| e.kind == tesoro_core::ledger::types::EntryKind::Transfer)
        .count();
    assert_eq!(transfers, 1, "replay must not write a second entry");
}

#[tokio::test]
async fn same_key_different_body_conflicts() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let _store = h.user("@store", 0).await;

    let k = key();
    h.engine
        .transfer(&alice, &k, transfer_req(2_500))
        .await
        .unwrap();

    let err = h
        .engine
        .transfer(&alice, &k, transfer_req(2_600))
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::IdempotencyConflict);
    assert_eq!(h.available(&alice).await, 97_500);
}

#[tokio::test]
async fn keys_are_scoped_per_api_key() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let bob = h.user("@bob", 100_000).await;
    let _store = h.user("@store", 0).await;

    // The same key string under two different API keys is two operations.
    let k = key();
    h.engine
        .transfer(&alice, &k, transfer_req(1_000))
        .await
        .unwrap();
    h.engine
        .transfer(&bob, &k, transfer_req(1_000))
        .await
        .unwrap();

    assert_eq!(h.available(&alice).await, 99_000);
    assert_eq!(h.available(&bob).await, 99_000);
}

#[tokio::test]
async fn final_failure_is_replayed() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 1_000).await;
    let _store = h.user("@store", 0).await;

    let k = key();
    let first = h
        .engine
        .transfer(&alice, &k, transfer_req(5_000))
        .await
        .unwrap_err();
    assert!(matches!(first, LedgerError::InsufficientFunds { .. }));

    // Fund the wallet afterwards; the retry with the same key must replay
    // the recorded failure, not spend the new money.
    let h2 = &h;
    h2.engine
        .deposit(
            &h.admin,
            &key(),
            tesoro_core::transfer::DepositRequest {
                to: tesoro_core::recipient::RecipientRef::Handle("@alice".to_string()),
                amount: usd(10_000),
                reference_id: None,
                metadata: serde_json::Map::new(),
            },
        )
        .await
        .unwrap();

    let second = h
        .engine
        .transfer(&alice, &k, transfer_req(5_000))
        .await
        .unwrap_err();
    assert_eq!(first, second);
    assert_eq!(h.available(&alice).await, 11_000);
}

#[tokio::test]
async fn transient_failure_leaves_no_record() {
    let h = Harness::with_config(LedgerConfig {
        max_commit_retries: 1,
        retry_backoff_ms: 1,
        ..LedgerConfig::default()
    })
    .await;
    let alice = h.user("@alice", 100_000).await;
    let _store = h.user("@store", 0).await;

    // More injected conflicts than the retry budget tolerates.
    h.store.fail_next_commits(2);

    let k = key();
    let err = h
        .engine
        .transfer(&alice, &k, transfer_req(2_500))
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::TransientConflict);
    assert_eq!(h.available(&alice).await, 100_000);

    // A legitimate retry with the same key proceeds fresh and succeeds.
    let receipt = h
        .engine
        .transfer(&alice, &k, transfer_req(2_500))
        .await
        .unwrap();
    assert_eq!(h.available(&alice).await, 97_500);

    // And replays thereafter.
    let replay = h
        .engine
        .transfer(&alice, &k, transfer_req(2_500))
        .await
        .unwrap();
    assert_eq!(receipt.entry_id, replay.entry_id);
}

#[tokio::test]
async fn serialization_conflict_within_budget_retries_through() {
    let h = Harness::with_config(LedgerConfig {
        max_commit_retries: 3,
        retry_backoff_ms: 1,
        ..LedgerConfig::default()
    })
    .await;
    let alice = h.user("@alice", 100_000).await;
    let _store = h.user("@store", 0).await;

    h.store.fail_next_commits(2);
    let receipt = h
        .engine
        .transfer(&alice, &key(), transfer_req(2_500))
        .await
        .unwrap();
    assert_eq!(receipt.amount, usd(2_500));
    assert_eq!(h.available(&alice).await, 97_500);
}

#[tokio::test]
async fn malformed_request_rejected_before_reservation() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let _store = h.user("@store", 0).await;

    let k = key();
    let err = h
        .engine
        .transfer(&alice, &k, transfer_req(0))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    // The key was never reserved, so a corrected request may reuse it.
    let receipt = h
        .engine
        .transfer(&alice, &k, transfer_req(2_500))
        .await
        .unwrap();
    assert_eq!(receipt.amount, usd(2_500));
}

#[tokio::test]
async fn empty_idempotency_key_rejected() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 100_000).await;
    let _store = h.user("@store", 0).await;

    let err = h
        .engine
        .transfer(&alice, "  ", transfer_req(100))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}
