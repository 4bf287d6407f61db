//! Concurrency properties: account locks serialize conflicting spenders,
//! balances never drift, and no overspend slips through parallel requests.

mod common;

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Barrier;

use common::{key, usd, Harness};
use tesoro_core::recipient::RecipientRef;
use tesoro_core::transfer::TransferRequest;
use tesoro_core::LedgerError;

fn transfer_req(amount_minor: i64) -> TransferRequest {
    TransferRequest {
        to: RecipientRef::Handle("@store".to_string()),
        amount: usd(amount_minor),
        reference_id: None,
        metadata: serde_json::Map::new(),
    }
}

#[tokio::test]
async fn two_concurrent_overspending_transfers_one_wins() {
    let h = Arc::new(Harness::new().await);
    let alice = h.user("@alice", 100_000).await;
    let _store = h.user("@store", 0).await;

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let h = Arc::clone(&h);
        let alice = alice.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            h.engine.transfer(&alice, &key(), transfer_req(60_000)).await
        }));
    }

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let insufficient = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::InsufficientFunds { .. })))
        .count();

    assert_eq!(successes, 1, "exactly one $600 transfer fits in $1000");
    assert_eq!(insufficient, 1);
    assert_eq!(h.available(&alice).await, 40_000);
}

#[tokio::test]
async fn parallel_overspend_admits_exactly_floor_of_budget() {
    let h = Arc::new(Harness::new().await);
    let alice = h.user("@alice", 100_000).await;
    let store_id = h.user("@store", 0).await;

    // 8 parallel transfers of $300 against $1000: exactly 3 fit.
    const ATTEMPTS: usize = 8;
    const AMOUNT: i64 = 30_000;

    let barrier = Arc::new(Barrier::new(ATTEMPTS));
    let mut handles = Vec::with_capacity(ATTEMPTS);
    for _ in 0..ATTEMPTS {
        let h = Arc::clone(&h);
        let alice = alice.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            h.engine.transfer(&alice, &key(), transfer_req(AMOUNT)).await
        }));
    }

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 3, "floor(100000 / 30000) transfers must win");
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        }
    }

    assert_eq!(h.available(&alice).await, 100_000 - 3 * AMOUNT);
    assert_eq!(h.available(&store_id).await, 3 * AMOUNT);
}

#[tokio::test]
async fn disjoint_payers_proceed_independently() {
    let h = Arc::new(Harness::new().await);
    let _store = h.user("@store", 0).await;

    const PAYERS: usize = 6;
    let mut identities = Vec::new();
    for i in 0..PAYERS {
        identities.push(h.user(&format!("@payer_{i}"), 10_000).await);
    }

    let barrier = Arc::new(Barrier::new(PAYERS));
    let mut handles = Vec::new();
    for identity in identities.clone() {
        let h = Arc::clone(&h);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            h.engine.transfer(&identity, &key(), transfer_req(2_500)).await
        }));
    }

    for result in join_all(handles).await {
        result.expect("task panicked").expect("transfer failed");
    }
    for identity in &identities {
        assert_eq!(h.available(identity).await, 7_500);
    }
}

#[tokio::test]
async fn concurrent_same_key_duplicates_never_double_spend() {
    let h = Arc::new(Harness::new().await);
    let alice = h.user("@alice", 100_000).await;
    let _store = h.user("@store", 0).await;

    const DUPLICATES: usize = 6;
    let shared_key = key();
    let barrier = Arc::new(Barrier::new(DUPLICATES));
    let mut handles = Vec::new();
    for _ in 0..DUPLICATES {
        let h = Arc::clone(&h);
        let alice = alice.clone();
        let barrier = Arc::clone(&barrier);
        let shared_key = shared_key.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            h.engine
                .transfer(&alice, &shared_key, transfer_req(2_500))
                .await
        }));
    }

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .collect();

    // Whatever mix of fresh execution, replay, and in-progress rejection the
    // interleaving produced, the money moved at most once.
    assert_eq!(h.available(&alice).await, 97_500);

    let mut entry_ids = std::collections::HashSet::new();
    for result in results {
        match result {
            Ok(receipt) => {
                entry_ids.insert(receipt.entry_id);
            }
            Err(LedgerError::IdempotencyInProgress) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(entry_ids.len(), 1, "every success must replay one entry");
}

#[tokio::test]
async fn interleaved_transfers_conserve_total_funds() {
    let h = Arc::new(Harness::new().await);
    let alice = h.user("@alice", 50_000).await;
    let bob = h.user("@bob", 50_000).await;

    // Alice and Bob pay each other concurrently; totals must be conserved.
    const ROUNDS: usize = 10;
    let barrier = Arc::new(Barrier::new(2 * ROUNDS));
    let mut handles = Vec::new();
    for _ in 0..ROUNDS {
        for (from, to) in [(&alice, "@bob"), (&bob, "@alice")] {
            let h = Arc::clone(&h);
            let from = from.clone();
            let to = to.to_string();
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                h.engine
                    .transfer(
                        &from,
                        &key(),
                        TransferRequest {
                            to: RecipientRef::Handle(to),
                            amount: usd(1_000),
                            reference_id: None,
                            metadata: serde_json::Map::new(),
                        },
                    )
                    .await
            }));
        }
    }

    for result in join_all(handles).await {
        result.expect("task panicked").expect("transfer failed");
    }

    let alice_avail = h.available(&alice).await;
    let bob_avail = h.available(&bob).await;
    assert_eq!(alice_avail, 50_000);
    assert_eq!(bob_avail, 50_000);
    assert_eq!(alice_avail + bob_avail, 100_000);
}

#[tokio::test]
async fn blocked_lock_times_out_and_leaves_no_record() {
    use tesoro_core::store::LedgerStore;

    let h = Harness::with_config(tesoro_shared::config::LedgerConfig {
        operation_timeout_ms: 100,
        ..Default::default()
    })
    .await;
    let alice = h.user("@alice", 10_000).await;
    let store_identity = h.user("@store", 0).await;

    let (payee_account, _) = h
        .engine
        .account_for_wallet(store_identity.wallet_id)
        .await
        .unwrap()
        .expect("payee account");

    // Park a transaction on the payee's row lock so the transfer blocks.
    let mut blocker = h.store.begin().await.unwrap();
    h.store
        .lock_account(&mut blocker, payee_account)
        .await
        .unwrap();

    let k = key();
    let err = h
        .engine
        .transfer(&alice, &k, transfer_req(2_500))
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::Timeout);
    h.store.rollback(blocker).await.unwrap();

    // Nothing moved and nothing was recorded; the retry goes through.
    assert_eq!(h.available(&alice).await, 10_000);
    let receipt = h
        .engine
        .transfer(&alice, &k, transfer_req(2_500))
        .await
        .unwrap();
    assert_eq!(receipt.amount, usd(2_500));
    assert_eq!(h.available(&alice).await, 7_500);
}
