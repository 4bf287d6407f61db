//! Recipient resolution across the three address forms.

mod common;

use common::{key, usd, Harness};

use tesoro_core::recipient::RecipientRef;
use tesoro_core::transfer::TransferRequest;
use tesoro_core::LedgerError;

#[tokio::test]
async fn resolve_reports_wallet_and_account_facts() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 1_000).await;
    let store_identity = h.user("@store", 0).await;

    let info = h
        .engine
        .resolve_recipient(&alice, "@store")
        .await
        .unwrap();
    assert_eq!(info.wallet_id, store_identity.wallet_id);
    assert_eq!(info.handle.as_deref(), Some("@store"));
    assert_eq!(info.currency, tesoro_shared::Currency::Usd);
}

#[tokio::test]
async fn resolve_by_wallet_id() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 1_000).await;
    let store_identity = h.user("@store", 0).await;

    let info = h
        .engine
        .resolve_recipient(&alice, &store_identity.wallet_id.to_string())
        .await
        .unwrap();
    assert_eq!(info.wallet_id, store_identity.wallet_id);
}

#[tokio::test]
async fn resolve_by_external_identity() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 10_000).await;
    let store_identity = h.user("@store", 0).await;

    h.engine
        .link_external_identity(&h.admin, store_identity.wallet_id, "shopco", "merchant-7")
        .await
        .unwrap();

    let info = h
        .engine
        .resolve_recipient(&alice, "ext:shopco:merchant-7")
        .await
        .unwrap();
    assert_eq!(info.wallet_id, store_identity.wallet_id);

    // And external references work as transfer targets.
    let receipt = h
        .engine
        .transfer(
            &alice,
            &key(),
            TransferRequest {
                to: RecipientRef::External {
                    provider: "shopco".to_string(),
                    reference: "merchant-7".to_string(),
                },
                amount: usd(500),
                reference_id: None,
                metadata: serde_json::Map::new(),
            },
        )
        .await
        .unwrap();
    assert_eq!(receipt.to_wallet_id, store_identity.wallet_id);
    assert_eq!(h.available(&store_identity).await, 500);
}

#[tokio::test]
async fn unknown_references_are_not_found() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 1_000).await;

    for missing in ["@nobody", "ext:shopco:absent"] {
        let err = h
            .engine
            .resolve_recipient(&alice, missing)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::RecipientNotFound(_)), "{missing}");
    }

    let random_wallet = tesoro_shared::types::WalletId::new();
    let err = h
        .engine
        .resolve_recipient(&alice, &random_wallet.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::RecipientNotFound(_)));
}

#[tokio::test]
async fn malformed_references_are_validation_errors() {
    let h = Harness::new().await;
    let alice = h.user("@alice", 1_000).await;

    for bad in ["", "plainword", "ext:", "ext:onlyprovider"] {
        let err = h
            .engine
            .resolve_recipient(&alice, bad)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "{bad}");
    }
}
