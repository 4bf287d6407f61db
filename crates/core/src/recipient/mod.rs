//! Recipient references and their resolution.
//!
//! A recipient is addressed one of three ways: a wallet id, a handle
//! beginning with `@`, or an external identity written `ext:<provider>:<ref>`.
//! Resolution is read-only and happens before any locks are taken.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tesoro_shared::types::WalletId;
use tesoro_shared::Currency;

use crate::ledger::error::LedgerError;
use crate::ledger::types::{Account, AccountStatus, Wallet};
use crate::store::LedgerStore;

/// A parsed recipient reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecipientRef {
    /// Direct wallet id.
    WalletId(WalletId),
    /// Normalized `@handle`.
    Handle(String),
    /// External identity: provider plus the provider's user reference.
    External {
        /// The external system, e.g. `stripe`.
        provider: String,
        /// The identifier inside that system.
        reference: String,
    },
}

impl RecipientRef {
    /// Parses a recipient string: `@handle`, `ext:provider:ref`, or a wallet
    /// UUID.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for anything else.
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(LedgerError::Validation(
                "recipient must not be empty".to_string(),
            ));
        }

        if let Some(handle) = raw.strip_prefix('@') {
            if handle.is_empty() {
                return Err(LedgerError::Validation("handle must not be empty".to_string()));
            }
            return Ok(Self::Handle(format!("@{handle}")));
        }

        if let Some(rest) = raw.strip_prefix("ext:") {
            let Some((provider, reference)) = rest.split_once(':') else {
                return Err(LedgerError::Validation(
                    "external reference must be ext:<provider>:<ref>".to_string(),
                ));
            };
            if provider.is_empty() || reference.is_empty() {
                return Err(LedgerError::Validation(
                    "external reference must be ext:<provider>:<ref>".to_string(),
                ));
            }
            return Ok(Self::External {
                provider: provider.to_string(),
                reference: reference.to_string(),
            });
        }

        match Uuid::from_str(raw) {
            Ok(uuid) => Ok(Self::WalletId(WalletId::from_uuid(uuid))),
            Err(_) => Err(LedgerError::Validation(format!(
                "unrecognized recipient: {raw}"
            ))),
        }
    }
}

impl std::fmt::Display for RecipientRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WalletId(id) => write!(f, "{id}"),
            Self::Handle(handle) => write!(f, "{handle}"),
            Self::External {
                provider,
                reference,
            } => write!(f, "ext:{provider}:{reference}"),
        }
    }
}

/// A resolved recipient: the wallet and its ledger account.
#[derive(Debug, Clone)]
pub struct ResolvedRecipient {
    /// The recipient's wallet.
    pub wallet: Wallet,
    /// The recipient's account.
    pub account: Account,
}

/// Resolves a recipient reference to its wallet and account.
///
/// Frozen recipients are rejected; if `currency` is given, the resolved
/// account must be denominated in it.
///
/// # Errors
///
/// `RecipientNotFound` when nothing matches, `AccountFrozen` for frozen
/// recipients, `CurrencyMismatch` on currency disagreement.
pub async fn resolve<S: LedgerStore>(
    store: &S,
    tx: &mut S::Tx,
    recipient: &RecipientRef,
    currency: Option<Currency>,
) -> Result<ResolvedRecipient, LedgerError> {
    let wallet = match recipient {
        RecipientRef::WalletId(id) => store.find_wallet(tx, *id).await?,
        RecipientRef::Handle(handle) => store.find_wallet_by_handle(tx, handle).await?,
        RecipientRef::External {
            provider,
            reference,
        } => {
            store
                .find_wallet_by_external_ref(tx, provider, reference)
                .await?
        }
    }
    .ok_or_else(|| LedgerError::RecipientNotFound(recipient.to_string()))?;

    let account = store
        .find_account_for_wallet(tx, wallet.id)
        .await?
        .ok_or_else(|| LedgerError::RecipientNotFound(recipient.to_string()))?;

    if account.status == AccountStatus::Frozen {
        return Err(LedgerError::AccountFrozen(account.id));
    }

    if let Some(expected) = currency {
        if account.currency != expected {
            return Err(LedgerError::CurrencyMismatch {
                expected,
                actual: account.currency,
            });
        }
    }

    Ok(ResolvedRecipient { wallet, account })
}
