//! Read side and wallet administration types.
//!
//! Balances are derived on demand; transaction history is a cursor-paged,
//! newest-first listing of the entries touching the caller's account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tesoro_shared::types::{AccountId, EntryId, WalletId};
use tesoro_shared::{Currency, Money};

use crate::ledger::types::{
    AccountType, Bucket, EntryKind, JournalEntry, JournalLine, Side,
};
use crate::ledger::LedgerError;

/// A wallet's derived balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceReport {
    /// The wallet.
    pub wallet_id: WalletId,
    /// Spendable minor units.
    pub available: i64,
    /// Minor units reserved by holds.
    pub held: i64,
    /// available + held.
    pub total: i64,
    /// The account currency.
    pub currency: Currency,
}

/// One line of an entry as seen from the caller's account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryLineView {
    /// Debit or credit.
    pub side: Side,
    /// Available or held.
    pub bucket: Bucket,
    /// The line amount.
    pub amount: Money,
}

/// A history item: one entry plus its lines on the caller's account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryView {
    /// The entry.
    pub entry_id: EntryId,
    /// Kind of money movement.
    pub kind: EntryKind,
    /// Client reference, if any.
    pub reference_id: Option<String>,
    /// Entry metadata.
    pub metadata: Map<String, Value>,
    /// Posting timestamp.
    pub created_at: DateTime<Utc>,
    /// The entry's lines against the caller's account.
    pub lines: Vec<EntryLineView>,
}

impl EntryView {
    /// Projects an entry onto one account's view of it.
    #[must_use]
    pub fn project(entry: JournalEntry, lines: &[JournalLine], account_id: AccountId) -> Self {
        let lines = lines
            .iter()
            .filter(|line| line.account_id == account_id)
            .map(|line| EntryLineView {
                side: line.side,
                bucket: line.bucket,
                amount: line.amount,
            })
            .collect();
        Self {
            entry_id: entry.id,
            kind: entry.kind,
            reference_id: entry.reference_id,
            metadata: entry.metadata,
            created_at: entry.created_at,
            lines,
        }
    }
}

/// Resolution result for the read-only recipient lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientInfo {
    /// The resolved wallet.
    pub wallet_id: WalletId,
    /// The wallet's handle, if claimed.
    pub handle: Option<String>,
    /// Display name.
    pub display_name: String,
    /// User or system account.
    pub account_type: AccountType,
    /// Account currency.
    pub currency: Currency,
}

/// Admin request to create a wallet with its account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWalletRequest {
    /// Optional handle, `@`-prefixed, globally unique.
    pub handle: Option<String>,
    /// Display name.
    pub display_name: String,
    /// Account currency.
    pub currency: Currency,
    /// User or system account; defaults to user.
    #[serde(default = "default_account_type")]
    pub account_type: AccountType,
}

fn default_account_type() -> AccountType {
    AccountType::User
}

impl CreateWalletRequest {
    /// Validates handle shape and display name.
    ///
    /// # Errors
    ///
    /// `Validation` on malformed input.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.display_name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "display_name must not be empty".to_string(),
            ));
        }
        if let Some(handle) = &self.handle {
            validate_handle(handle)?;
        }
        Ok(())
    }
}

/// Validates a handle: `@` followed by 2..=32 of `[a-z0-9_]`.
///
/// # Errors
///
/// `Validation` on malformed handles.
pub fn validate_handle(handle: &str) -> Result<(), LedgerError> {
    let Some(body) = handle.strip_prefix('@') else {
        return Err(LedgerError::Validation(
            "handle must start with '@'".to_string(),
        ));
    };
    if !(2..=32).contains(&body.len()) {
        return Err(LedgerError::Validation(
            "handle must be 2 to 32 characters after '@'".to_string(),
        ));
    }
    if !body
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    {
        return Err(LedgerError::Validation(
            "handle may only contain lowercase letters, digits, and underscores".to_string(),
        ));
    }
    Ok(())
}

/// Result of creating a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletCreated {
    /// The new wallet.
    pub wallet_id: WalletId,
    /// Its ledger account.
    pub account_id: AccountId,
    /// The claimed handle, if any.
    pub handle: Option<String>,
    /// Account currency.
    pub currency: Currency,
}
