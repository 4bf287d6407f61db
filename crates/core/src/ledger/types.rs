//! Domain records for the wallet ledger.
//!
//! Journal entries and lines are append-only; holds, intents, and refunds
//! mutate only their status fields (and `Hold::remaining`). Balances are
//! never stored, always derived from lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tesoro_shared::types::{
    AccountId, EntryId, HoldId, IntentId, LineId, RefundId, WalletId,
};
use tesoro_shared::{Currency, Money};

/// What kind of money movement an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// External funds credited from the system treasury.
    Deposit,
    /// Wallet-to-wallet transfer of available funds.
    Transfer,
    /// Reservation moving payer available into held.
    Hold,
    /// Captured hold funds moving to the payee.
    Capture,
    /// Held funds returned to the payer's available bucket.
    Release,
    /// Captured funds returned from payee to payer.
    Refund,
    /// A payment intent being paid.
    IntentPay,
}

/// Which side of the entry a line is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Funds leave the account's bucket.
    Debit,
    /// Funds enter the account's bucket.
    Credit,
}

/// The balance bucket a line posts against. Buckets attach to lines, not
/// accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Spendable funds.
    Available,
    /// Funds reserved by an active hold.
    Held,
}

/// Account classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// An ordinary wallet account; balances must stay non-negative.
    User,
    /// A platform account (e.g. the deposit treasury); may go negative as
    /// the counter-side of external money inflow.
    System,
}

/// Whether an account can move money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Normal operation.
    Active,
    /// All money movement is rejected.
    Frozen,
}

/// Owner-level record; one wallet owns one account per currency (one, in
/// this platform).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// The wallet's id.
    pub id: WalletId,
    /// Globally unique handle (e.g. `@alice`), if claimed.
    pub handle: Option<String>,
    /// Human-readable name.
    pub display_name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// One ledger account per (wallet, currency).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The account's id.
    pub id: AccountId,
    /// Owning wallet.
    pub wallet_id: WalletId,
    /// The single currency this account is denominated in.
    pub currency: Currency,
    /// User or system account.
    pub account_type: AccountType,
    /// Active or frozen.
    pub status: AccountStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Returns true if the non-negative balance invariant applies.
    #[must_use]
    pub const fn enforces_non_negative(&self) -> bool {
        matches!(self.account_type, AccountType::User)
    }
}

/// An atomic, balanced posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// The entry's id.
    pub id: EntryId,
    /// Kind of money movement.
    pub kind: EntryKind,
    /// Wallet that initiated the operation.
    pub initiator_wallet_id: WalletId,
    /// Optional client-supplied reference string.
    pub reference_id: Option<String>,
    /// Opaque metadata map.
    pub metadata: Map<String, Value>,
    /// The idempotency key the entry was created under, if any.
    pub idempotency_key: Option<String>,
    /// Back-link: capture → hold entry, refund → capture entry.
    pub linked_entry_id: Option<EntryId>,
    /// Commit timestamp.
    pub created_at: DateTime<Utc>,
}

/// One line of a journal entry. Amounts are strictly positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    /// The line's id.
    pub id: LineId,
    /// Entry the line belongs to.
    pub entry_id: EntryId,
    /// Account the line posts against.
    pub account_id: AccountId,
    /// Debit or credit.
    pub side: Side,
    /// Available or held bucket.
    pub bucket: Bucket,
    /// Positive amount in minor units.
    pub amount: Money,
}

/// Hold lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    /// Funds reserved, nothing captured yet.
    Active,
    /// Some but not all of the hold was captured.
    PartiallyCaptured,
    /// Fully captured; terminal.
    Captured,
    /// Remaining funds returned; terminal.
    Released,
    /// Expired before capture; remaining funds returned; terminal.
    Expired,
}

impl HoldStatus {
    /// Terminal states admit no further lines referencing the hold.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Captured | Self::Released | Self::Expired)
    }

    /// Whether a capture may still be posted.
    #[must_use]
    pub const fn can_capture(self) -> bool {
        matches!(self, Self::Active | Self::PartiallyCaptured)
    }

    /// Whether a release may still be posted.
    #[must_use]
    pub const fn can_release(self) -> bool {
        matches!(self, Self::Active | Self::PartiallyCaptured)
    }
}

/// A reservation of payer funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    /// The hold's id.
    pub id: HoldId,
    /// The payer account whose funds are reserved.
    pub account_id: AccountId,
    /// Original reserved amount.
    pub amount: Money,
    /// Uncaptured remainder; `0 <= remaining <= amount`.
    pub remaining: Money,
    /// Lifecycle state.
    pub status: HoldStatus,
    /// When the reservation lapses.
    pub expires_at: DateTime<Utc>,
    /// The entry that created the reservation.
    pub entry_id: EntryId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Hold {
    /// True once `now` has reached the expiry instant.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Payment intent lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Waiting for a payer.
    Pending,
    /// Paid; terminal.
    Paid,
    /// Expired unpaid; terminal.
    Expired,
    /// Cancelled by its creator; terminal.
    Cancelled,
}

/// A payee-initiated request that a specific payer must complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// The intent's id.
    pub id: IntentId,
    /// The account to be paid.
    pub payee_account_id: AccountId,
    /// The requested amount.
    pub amount: Money,
    /// Lifecycle state.
    pub status: IntentStatus,
    /// When the intent lapses.
    pub expires_at: DateTime<Utc>,
    /// Opaque metadata map.
    pub metadata: Map<String, Value>,
    /// The account that paid, once paid.
    pub payer_account_id: Option<AccountId>,
    /// The entry that settled the intent, once paid.
    pub paid_entry_id: Option<EntryId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl PaymentIntent {
    /// True once `now` has reached the expiry instant.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Refund posting status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    /// The refund entry was posted.
    Posted,
    /// The refund failed after a record was created.
    Failed,
}

/// A refund issued against a capture entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    /// The refund's id.
    pub id: RefundId,
    /// The capture entry being refunded.
    pub capture_entry_id: EntryId,
    /// Refunded amount.
    pub amount: Money,
    /// Posting status.
    pub status: RefundStatus,
    /// The entry that posted the refund.
    pub entry_id: EntryId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_hold_status_transitions() {
        assert!(HoldStatus::Active.can_capture());
        assert!(HoldStatus::PartiallyCaptured.can_capture());
        assert!(!HoldStatus::Captured.can_capture());
        assert!(!HoldStatus::Released.can_release());
        assert!(!HoldStatus::Expired.can_capture());

        for terminal in [
            HoldStatus::Captured,
            HoldStatus::Released,
            HoldStatus::Expired,
        ] {
            assert!(terminal.is_terminal());
        }
        assert!(!HoldStatus::Active.is_terminal());
        assert!(!HoldStatus::PartiallyCaptured.is_terminal());
    }

    #[test]
    fn test_hold_expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let hold = Hold {
            id: HoldId::new(),
            account_id: AccountId::new(),
            amount: Money::from_minor(100, Currency::Usd),
            remaining: Money::from_minor(100, Currency::Usd),
            status: HoldStatus::Active,
            expires_at: now,
            entry_id: EntryId::new(),
            created_at: now - Duration::seconds(60),
        };
        assert!(hold.is_expired(now));
        assert!(!hold.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn test_system_accounts_skip_non_negative_check() {
        let account = Account {
            id: AccountId::new(),
            wallet_id: WalletId::new(),
            currency: Currency::Usd,
            account_type: AccountType::System,
            status: AccountStatus::Active,
            created_at: Utc::now(),
        };
        assert!(!account.enforces_non_negative());
    }
}
