//! Posting primitives: the fixed debit/credit patterns for each operation
//! and the validation every entry must pass before it is inserted.
//!
//! | Operation   | Debit            | Credit           |
//! |-------------|------------------|------------------|
//! | Deposit     | treasury.avail   | target.avail     |
//! | Transfer    | payer.avail      | payee.avail      |
//! | Hold create | payer.avail      | payer.held       |
//! | Capture     | payer.held       | payee.avail      |
//! | Release     | payer.held       | payer.avail      |
//! | Intent pay  | payer.avail      | payee.avail      |
//! | Refund      | payee.avail      | payer.avail      |

use serde_json::{Map, Value};

use tesoro_shared::types::{AccountId, EntryId, WalletId};
use tesoro_shared::Money;

use super::error::LedgerError;
use super::types::{Bucket, EntryKind, Side};

/// One line of an entry under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSpec {
    /// Account the line posts against.
    pub account_id: AccountId,
    /// Debit or credit.
    pub side: Side,
    /// Available or held.
    pub bucket: Bucket,
    /// Positive amount.
    pub amount: Money,
}

/// A fully specified entry awaiting insertion.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    /// Pre-generated entry id, echoed in receipts before commit.
    pub id: EntryId,
    /// Kind of money movement.
    pub kind: EntryKind,
    /// Wallet that initiated the operation.
    pub initiator_wallet_id: WalletId,
    /// Optional client reference.
    pub reference_id: Option<String>,
    /// Opaque metadata.
    pub metadata: Map<String, Value>,
    /// The idempotency key the entry is created under.
    pub idempotency_key: Option<String>,
    /// Back-link for capture → hold and refund → capture.
    pub linked_entry_id: Option<EntryId>,
    /// The balanced line set.
    pub lines: Vec<LineSpec>,
}

impl EntryDraft {
    /// Builds a draft with a fresh id and validated lines.
    ///
    /// # Errors
    ///
    /// Returns the validation error of [`validate_lines`] if the line set is
    /// not balanced.
    pub fn new(
        kind: EntryKind,
        initiator_wallet_id: WalletId,
        lines: Vec<LineSpec>,
    ) -> Result<Self, LedgerError> {
        validate_lines(&lines)?;
        Ok(Self {
            id: EntryId::new(),
            kind,
            initiator_wallet_id,
            reference_id: None,
            metadata: Map::new(),
            idempotency_key: None,
            linked_entry_id: None,
            lines,
        })
    }

    /// Attaches a client reference.
    #[must_use]
    pub fn with_reference(mut self, reference_id: Option<String>) -> Self {
        self.reference_id = reference_id;
        self
    }

    /// Attaches metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attaches the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: String) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// Links this entry to an earlier one (capture → hold, refund → capture).
    #[must_use]
    pub fn with_link(mut self, linked: EntryId) -> Self {
        self.linked_entry_id = Some(linked);
        self
    }
}

/// Validates the accounting identity on a line set: at least two lines, all
/// amounts strictly positive, a single currency, and ∑debits = ∑credits.
///
/// # Errors
///
/// `Validation` for structural problems, `CurrencyMismatch` for mixed
/// currencies, `Arithmetic` if the totals overflow, and
/// `InvariantViolation` if the set does not balance (posting builders never
/// produce that; it guards hand-rolled drafts).
pub fn validate_lines(lines: &[LineSpec]) -> Result<(), LedgerError> {
    if lines.len() < 2 {
        return Err(LedgerError::Validation(
            "an entry needs at least one debit and one credit line".to_string(),
        ));
    }

    let currency = lines[0].amount.currency;
    let mut debits: i64 = 0;
    let mut credits: i64 = 0;

    for line in lines {
        if !line.amount.is_positive() {
            return Err(LedgerError::Validation(
                "line amounts must be positive".to_string(),
            ));
        }
        if line.amount.currency != currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: currency,
                actual: line.amount.currency,
            });
        }
        let total = match line.side {
            Side::Debit => &mut debits,
            Side::Credit => &mut credits,
        };
        *total = total
            .checked_add(line.amount.minor_units)
            .ok_or(LedgerError::Arithmetic)?;
    }

    if debits != credits {
        return Err(LedgerError::InvariantViolation(format!(
            "unbalanced entry: debits {debits} != credits {credits}"
        )));
    }

    Ok(())
}

/// Transfer: payer available → payee available.
#[must_use]
pub fn transfer_lines(payer: AccountId, payee: AccountId, amount: Money) -> Vec<LineSpec> {
    vec![
        LineSpec {
            account_id: payer,
            side: Side::Debit,
            bucket: Bucket::Available,
            amount,
        },
        LineSpec {
            account_id: payee,
            side: Side::Credit,
            bucket: Bucket::Available,
            amount,
        },
    ]
}

/// Deposit: treasury available → target available. Same shape as a transfer;
/// kept separate so the entry kind and the treasury exemption stay explicit
/// at call sites.
#[must_use]
pub fn deposit_lines(treasury: AccountId, target: AccountId, amount: Money) -> Vec<LineSpec> {
    transfer_lines(treasury, target, amount)
}

/// Hold create: payer available → payer held.
#[must_use]
pub fn hold_lines(payer: AccountId, amount: Money) -> Vec<LineSpec> {
    vec![
        LineSpec {
            account_id: payer,
            side: Side::Debit,
            bucket: Bucket::Available,
            amount,
        },
        LineSpec {
            account_id: payer,
            side: Side::Credit,
            bucket: Bucket::Held,
            amount,
        },
    ]
}

/// Capture: payer held → payee available.
#[must_use]
pub fn capture_lines(payer: AccountId, payee: AccountId, amount: Money) -> Vec<LineSpec> {
    vec![
        LineSpec {
            account_id: payer,
            side: Side::Debit,
            bucket: Bucket::Held,
            amount,
        },
        LineSpec {
            account_id: payee,
            side: Side::Credit,
            bucket: Bucket::Available,
            amount,
        },
    ]
}

/// Release: payer held → payer available.
#[must_use]
pub fn release_lines(payer: AccountId, amount: Money) -> Vec<LineSpec> {
    vec![
        LineSpec {
            account_id: payer,
            side: Side::Debit,
            bucket: Bucket::Held,
            amount,
        },
        LineSpec {
            account_id: payer,
            side: Side::Credit,
            bucket: Bucket::Available,
            amount,
        },
    ]
}

/// Intent pay: payer available → payee available.
#[must_use]
pub fn intent_pay_lines(payer: AccountId, payee: AccountId, amount: Money) -> Vec<LineSpec> {
    transfer_lines(payer, payee, amount)
}

/// Refund: payee (merchant) available → payer available.
#[must_use]
pub fn refund_lines(payee: AccountId, payer: AccountId, amount: Money) -> Vec<LineSpec> {
    transfer_lines(payee, payer, amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tesoro_shared::Currency;

    fn usd(minor: i64) -> Money {
        Money::from_minor(minor, Currency::Usd)
    }

    #[test]
    fn test_transfer_lines_balanced() {
        let lines = transfer_lines(AccountId::new(), AccountId::new(), usd(2500));
        assert!(validate_lines(&lines).is_ok());
        assert_eq!(lines[0].side, Side::Debit);
        assert_eq!(lines[0].bucket, Bucket::Available);
        assert_eq!(lines[1].side, Side::Credit);
        assert_eq!(lines[1].bucket, Bucket::Available);
    }

    #[test]
    fn test_hold_lines_stay_on_payer() {
        let payer = AccountId::new();
        let lines = hold_lines(payer, usd(10_000));
        assert!(validate_lines(&lines).is_ok());
        assert!(lines.iter().all(|l| l.account_id == payer));
        assert_eq!(lines[0].bucket, Bucket::Available);
        assert_eq!(lines[1].bucket, Bucket::Held);
    }

    #[test]
    fn test_capture_lines_move_held_to_payee() {
        let payer = AccountId::new();
        let payee = AccountId::new();
        let lines = capture_lines(payer, payee, usd(7500));
        assert_eq!(lines[0].account_id, payer);
        assert_eq!(lines[0].bucket, Bucket::Held);
        assert_eq!(lines[1].account_id, payee);
        assert_eq!(lines[1].bucket, Bucket::Available);
    }

    #[test]
    fn test_release_lines_return_to_available() {
        let payer = AccountId::new();
        let lines = release_lines(payer, usd(2500));
        assert_eq!(lines[0].bucket, Bucket::Held);
        assert_eq!(lines[0].side, Side::Debit);
        assert_eq!(lines[1].bucket, Bucket::Available);
        assert_eq!(lines[1].side, Side::Credit);
    }

    #[test]
    fn test_validate_rejects_single_line() {
        let lines = vec![LineSpec {
            account_id: AccountId::new(),
            side: Side::Debit,
            bucket: Bucket::Available,
            amount: usd(100),
        }];
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_amount() {
        let mut lines = transfer_lines(AccountId::new(), AccountId::new(), usd(100));
        lines[0].amount = usd(0);
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_mixed_currency() {
        let mut lines = transfer_lines(AccountId::new(), AccountId::new(), usd(100));
        lines[1].amount = Money::from_minor(100, Currency::Eur);
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unbalanced() {
        let mut lines = transfer_lines(AccountId::new(), AccountId::new(), usd(100));
        lines[1].amount = usd(99);
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_validate_overflow_is_arithmetic_error() {
        let a = AccountId::new();
        let b = AccountId::new();
        let lines = vec![
            LineSpec {
                account_id: a,
                side: Side::Debit,
                bucket: Bucket::Available,
                amount: usd(i64::MAX),
            },
            LineSpec {
                account_id: a,
                side: Side::Debit,
                bucket: Bucket::Available,
                amount: usd(1),
            },
            LineSpec {
                account_id: b,
                side: Side::Credit,
                bucket: Bucket::Available,
                amount: usd(1),
            },
        ];
        assert_eq!(validate_lines(&lines), Err(LedgerError::Arithmetic));
    }

    proptest! {
        /// Every posting builder produces a balanced, same-currency line set
        /// for any positive amount.
        #[test]
        fn prop_builders_always_balance(minor in 1i64..1_000_000_000) {
            let payer = AccountId::new();
            let payee = AccountId::new();
            let amount = usd(minor);

            prop_assert!(validate_lines(&transfer_lines(payer, payee, amount)).is_ok());
            prop_assert!(validate_lines(&deposit_lines(payer, payee, amount)).is_ok());
            prop_assert!(validate_lines(&hold_lines(payer, amount)).is_ok());
            prop_assert!(validate_lines(&capture_lines(payer, payee, amount)).is_ok());
            prop_assert!(validate_lines(&release_lines(payer, amount)).is_ok());
            prop_assert!(validate_lines(&intent_pay_lines(payer, payee, amount)).is_ok());
            prop_assert!(validate_lines(&refund_lines(payee, payer, amount)).is_ok());
        }

        /// Debit and credit totals computed independently always agree for
        /// builder output.
        #[test]
        fn prop_builder_totals_equal(minor in 1i64..1_000_000_000) {
            let lines = transfer_lines(AccountId::new(), AccountId::new(), usd(minor));
            let debits: i64 = lines
                .iter()
                .filter(|l| l.side == Side::Debit)
                .map(|l| l.amount.minor_units)
                .sum();
            let credits: i64 = lines
                .iter()
                .filter(|l| l.side == Side::Credit)
                .map(|l| l.amount.minor_units)
                .sum();
            prop_assert_eq!(debits, credits);
        }
    }
}
