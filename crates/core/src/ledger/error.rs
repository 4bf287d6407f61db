//! Ledger error types.
//!
//! Every failure the engine can produce, with a stable machine code, an HTTP
//! status for the adapter, and the classification the executor and the
//! idempotency manager depend on: final errors are recorded in idempotency
//! snapshots and replayed on retry; transient errors leave no trace so a
//! legitimate retry can proceed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tesoro_shared::types::{AccountId, EntryId, HoldId, IntentId};
use tesoro_shared::Currency;

use super::types::{HoldStatus, IntentStatus};

/// Errors that can occur during ledger operations.
///
/// The enum is serializable so that final failures round-trip through
/// idempotency snapshots without losing their structured fields.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LedgerError {
    // ========== Client input ==========
    /// Malformed or out-of-range input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Currencies within one operation do not match.
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch {
        /// The currency the operation requires.
        expected: Currency,
        /// The currency actually supplied or resolved.
        actual: Currency,
    },

    /// The recipient reference did not resolve to an account.
    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    /// Transfer where payer and payee are the same wallet.
    #[error("Cannot transfer to the same wallet")]
    SelfTransfer,

    // ========== State preconditions ==========
    /// Payer has less available than the operation needs.
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        /// Available minor units at validation time.
        available: i64,
        /// Minor units the operation required.
        required: i64,
    },

    /// The account is frozen.
    #[error("Account {0} is frozen")]
    AccountFrozen(AccountId),

    /// Hold does not exist.
    #[error("Hold not found: {0}")]
    HoldNotFound(HoldId),

    /// Hold is in a state that does not permit the operation.
    #[error("Hold is {status:?} and cannot be modified")]
    HoldNotActive {
        /// The hold's current status.
        status: HoldStatus,
    },

    /// Hold has expired; remaining funds were returned to available.
    #[error("Hold {0} has expired")]
    HoldExpired(HoldId),

    /// Capture amount exceeds what remains on the hold.
    #[error("Capture of {requested} exceeds remaining hold amount {remaining}")]
    CaptureExceedsHold {
        /// Requested capture minor units.
        requested: i64,
        /// Remaining minor units on the hold.
        remaining: i64,
    },

    /// Payment intent does not exist.
    #[error("Payment intent not found: {0}")]
    IntentNotFound(IntentId),

    /// Payment intent has expired.
    #[error("Payment intent {0} has expired")]
    IntentExpired(IntentId),

    /// Payment intent was already paid.
    #[error("Payment intent {0} was already paid")]
    IntentAlreadyPaid(IntentId),

    /// Payment intent is cancelled or otherwise unpayable.
    #[error("Payment intent is {status:?} and cannot be paid")]
    IntentNotPayable {
        /// The intent's current status.
        status: IntentStatus,
    },

    /// The referenced capture entry does not exist.
    #[error("Capture entry not found: {0}")]
    CaptureNotFound(EntryId),

    /// Refund amount exceeds what is still refundable on the capture.
    #[error("Refund of {requested} exceeds refundable amount {refundable}")]
    RefundExceedsCapture {
        /// Requested refund minor units.
        requested: i64,
        /// Refundable minor units remaining on the capture.
        refundable: i64,
    },

    // ========== Authorization ==========
    /// The API key lacks a required scope or acts outside its authority.
    #[error("Forbidden: {0}")]
    ForbiddenScope(String),

    /// A spend ceiling would be exceeded.
    #[error("Spend limit exceeded: {spent} spent + {requested} requested > limit {limit}")]
    LimitExceeded {
        /// Minor units already spent inside the window (0 for per-tx checks).
        spent: i64,
        /// Minor units this operation would add.
        requested: i64,
        /// The applicable ceiling.
        limit: i64,
    },

    // ========== Idempotency ==========
    /// Same key reused with a different request body.
    #[error("Idempotency key reused with a different request body")]
    IdempotencyConflict,

    /// Same key, original request still running.
    #[error("A request with this idempotency key is still in progress")]
    IdempotencyInProgress,

    // ========== Transient ==========
    /// Store-level serialization conflict persisted past the retry budget.
    #[error("Transient conflict, please retry")]
    TransientConflict,

    /// The operation deadline elapsed before commit.
    #[error("Operation timed out before commit")]
    Timeout,

    // ========== Internal ==========
    /// Integer monetary arithmetic overflowed.
    #[error("Monetary arithmetic overflowed")]
    Arithmetic,

    /// A ledger invariant failed after posting; the transaction was rolled back.
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    /// Underlying store failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl LedgerError {
    /// Returns the stable machine code for API responses and snapshots.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::RecipientNotFound(_) => "RECIPIENT_NOT_FOUND",
            Self::SelfTransfer => "SELF_TRANSFER",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::AccountFrozen(_) => "ACCOUNT_FROZEN",
            Self::HoldNotFound(_) => "HOLD_NOT_FOUND",
            Self::HoldNotActive { .. } => "HOLD_NOT_ACTIVE",
            Self::HoldExpired(_) => "HOLD_EXPIRED",
            Self::CaptureExceedsHold { .. } => "CAPTURE_EXCEEDS_HOLD",
            Self::IntentNotFound(_) => "INTENT_NOT_FOUND",
            Self::IntentExpired(_) => "INTENT_EXPIRED",
            Self::IntentAlreadyPaid(_) => "INTENT_ALREADY_PAID",
            Self::IntentNotPayable { .. } => "INTENT_NOT_PAYABLE",
            Self::CaptureNotFound(_) => "CAPTURE_NOT_FOUND",
            Self::RefundExceedsCapture { .. } => "REFUND_EXCEEDS_CAPTURE",
            Self::ForbiddenScope(_) => "FORBIDDEN_SCOPE",
            Self::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            Self::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            Self::IdempotencyInProgress => "IDEMPOTENCY_IN_PROGRESS",
            Self::TransientConflict => "TRANSIENT_CONFLICT",
            Self::Timeout => "TIMEOUT",
            Self::Arithmetic => "ARITHMETIC_ERROR",
            Self::InvariantViolation(_) => "LEDGER_INVARIANT",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::SelfTransfer => 400,

            Self::ForbiddenScope(_) | Self::AccountFrozen(_) => 403,

            Self::RecipientNotFound(_)
            | Self::HoldNotFound(_)
            | Self::IntentNotFound(_)
            | Self::CaptureNotFound(_) => 404,

            Self::HoldNotActive { .. }
            | Self::HoldExpired(_)
            | Self::IntentExpired(_)
            | Self::IntentAlreadyPaid(_)
            | Self::IntentNotPayable { .. }
            | Self::IdempotencyConflict
            | Self::IdempotencyInProgress => 409,

            Self::CurrencyMismatch { .. }
            | Self::InsufficientFunds { .. }
            | Self::CaptureExceedsHold { .. }
            | Self::RefundExceedsCapture { .. } => 422,

            Self::LimitExceeded { .. } => 429,

            Self::TransientConflict => 503,
            Self::Timeout => 504,

            Self::Arithmetic | Self::InvariantViolation(_) | Self::Store(_) => 500,
        }
    }

    /// Whether the outcome is recorded in the idempotency snapshot.
    ///
    /// Client-input and state-precondition failures are final: a retry with
    /// the same key replays the same failure. Authorization, idempotency,
    /// transient, and internal failures are never snapshotted.
    #[must_use]
    pub const fn is_recorded(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::CurrencyMismatch { .. }
                | Self::RecipientNotFound(_)
                | Self::SelfTransfer
                | Self::InsufficientFunds { .. }
                | Self::AccountFrozen(_)
                | Self::HoldNotFound(_)
                | Self::HoldNotActive { .. }
                | Self::HoldExpired(_)
                | Self::CaptureExceedsHold { .. }
                | Self::IntentNotFound(_)
                | Self::IntentExpired(_)
                | Self::IntentAlreadyPaid(_)
                | Self::IntentNotPayable { .. }
                | Self::CaptureNotFound(_)
                | Self::RefundExceedsCapture { .. }
        )
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_stable() {
        assert_eq!(
            LedgerError::Validation("x".into()).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            LedgerError::InsufficientFunds {
                available: 1,
                required: 2
            }
            .error_code(),
            "INSUFFICIENT_FUNDS"
        );
        assert_eq!(
            LedgerError::IdempotencyConflict.error_code(),
            "IDEMPOTENCY_CONFLICT"
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(LedgerError::Validation("x".into()).http_status_code(), 400);
        assert_eq!(
            LedgerError::ForbiddenScope("transfer".into()).http_status_code(),
            403
        );
        assert_eq!(
            LedgerError::RecipientNotFound("@ghost".into()).http_status_code(),
            404
        );
        assert_eq!(LedgerError::IdempotencyConflict.http_status_code(), 409);
        assert_eq!(
            LedgerError::InsufficientFunds {
                available: 0,
                required: 1
            }
            .http_status_code(),
            422
        );
        assert_eq!(
            LedgerError::LimitExceeded {
                spent: 0,
                requested: 1,
                limit: 0
            }
            .http_status_code(),
            429
        );
        assert_eq!(LedgerError::TransientConflict.http_status_code(), 503);
        assert_eq!(LedgerError::Timeout.http_status_code(), 504);
        assert_eq!(LedgerError::Arithmetic.http_status_code(), 500);
    }

    #[test]
    fn test_recorded_classification() {
        assert!(LedgerError::InsufficientFunds {
            available: 0,
            required: 1
        }
        .is_recorded());
        assert!(LedgerError::Validation("x".into()).is_recorded());
        assert!(!LedgerError::ForbiddenScope("x".into()).is_recorded());
        assert!(!LedgerError::LimitExceeded {
            spent: 0,
            requested: 1,
            limit: 0
        }
        .is_recorded());
        assert!(!LedgerError::TransientConflict.is_recorded());
        assert!(!LedgerError::Store("x".into()).is_recorded());
    }

    #[test]
    fn test_serde_round_trip_preserves_fields() {
        let err = LedgerError::InsufficientFunds {
            available: 975,
            required: 2500,
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: LedgerError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
