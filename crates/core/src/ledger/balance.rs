//! Balance derivation from journal lines.
//!
//! Balances are never stored. For each (account, bucket):
//! `balance = ∑credits − ∑debits`, computed from lines visible inside the
//! caller's transaction (and thus inside the account lock).

use serde::{Deserialize, Serialize};

use tesoro_shared::Currency;

use super::error::LedgerError;
use super::types::{Bucket, Side};

/// Running totals for one balance bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketTotals {
    /// Sum of credit line amounts.
    pub credits: i64,
    /// Sum of debit line amounts.
    pub debits: i64,
}

impl BucketTotals {
    /// Adds one line amount to the matching side.
    ///
    /// # Errors
    ///
    /// Returns `Arithmetic` if the running total overflows.
    pub fn add(&mut self, side: Side, minor_units: i64) -> Result<(), LedgerError> {
        let total = match side {
            Side::Credit => &mut self.credits,
            Side::Debit => &mut self.debits,
        };
        *total = total
            .checked_add(minor_units)
            .ok_or(LedgerError::Arithmetic)?;
        Ok(())
    }

    /// Net balance of the bucket: credits minus debits.
    ///
    /// # Errors
    ///
    /// Returns `Arithmetic` on overflow.
    pub fn net(&self) -> Result<i64, LedgerError> {
        self.credits
            .checked_sub(self.debits)
            .ok_or(LedgerError::Arithmetic)
    }
}

/// Derived balances of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    /// Spendable funds, in minor units.
    pub available: i64,
    /// Funds reserved by holds, in minor units.
    pub held: i64,
    /// The account's currency.
    pub currency: Currency,
}

impl Balances {
    /// Total funds: available + held.
    ///
    /// # Errors
    ///
    /// Returns `Arithmetic` on overflow.
    pub fn total(&self) -> Result<i64, LedgerError> {
        self.available
            .checked_add(self.held)
            .ok_or(LedgerError::Arithmetic)
    }

    /// Returns the invariant failure, if any: user accounts must never hold
    /// a negative bucket balance after commit.
    ///
    /// # Errors
    ///
    /// `InvariantViolation` naming the offending bucket.
    pub fn check_non_negative(&self) -> Result<(), LedgerError> {
        if self.available < 0 {
            return Err(LedgerError::InvariantViolation(format!(
                "available balance went negative: {}",
                self.available
            )));
        }
        if self.held < 0 {
            return Err(LedgerError::InvariantViolation(format!(
                "held balance went negative: {}",
                self.held
            )));
        }
        Ok(())
    }
}

/// Accumulator used by stores to fold lines into per-bucket totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceAccumulator {
    available: BucketTotals,
    held: BucketTotals,
}

impl BalanceAccumulator {
    /// Folds one line into the accumulator.
    ///
    /// # Errors
    ///
    /// Returns `Arithmetic` on overflow.
    pub fn add_line(
        &mut self,
        bucket: Bucket,
        side: Side,
        minor_units: i64,
    ) -> Result<(), LedgerError> {
        match bucket {
            Bucket::Available => self.available.add(side, minor_units),
            Bucket::Held => self.held.add(side, minor_units),
        }
    }

    /// Finishes the fold into derived balances.
    ///
    /// # Errors
    ///
    /// Returns `Arithmetic` on overflow.
    pub fn finish(self, currency: Currency) -> Result<Balances, LedgerError> {
        Ok(Balances {
            available: self.available.net()?,
            held: self.held.net()?,
            currency,
        })
    }
}
