//! Money type with exact integer minor-unit amounts and a currency tag.
//!
//! CRITICAL: Never use floating-point for money calculations.
//! Amounts are `i64` counts of the currency's minor unit (e.g. cents), and
//! every arithmetic operation is overflow-checked. Decimal strings are only
//! handled at the boundary, where they are normalized to minor units against
//! the currency's declared scale.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by money parsing and arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    /// Arithmetic overflowed the i64 minor-unit range.
    #[error("Monetary arithmetic overflowed")]
    Overflow,

    /// Two amounts in different currencies were combined.
    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        /// Left-hand currency.
        left: Currency,
        /// Right-hand currency.
        right: Currency,
    },

    /// The input string is not a valid decimal amount.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The input has more fractional digits than the currency allows.
    #[error("Amount has more than {scale} fractional digits for {currency}")]
    PrecisionExceeded {
        /// The offending currency.
        currency: Currency,
        /// The currency's minor-unit scale.
        scale: u32,
    },
}

/// ISO 4217 currency codes supported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// US Dollar
    Usd,
    /// Euro
    Eur,
    /// Indonesian Rupiah
    Idr,
    /// Singapore Dollar
    Sgd,
    /// Japanese Yen
    Jpy,
}

impl Currency {
    /// Number of fractional digits in the currency's minor unit.
    #[must_use]
    pub const fn scale(self) -> u32 {
        match self {
            Self::Usd | Self::Eur | Self::Idr | Self::Sgd => 2,
            Self::Jpy => 0,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usd => write!(f, "USD"),
            Self::Eur => write!(f, "EUR"),
            Self::Idr => write!(f, "IDR"),
            Self::Sgd => write!(f, "SGD"),
            Self::Jpy => write!(f, "JPY"),
        }
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USD" => Ok(Self::Usd),
            "EUR" => Ok(Self::Eur),
            "IDR" => Ok(Self::Idr),
            "SGD" => Ok(Self::Sgd),
            "JPY" => Ok(Self::Jpy),
            _ => Err(format!("Unknown currency: {s}")),
        }
    }
}

/// A monetary amount: an integer count of minor units plus its currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// The amount in the currency's smallest unit (e.g. cents).
    pub minor_units: i64,
    /// The currency the amount is denominated in.
    pub currency: Currency,
}

impl Money {
    /// Creates a new amount from minor units.
    #[must_use]
    pub const fn from_minor(minor_units: i64, currency: Currency) -> Self {
        Self {
            minor_units,
            currency,
        }
    }

    /// Creates a zero amount in the given currency.
    #[must_use]
    pub const fn zero(currency: Currency) -> Self {
        Self {
            minor_units: 0,
            currency,
        }
    }

    /// Parses a decimal string (e.g. `"25.00"`) into minor units.
    ///
    /// # Errors
    ///
    /// Returns `MoneyError::InvalidAmount` if the string is not a decimal
    /// number, `PrecisionExceeded` if it has more fractional digits than the
    /// currency's scale, and `Overflow` if it exceeds the i64 range.
    pub fn parse(input: &str, currency: Currency) -> Result<Self, MoneyError> {
        let decimal: Decimal = input
            .trim()
            .parse()
            .map_err(|_| MoneyError::InvalidAmount(input.to_string()))?;

        if decimal.scale() > currency.scale() && decimal.normalize().scale() > currency.scale() {
            return Err(MoneyError::PrecisionExceeded {
                currency,
                scale: currency.scale(),
            });
        }

        let scaled = decimal
            .checked_mul(Decimal::from(10i64.pow(currency.scale())))
            .ok_or(MoneyError::Overflow)?;
        let minor_units = scaled.normalize().to_i64().ok_or(MoneyError::Overflow)?;

        Ok(Self {
            minor_units,
            currency,
        })
    }

    /// Returns true if the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    /// Returns true if the amount is strictly positive.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.minor_units > 0
    }

    /// Checked addition; both operands must share a currency.
    ///
    /// # Errors
    ///
    /// Returns `CurrencyMismatch` for mixed currencies, `Overflow` on i64
    /// overflow.
    pub fn checked_add(self, other: Self) -> Result<Self, MoneyError> {
        self.require_same_currency(other)?;
        let minor_units = self
            .minor_units
            .checked_add(other.minor_units)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self {
            minor_units,
            currency: self.currency,
        })
    }

    /// Checked subtraction; both operands must share a currency.
    ///
    /// # Errors
    ///
    /// Returns `CurrencyMismatch` for mixed currencies, `Overflow` on i64
    /// overflow.
    pub fn checked_sub(self, other: Self) -> Result<Self, MoneyError> {
        self.require_same_currency(other)?;
        let minor_units = self
            .minor_units
            .checked_sub(other.minor_units)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self {
            minor_units,
            currency: self.currency,
        })
    }

    fn require_same_currency(self, other: Self) -> Result<(), MoneyError> {
        if self.currency == other.currency {
            Ok(())
        } else {
            Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            })
        }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scale = self.currency.scale();
        if scale == 0 {
            return write!(f, "{} {}", self.minor_units, self.currency);
        }
        let divisor = 10i64.pow(scale);
        let whole = self.minor_units / divisor;
        let frac = (self.minor_units % divisor).abs();
        let sign = if self.minor_units < 0 && whole == 0 {
            "-"
        } else {
            ""
        };
        write!(
            f,
            "{sign}{whole}.{frac:0width$} {}",
            self.currency,
            width = scale as usize
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_parse_whole_and_fractional() {
        assert_eq!(
            Money::parse("25.00", Currency::Usd).unwrap(),
            Money::from_minor(2500, Currency::Usd)
        );
        assert_eq!(
            Money::parse("0.05", Currency::Usd).unwrap(),
            Money::from_minor(5, Currency::Usd)
        );
        assert_eq!(
            Money::parse("1000", Currency::Usd).unwrap(),
            Money::from_minor(100_000, Currency::Usd)
        );
    }

    #[test]
    fn test_parse_zero_scale_currency() {
        assert_eq!(
            Money::parse("500", Currency::Jpy).unwrap(),
            Money::from_minor(500, Currency::Jpy)
        );
        assert!(matches!(
            Money::parse("500.5", Currency::Jpy),
            Err(MoneyError::PrecisionExceeded { .. })
        ));
    }

    #[test]
    fn test_parse_excess_precision_rejected() {
        assert!(matches!(
            Money::parse("1.005", Currency::Usd),
            Err(MoneyError::PrecisionExceeded { .. })
        ));
        // Trailing zeros beyond the scale are harmless.
        assert_eq!(
            Money::parse("1.500", Currency::Usd).unwrap(),
            Money::from_minor(150, Currency::Usd)
        );
    }

    #[test]
    fn test_parse_garbage_rejected() {
        assert!(matches!(
            Money::parse("ten dollars", Currency::Usd),
            Err(MoneyError::InvalidAmount(_))
        ));
        assert!(matches!(
            Money::parse("", Currency::Usd),
            Err(MoneyError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_checked_add() {
        let a = Money::from_minor(100, Currency::Usd);
        let b = Money::from_minor(250, Currency::Usd);
        assert_eq!(
            a.checked_add(b).unwrap(),
            Money::from_minor(350, Currency::Usd)
        );
    }

    #[test]
    fn test_checked_add_overflow() {
        let a = Money::from_minor(i64::MAX, Currency::Usd);
        let b = Money::from_minor(1, Currency::Usd);
        assert_eq!(a.checked_add(b), Err(MoneyError::Overflow));
    }

    #[test]
    fn test_currency_mismatch() {
        let usd = Money::from_minor(100, Currency::Usd);
        let eur = Money::from_minor(100, Currency::Eur);
        assert!(matches!(
            usd.checked_add(eur),
            Err(MoneyError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_checked_sub() {
        let a = Money::from_minor(500, Currency::Usd);
        let b = Money::from_minor(200, Currency::Usd);
        assert_eq!(
            a.checked_sub(b).unwrap(),
            Money::from_minor(300, Currency::Usd)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Money::from_minor(2500, Currency::Usd).to_string(),
            "25.00 USD"
        );
        assert_eq!(Money::from_minor(5, Currency::Usd).to_string(), "0.05 USD");
        assert_eq!(
            Money::from_minor(500, Currency::Jpy).to_string(),
            "500 JPY"
        );
        assert_eq!(
            Money::from_minor(-75, Currency::Usd).to_string(),
            "-0.75 USD"
        );
    }

    #[test]
    fn test_currency_from_str() {
        assert_eq!(Currency::from_str("usd").unwrap(), Currency::Usd);
        assert_eq!(Currency::from_str("EUR").unwrap(), Currency::Eur);
        assert!(Currency::from_str("XXX").is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let m = Money::from_minor(2500, Currency::Usd);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"minor_units":2500,"currency":"USD"}"#);
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
