//! Fixed-point monetary amounts.
//!
//! Every amount in the ledger is an integer number of minor units (cents).
//! Nothing in the ledger path touches floating point.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Amount in the smallest currency unit (e.g., cents).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Whole units (e.g. dollars) to cents.
    pub fn from_units(units: i64) -> Result<Self, DomainError> {
        units
            .checked_mul(100)
            .map(Self)
            .ok_or_else(|| DomainError::validation("amount overflow"))
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Validates an amount that is about to be posted or withdrawn.
    pub fn ensure_positive(self, what: &str) -> Result<Money, DomainError> {
        if self.is_positive() {
            Ok(self)
        } else {
            Err(DomainError::validation(format!("{what} must be positive")))
        }
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Money {
    type Err = DomainError;

    /// Parses `"12"`, `"12.3"` or `"12.34"` (optionally signed). More than two
    /// fractional digits is rejected rather than rounded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("invalid amount: {s:?}"));

        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac_cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse::<i64>().map_err(|_| invalid())?,
        };

        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .ok_or_else(invalid)?;

        Ok(Money(if negative { -cents } else { cents }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display_pads_cents() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-105).to_string(), "-1.05");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn parse_accepts_short_fractions() {
        assert_eq!("12".parse::<Money>().unwrap(), Money::from_cents(1200));
        assert_eq!("12.3".parse::<Money>().unwrap(), Money::from_cents(1230));
        assert_eq!("0.07".parse::<Money>().unwrap(), Money::from_cents(7));
        assert_eq!("-3.50".parse::<Money>().unwrap(), Money::from_cents(-350));
    }

    #[test]
    fn parse_rejects_sub_cent_precision() {
        assert!("1.234".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());
        assert!(".5".parse::<Money>().is_err());
        assert!("1e3".parse::<Money>().is_err());
    }

    #[test]
    fn ensure_positive_rejects_zero() {
        assert!(Money::ZERO.ensure_positive("amount").is_err());
        assert!(Money::from_cents(-1).ensure_positive("amount").is_err());
        assert_eq!(
            Money::from_cents(1).ensure_positive("amount").unwrap(),
            Money::from_cents(1)
        );
    }

    #[test]
    fn serializes_as_plain_cents() {
        let json = serde_json::to_string(&Money::from_cents(5000)).unwrap();
        assert_eq!(json, "5000");
    }

    proptest! {
        /// Repeated credit/debit of the same amounts never drifts.
        #[test]
        fn add_then_sub_is_exact(start in 0i64..1_000_000_000, amounts in prop::collection::vec(1i64..10_000_000, 0..50)) {
            let mut m = Money::from_cents(start);
            for a in &amounts {
                m = m.checked_add(Money::from_cents(*a)).unwrap();
            }
            for a in amounts.iter().rev() {
                m = m.checked_sub(Money::from_cents(*a)).unwrap();
            }
            prop_assert_eq!(m, Money::from_cents(start));
        }

        #[test]
        fn display_parses_back(cents in -1_000_000_000i64..1_000_000_000) {
            let m = Money::from_cents(cents);
            prop_assert_eq!(m.to_string().parse::<Money>().unwrap(), m);
        }
    }
}
