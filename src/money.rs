//! Fixed-point integer money.
//!
//! Amounts are signed minor units (cents) from the wire all the way through
//! the account aggregate, so no conversion between an integer and a decimal
//! representation ever happens except for display.

use std::fmt;
use std::ops::{Add, Neg, Sub};

use serde::{Deserialize, Serialize};

/// An amount of money in minor units (e.g. cents), signed so that balances
/// may go negative within a credit limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// The zero amount.
    pub const ZERO: Money = Money(0);

    /// Builds a `Money` from a raw minor-unit count.
    #[must_use]
    pub const fn from_minor_units(minor_units: i64) -> Self {
        Money(minor_units)
    }

    /// Returns the raw minor-unit count.
    #[must_use]
    pub const fn minor_units(self) -> i64 {
        self.0
    }

    /// True if this amount is strictly positive.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// True if this amount is negative.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Checked addition; `None` on overflow.
    #[must_use]
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Checked subtraction; `None` on overflow.
    #[must_use]
    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl fmt::Display for Money {
    /// Renders as `major.minor` for diagnostics; never used for the wire
    /// representation, which stays an integer minor-unit count.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl From<i64> for Money {
    fn from(minor_units: i64) -> Self {
        Money(minor_units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_major_minor() {
        assert_eq!(Money::from_minor_units(100_000).to_string(), "1000.00");
        assert_eq!(Money::from_minor_units(-3_050).to_string(), "-30.50");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn checked_add_overflow_is_none() {
        assert_eq!(Money::from_minor_units(i64::MAX).checked_add(Money::from_minor_units(1)), None);
    }
}
