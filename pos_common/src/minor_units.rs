use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::op;

/// The largest amount a payment device is asked to handle. Card terminals carry amounts as 12-digit fields.
pub const MAX_MINOR_UNITS: i64 = 999_999_999_999;

//--------------------------------------     MinorUnits       ---------------------------------------------------------
/// An amount of money in the minor units (cents) of the configured currency.
///
/// Both payment devices exchange integer minor units, so no floating point ever touches an amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinorUnits(i64);

op!(binary MinorUnits, Add, add);
op!(binary MinorUnits, Sub, sub);
op!(inplace MinorUnits, AddAssign, add_assign);
op!(inplace MinorUnits, SubAssign, sub_assign);
op!(unary MinorUnits, Neg, neg);

impl From<i64> for MinorUnits {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Display for MinorUnits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl MinorUnits {
    pub const ZERO: Self = Self(0);

    pub fn value(&self) -> i64 {
        self.0
    }

    /// `None` on overflow. Figures reported by the devices go through these rather than the operators.
    pub fn checked_mul(self, count: i64) -> Option<Self> {
        self.0.checked_mul(count).map(Self)
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// True when the amount is positive and small enough for the devices to represent.
    pub fn is_payable(&self) -> bool {
        self.is_positive() && self.0 <= MAX_MINOR_UNITS
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_as_major_units() {
        assert_eq!(MinorUnits::from(1050).to_string(), "10.50");
        assert_eq!(MinorUnits::from(5).to_string(), "0.05");
        assert_eq!(MinorUnits::from(-250).to_string(), "-2.50");
        assert_eq!(MinorUnits::from(300).to_string(), "3.00");
    }

    #[test]
    fn arithmetic() {
        let mut a = MinorUnits::from(500);
        a += MinorUnits::from(250);
        assert_eq!(a, MinorUnits::from(750));
        a -= MinorUnits::from(50);
        assert_eq!(a.value(), 700);
        assert_eq!(-a, MinorUnits::from(-700));
    }

    #[test]
    fn checked_arithmetic() {
        assert_eq!(MinorUnits::from(200).checked_mul(3), Some(MinorUnits::from(600)));
        assert_eq!(MinorUnits::from(200).checked_mul(i64::MAX / 2), None);
        assert_eq!(MinorUnits::from(100).checked_add(MinorUnits::from(50)), Some(MinorUnits::from(150)));
        assert_eq!(MinorUnits::from(i64::MAX).checked_add(MinorUnits::from(1)), None);
    }

    #[test]
    fn payable_bounds() {
        assert!(!MinorUnits::ZERO.is_payable());
        assert!(!MinorUnits::from(-1).is_payable());
        assert!(MinorUnits::from(1).is_payable());
        assert!(!MinorUnits::from(MAX_MINOR_UNITS + 1).is_payable());
    }

    #[test]
    fn serializes_as_plain_integer() {
        let json = serde_json::to_string(&MinorUnits::from(1050)).unwrap();
        assert_eq!(json, "1050");
        let back: MinorUnits = serde_json::from_str("42").unwrap();
        assert_eq!(back.value(), 42);
    }
}
