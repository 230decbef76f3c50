//! Arbitrary-precision amounts in the ledger's smallest unit.

use num_bigint::BigUint;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid amount '{0}': expected a non-negative decimal integer")]
pub struct AmountParseError(pub String);

/// Non-negative integer amount. Serialized as a decimal string so no JSON
/// consumer ever rounds it through a float.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigUint);

impl Amount {
    pub fn zero() -> Self {
        Self(BigUint::default())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::default()
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        if self.0 >= other.0 {
            Some(Amount(&self.0 - &other.0))
        } else {
            None
        }
    }

    pub fn mul_u64(&self, factor: u64) -> Amount {
        Amount(&self.0 * factor)
    }

    /// `self * numerator / denominator`, rounded down. A zero denominator yields zero.
    pub fn mul_ratio_floor(&self, numerator: u64, denominator: u64) -> Amount {
        if denominator == 0 {
            return Amount::zero();
        }
        Amount(&self.0 * numerator / denominator)
    }

    /// Human-readable rendering with `decimals` fractional digits, trailing zeros trimmed.
    /// Display only; never feed the result back into a write.
    pub fn format_units(&self, decimals: u32) -> String {
        if decimals == 0 {
            return self.0.to_string();
        }
        let divisor = BigUint::from(10u32).pow(decimals);
        let whole = &self.0 / &divisor;
        let fraction = (&self.0 % &divisor).to_string();
        let padded = format!("{:0>width$}", fraction, width = decimals as usize);
        let trimmed = padded.trim_end_matches('0');
        if trimmed.is_empty() {
            whole.to_string()
        } else {
            format!("{}.{}", whole, trimmed)
        }
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Self(BigUint::from(value))
    }
}

impl From<BigUint> for Amount {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl<'a> Add<&'a Amount> for &'a Amount {
    type Output = Amount;

    fn add(self, rhs: &'a Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        self.0 += &rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::zero(), |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.fold(Amount::zero(), |acc, x| &acc + x)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError(s.to_string()));
        }
        trimmed
            .parse::<BigUint>()
            .map(Amount)
            .map_err(|_| AmountParseError(s.to_string()))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_values_beyond_u128() {
        let raw = "340282366920938463463374607431768211456000"; // > u128::MAX
        let amount: Amount = raw.parse().unwrap();
        assert_eq!(amount.to_string(), raw);
    }

    #[test]
    fn rejects_signs_and_fractions() {
        assert!("-5".parse::<Amount>().is_err());
        assert!("1.5".parse::<Amount>().is_err());
        assert!("".parse::<Amount>().is_err());
    }

    #[test]
    fn serializes_as_decimal_string() {
        let amount = Amount::from(1_000_000_000_000_000_000u128);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"1000000000000000000\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn format_units_trims_fraction() {
        assert_eq!(Amount::from(1_500_000_000_000_000_000u128).format_units(18), "1.5");
        assert_eq!(Amount::from(300_000_000_000_000u64).format_units(18), "0.0003");
        assert_eq!(Amount::from(2_000_000u64).format_units(6), "2");
        assert_eq!(Amount::from(42u64).format_units(0), "42");
    }

    #[test]
    fn checked_sub_and_ratio() {
        let a = Amount::from(100u64);
        let b = Amount::from(30u64);
        assert_eq!(a.checked_sub(&b), Some(Amount::from(70u64)));
        assert_eq!(b.checked_sub(&a), None);
        assert_eq!(a.mul_ratio_floor(250, 10_000), Amount::from(2u64));
        assert_eq!(a.mul_ratio_floor(1, 0), Amount::zero());
    }

    #[test]
    fn sums_by_reference() {
        let parts = vec![Amount::from(1u64), Amount::from(2u64), Amount::from(3u64)];
        let total: Amount = parts.iter().sum();
        assert_eq!(total, Amount::from(6u64));
    }
}
