//! Decimal types for prices and amounts
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Feed numbers are converted through their textual JSON form so the stored
//! value is exactly what the venue sent.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::TypeError;

/// A price point. Totally ordered, usable as a sorted-map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Whole-number price, mostly for fixtures.
    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    /// Parse a price from text (plain or scientific notation).
    pub fn from_str(text: &str) -> Result<Self, TypeError> {
        parse_decimal(text).map(Self)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl From<Decimal> for Price {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Book side, derived from the sign of a level amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Positive amount
    Bid,
    /// Negative amount
    Ask,
}

impl Side {
    /// Classify an amount. Zero has no side (it is a deletion marker).
    pub fn of(amount: Decimal) -> Option<Self> {
        if amount > Decimal::ZERO {
            Some(Side::Bid)
        } else if amount < Decimal::ZERO {
            Some(Side::Ask)
        } else {
            None
        }
    }
}

/// Parse decimal text, accepting the exponent form serde_json emits for
/// very small or very large floats (`1e-7`).
pub fn parse_decimal(text: &str) -> Result<Decimal, TypeError> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|_| TypeError::InvalidNumber(text.to_string()))
}

/// Convert a JSON number into a Decimal. Anything else is rejected.
pub fn decimal_from_json(value: &Value) -> Result<Decimal, TypeError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Decimal::from(i))
            } else {
                parse_decimal(&n.to_string())
            }
        }
        other => Err(TypeError::InvalidNumber(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_price_ordering() {
        let low = Price::from_str("100.5").unwrap();
        let high = Price::from_u64(101);
        assert!(low < high);
        assert_eq!(Price::from_str("101.00").unwrap(), high);
    }

    #[test]
    fn test_parse_decimal_scientific() {
        let d = parse_decimal("1e-7").unwrap();
        assert_eq!(d, Decimal::from_str("0.0000001").unwrap());
        assert!(parse_decimal("abc").is_err());
    }

    #[test]
    fn test_decimal_from_json() {
        assert_eq!(decimal_from_json(&json!(42)).unwrap(), Decimal::from(42));
        assert_eq!(decimal_from_json(&json!(-3)).unwrap(), Decimal::from(-3));
        assert_eq!(
            decimal_from_json(&json!(0.1)).unwrap(),
            Decimal::from_str("0.1").unwrap()
        );
        assert!(decimal_from_json(&json!("0.1")).is_err());
        assert!(decimal_from_json(&json!(null)).is_err());
    }

    #[test]
    fn test_side_classification() {
        assert_eq!(Side::of(Decimal::from(5)), Some(Side::Bid));
        assert_eq!(Side::of(Decimal::from(-5)), Some(Side::Ask));
        assert_eq!(Side::of(Decimal::ZERO), None);
    }
}
