//! Dollar amounts
//!
//! Money is stored as `numeric(20,2)` and kept as a `Decimal` everywhere
//! inside the crate. It only becomes a float when serialized for a client.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Largest magnitude a `numeric(20,2)` column can hold
const MAX_INTEGER_DIGITS: u32 = 18;

/// Stored scale of every money column
const MAX_SCALE: u32 = 2;

/// A fixed-point dollar value as stored in the database.
///
/// Serializes as a JSON number; see [`to_f64`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, sqlx::Type)]
#[sqlx(transparent)]
pub struct Dollars(Decimal);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("Amount has too many decimal places (max {MAX_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds the storable range")]
    Overflow,

    #[error("Amount must not be zero")]
    Zero,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl Dollars {
    pub const ZERO: Dollars = Dollars(Decimal::ZERO);

    /// Wrap a decimal, checking it fits the storage column.
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value.scale() > MAX_SCALE {
            return Err(MoneyError::TooManyDecimals(value.scale()));
        }

        let limit = Decimal::from(10_i64.pow(MAX_INTEGER_DIGITS));
        if value.abs() >= limit {
            return Err(MoneyError::Overflow);
        }

        Ok(Self(value))
    }

    /// A non-zero change to a balance (credits positive, debits negative)
    pub fn adjustment(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_zero() {
            return Err(MoneyError::Zero);
        }
        Self::new(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn to_f64(&self) -> f64 {
        to_f64(&self.0)
    }

    pub fn checked_add(&self, other: Dollars) -> Result<Dollars, MoneyError> {
        let sum = self.0.checked_add(other.0).ok_or(MoneyError::Overflow)?;
        Dollars::new(sum)
    }
}

/// Convert a stored decimal to the number clients see.
///
/// The result is the decimal's canonical string parsed as an `f64`, so a
/// client reading the number gets exactly what parsing the column would give.
pub fn to_f64(value: &Decimal) -> f64 {
    value
        .to_string()
        .parse::<f64>()
        .unwrap_or_else(|_| value.to_f64().unwrap_or_default())
}

impl FromStr for Dollars {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|e| MoneyError::ParseError(e.to_string()))?;
        Self::new(value)
    }
}

impl fmt::Display for Dollars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Dollars {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}
