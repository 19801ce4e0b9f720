//! Money and currency value objects.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Number of minor-unit digits assumed for every currency.
pub const MINOR_DIGITS: u32 = 2;

/// Money amount held in minor units (e.g. 278 = 2.78).
///
/// The currency travels separately; a `Money` on its own is just a
/// fixed-point quantity. Every currency is treated as having two minor
/// digits, adapters convert at the wire where a provider disagrees.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money {
    minor: i64,
}

impl Money {
    /// Creates a new amount from minor units.
    pub const fn from_minor(minor: i64) -> Self {
        Self { minor }
    }

    /// Creates a new amount from whole major units.
    pub const fn from_major(major: i64) -> Self {
        Self { minor: major * 100 }
    }

    /// Parses a decimal string such as `"2.78"`, rounding half away from zero.
    pub fn from_major_str(s: &str) -> Result<Self, ValidationError> {
        let value = Decimal::from_str(s.trim())
            .map_err(|_| ValidationError::InvalidAmount(s.to_string()))?;
        Self::from_decimal(value)
    }

    /// Converts a decimal major-unit value, rounding half away from zero.
    pub fn from_decimal(value: Decimal) -> Result<Self, ValidationError> {
        let rounded = value.round_dp_with_strategy(MINOR_DIGITS, RoundingStrategy::MidpointAwayFromZero);
        rounded
            .checked_mul(Decimal::from(100))
            .and_then(|scaled| i64::try_from(scaled).ok())
            .map(Self::from_minor)
            .ok_or_else(|| ValidationError::InvalidAmount(value.to_string()))
    }

    pub const fn zero() -> Self {
        Self { minor: 0 }
    }

    /// Returns the amount in minor units.
    pub const fn minor(&self) -> i64 {
        self.minor
    }

    /// Returns the amount as a decimal in major units.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.minor, MINOR_DIGITS)
    }

    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    /// Adds two amounts, returning `None` on overflow.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.minor.checked_add(other.minor).map(Money::from_minor)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.minor < 0 { "-" } else { "" };
        let abs = self.minor.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// ISO 4217 currency code, always three upper-case ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim();
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(ValidationError::InvalidCurrency(code.to_string()))
        }
    }

    /// Brazilian real, the settlement currency of the default registry.
    pub fn brl() -> Self {
        Self("BRL".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}
