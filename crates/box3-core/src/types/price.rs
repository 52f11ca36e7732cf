//! [`Price`] is the amount carried in a payment challenge.
//!
//! The configured text is kept verbatim: `"$0.01"` is echoed as `"$0.01"`, never
//! reformatted as `"0.010000"` or `"10000"`. Conversion into minor units is
//! explicit and only happens where arithmetic is needed.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Errors converting a [`Price`] into minor units.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    #[error("Price is empty")]
    Empty,
    #[error("Price '{0}' is not a decimal number")]
    NotDecimal(String),
    #[error("Price '{price}' has more than {decimals} fractional digits")]
    TooPrecise { price: String, decimals: u8 },
    #[error("Price '{0}' overflows")]
    Overflow(String),
}

/// A decimal amount as configured, e.g. `"0.01"` or `"$0.01"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Price(String);

impl Price {
    pub fn new(value: impl Into<String>) -> Self {
        Price(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Convert to the asset's smallest unit, e.g. `"$0.01"` with 6 decimals is `10000`.
    ///
    /// ```
    /// use box3_core::types::Price;
    ///
    /// assert_eq!(Price::new("$0.01").to_minor_units(6), Ok(10_000));
    /// assert_eq!(Price::new("2").to_minor_units(6), Ok(2_000_000));
    /// assert!(Price::new("0.0000001").to_minor_units(6).is_err());
    /// ```
    pub fn to_minor_units(&self, decimals: u8) -> Result<u128, PriceError> {
        let raw = self.0.trim();
        let digits = raw.strip_prefix('$').unwrap_or(raw);
        if digits.is_empty() {
            return Err(PriceError::Empty);
        }

        let (whole, fraction) = match digits.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (digits, ""),
        };

        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction)
        {
            return Err(PriceError::NotDecimal(self.0.clone()));
        }

        if fraction.len() > decimals as usize {
            return Err(PriceError::TooPrecise {
                price: self.0.clone(),
                decimals,
            });
        }

        let overflow = || PriceError::Overflow(self.0.clone());
        let scale = 10u128.checked_pow(decimals as u32).ok_or_else(overflow)?;

        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<u128>().map_err(|_| overflow())?
        };

        let fraction_units = if fraction.is_empty() {
            0
        } else {
            let padding = 10u128
                .checked_pow((decimals as usize - fraction.len()) as u32)
                .ok_or_else(overflow)?;
            fraction
                .parse::<u128>()
                .map_err(|_| overflow())?
                .checked_mul(padding)
                .ok_or_else(overflow)?
        };

        whole_units
            .checked_mul(scale)
            .and_then(|w| w.checked_add(fraction_units))
            .ok_or_else(overflow)
    }
}

impl From<&str> for Price {
    fn from(value: &str) -> Self {
        Price(value.to_string())
    }
}

impl From<String> for Price {
    fn from(value: String) -> Self {
        Price(value)
    }
}

impl Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Price {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Price(s))
    }
}
