//! Card number value type.
//!
//! A `CardNumber` only exists in memory for the duration of a tokenization
//! request. What gets persisted is the masked form plus last-4 and BIN; once a
//! number has been masked there is no way back to the original digits.

use serde::Serialize;
use std::fmt;

use crate::errors::ServiceError;

const MIN_DIGITS: usize = 13;
const MAX_DIGITS: usize = 19;
const VISIBLE_SUFFIX: usize = 4;
const BIN_LENGTH: usize = 6;

#[derive(Clone, PartialEq, Eq)]
pub struct CardNumber {
    digits: String,
}

impl CardNumber {
    /// Strips every non-digit character, then requires 13 to 19 digits.
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() < MIN_DIGITS || digits.len() > MAX_DIGITS {
            return Err(ServiceError::InvalidCardNumber(format!(
                "card number must contain {}-{} digits, got {}",
                MIN_DIGITS,
                MAX_DIGITS,
                digits.len()
            )));
        }
        Ok(Self { digits })
    }

    pub fn masked(&self) -> String {
        mask(&self.digits)
    }

    pub fn last_four(&self) -> &str {
        &self.digits[self.digits.len() - VISIBLE_SUFFIX..]
    }

    /// Issuer identification prefix (first six digits).
    pub fn bin(&self) -> &str {
        &self.digits[..BIN_LENGTH]
    }

    pub fn is_luhn_valid(&self) -> bool {
        luhn_valid(&self.digits)
    }

    pub fn brand(&self) -> CardBrand {
        CardBrand::detect(&self.digits)
    }

    pub fn len(&self) -> usize {
        self.digits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }
}

// Never print the raw digits, not even in debug output.
impl fmt::Debug for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CardNumber").field(&self.masked()).finish()
    }
}

impl fmt::Display for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Replaces everything except the last four characters with `*`.
/// Inputs shorter than four characters are masked entirely.
pub fn mask(value: &str) -> String {
    let len = value.chars().count();
    if len < VISIBLE_SUFFIX {
        return "*".repeat(len);
    }
    value
        .chars()
        .enumerate()
        .map(|(i, c)| if i < len - VISIBLE_SUFFIX { '*' } else { c })
        .collect()
}

/// Luhn checksum over a digit string. Non-digit input is never valid.
pub fn luhn_valid(digits: &str) -> bool {
    if digits.is_empty() {
        return false;
    }
    let mut sum = 0u32;
    for (i, c) in digits.chars().rev().enumerate() {
        let Some(mut d) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CardBrand {
    Visa,
    Mastercard,
    Amex,
    Discover,
    Unknown,
}

impl CardBrand {
    fn detect(digits: &str) -> Self {
        let prefix2: u32 = digits.get(..2).and_then(|p| p.parse().ok()).unwrap_or(0);
        let prefix4: u32 = digits.get(..4).and_then(|p| p.parse().ok()).unwrap_or(0);
        match (digits.chars().next(), prefix2, prefix4) {
            (Some('4'), _, _) => CardBrand::Visa,
            (_, 51..=55, _) | (_, _, 2221..=2720) => CardBrand::Mastercard,
            (_, 34 | 37, _) => CardBrand::Amex,
            (_, 65, _) | (_, _, 6011) => CardBrand::Discover,
            _ => CardBrand::Unknown,
        }
    }
}
