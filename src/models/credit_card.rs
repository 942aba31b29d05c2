//! Card data as it arrives for tokenization, and the stored view.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use super::card_number::{CardBrand, CardNumber};
use crate::errors::ServiceError;

/// Raw card details submitted by a customer. Lives for one request only.
#[derive(Clone, Deserialize, Validate)]
pub struct CardData {
    pub customer_id: Uuid,
    #[validate(length(min = 13, max = 32))]
    pub card_number: String,
    #[validate(length(min = 3, max = 4))]
    pub cvv: String,
    /// MM/YY
    #[validate(length(equal = 5))]
    pub expiration_date: String,
    #[validate(length(min = 1, max = 255))]
    pub cardholder_name: String,
}

impl fmt::Debug for CardData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardData")
            .field("customer_id", &self.customer_id)
            .field("card_number", &super::card_number::mask(&self.card_number))
            .field("cvv", &"***")
            .field("expiration_date", &self.expiration_date)
            .field("cardholder_name", &self.cardholder_name)
            .finish()
    }
}

impl CardData {
    /// Field checks that do not involve the issuer. Returns the parsed number.
    pub fn check(&self) -> Result<CardNumber, ServiceError> {
        self.validate()?;
        let number = CardNumber::parse(&self.card_number)?;
        if !self.cvv.chars().all(|c| c.is_ascii_digit()) {
            return Err(ServiceError::ValidationError(
                "cvv must contain only digits".to_string(),
            ));
        }
        parse_expiration(&self.expiration_date)?;
        Ok(number)
    }
}

/// Parses `MM/YY` into (month, four-digit year).
pub fn parse_expiration(raw: &str) -> Result<(u32, i32), ServiceError> {
    let invalid = || ServiceError::ValidationError(format!("expiration date {:?} is not MM/YY", raw));
    let (month, year) = raw.split_once('/').ok_or_else(invalid)?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    if !(1..=12).contains(&month) || !(0..=99).contains(&year) {
        return Err(invalid());
    }
    Ok((month, 2000 + year))
}

/// Whether a card expiring `MM/YY` is past its last valid month at `now`.
pub fn is_expired(raw: &str, now: DateTime<Utc>) -> Result<bool, ServiceError> {
    let (month, year) = parse_expiration(raw)?;
    Ok((year, month) < (now.year(), now.month()))
}

/// Stored card as exposed to the rest of the system. The token is decrypted.
#[derive(Clone, Serialize)]
pub struct CreditCard {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub masked_number: String,
    pub last_four: String,
    pub bin: String,
    pub brand: CardBrand,
    pub expiration_date: String,
    pub cardholder_name: String,
    #[serde(skip)]
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for CreditCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreditCard")
            .field("id", &self.id)
            .field("customer_id", &self.customer_id)
            .field("masked_number", &self.masked_number)
            .field("brand", &self.brand)
            .finish_non_exhaustive()
    }
}
