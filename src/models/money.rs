//! Exact monetary amounts.
//!
//! Every amount that flows through checkout (unit prices, line subtotals, order
//! totals) is a [`Money`]. Values are non-negative and always carried at a scale of
//! two decimal places, rounded half-up on construction.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::errors::ServiceError;

/// Number of decimal places carried by every amount.
pub const MONEY_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(Decimal);

impl Money {
    /// Zero amount.
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Builds an amount from a decimal, rejecting negatives and normalising to
    /// two decimal places (half-up).
    pub fn new(amount: Decimal) -> Result<Self, ServiceError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ServiceError::InvalidAmount(format!(
                "amount must not be negative: {}",
                amount
            )));
        }
        normalize(amount).map(Self).ok_or_else(|| {
            ServiceError::InvalidAmount(format!("amount too large: {}", amount))
        })
    }

    /// Like [`Money::new`], but treats a missing amount as invalid input.
    pub fn from_optional(amount: Option<Decimal>) -> Result<Self, ServiceError> {
        match amount {
            Some(value) => Self::new(value),
            None => Err(ServiceError::InvalidAmount(
                "amount is required".to_string(),
            )),
        }
    }

    /// Parses a decimal string such as `"19.99"`.
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        let value: Decimal = raw.trim().parse().map_err(|_| {
            ServiceError::InvalidAmount(format!("not a decimal amount: {:?}", raw))
        })?;
        Self::new(value)
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Fails with `InvalidAmount` when the sum cannot be held at two places.
    pub fn add(&self, other: Money) -> Result<Money, ServiceError> {
        self.0
            .checked_add(other.0)
            .and_then(normalize)
            .map(Money)
            .ok_or_else(|| overflow("adding", self, &other))
    }

    /// Fails with `InvalidAmount` when the result would drop below zero.
    pub fn subtract(&self, other: Money) -> Result<Money, ServiceError> {
        let result = self.0 - other.0;
        if result.is_sign_negative() && !result.is_zero() {
            return Err(ServiceError::InvalidAmount(format!(
                "subtracting {} from {} would produce a negative amount",
                other, self
            )));
        }
        normalize(result)
            .map(Money)
            .ok_or_else(|| overflow("subtracting", self, &other))
    }

    /// Multiplies by a whole quantity, e.g. a line item's unit count.
    pub fn multiply(&self, quantity: u32) -> Result<Money, ServiceError> {
        self.0
            .checked_mul(Decimal::from(quantity))
            .and_then(normalize)
            .map(Money)
            .ok_or_else(|| overflow("multiplying", self, &quantity))
    }

    /// Multiplies by a non-negative decimal factor.
    pub fn multiply_decimal(&self, factor: Decimal) -> Result<Money, ServiceError> {
        if factor.is_sign_negative() && !factor.is_zero() {
            return Err(ServiceError::InvalidAmount(format!(
                "multiplication factor must not be negative: {}",
                factor
            )));
        }
        self.0
            .checked_mul(factor)
            .and_then(normalize)
            .map(Money)
            .ok_or_else(|| overflow("multiplying", self, &factor))
    }

    /// Adds up `amounts`, failing on the first overflow.
    pub fn try_sum<I>(amounts: I) -> Result<Money, ServiceError>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, amount| acc.add(amount))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_greater_than(&self, other: &Money) -> bool {
        self.0 > other.0
    }

    pub fn is_less_than(&self, other: &Money) -> bool {
        self.0 < other.0
    }
}

fn overflow(op: &str, lhs: &Money, rhs: &dyn fmt::Display) -> ServiceError {
    ServiceError::InvalidAmount(format!("{} {} and {} overflows", op, lhs, rhs))
}

/// Rounds to two places, or `None` when the value is too large to carry them.
fn normalize(amount: Decimal) -> Option<Decimal> {
    let mut rounded =
        amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    if rounded.scale() != MONEY_SCALE {
        return None;
    }
    // -0.00 can come out of rounding tiny negatives; keep the sign canonical
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    Some(rounded)
}

impl TryFrom<Decimal> for Money {
    type Error = ServiceError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Money::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = <Decimal as Deserialize>::deserialize(deserializer)?;
        Money::new(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(dec!(10.999), dec!(11.00))]
    #[case(dec!(10.995), dec!(11.00))]
    #[case(dec!(10.994), dec!(10.99))]
    #[case(dec!(0.005), dec!(0.01))]
    #[case(dec!(7), dec!(7.00))]
    fn rounds_half_up_to_two_places(#[case] input: Decimal, #[case] expected: Decimal) {
        let money = Money::new(input).unwrap();
        assert_eq!(money.amount(), expected);
        assert_eq!(money.amount().scale(), MONEY_SCALE);
    }

    #[test]
    fn rejects_negative_amounts() {
        assert_matches!(Money::new(dec!(-0.01)), Err(ServiceError::InvalidAmount(_)));
        assert_matches!(Money::from_optional(None), Err(ServiceError::InvalidAmount(_)));
    }

    #[test]
    fn subtract_below_zero_fails() {
        let a = Money::new(dec!(5.00)).unwrap();
        let b = Money::new(dec!(5.01)).unwrap();
        assert_matches!(a.subtract(b), Err(ServiceError::InvalidAmount(_)));
        assert!(b.subtract(a).unwrap().amount() == dec!(0.01));
    }

    #[test]
    fn multiply_by_quantity_and_factor() {
        let unit = Money::new(dec!(19.99)).unwrap();
        assert_eq!(unit.multiply(3).unwrap().amount(), dec!(59.97));
        assert_eq!(
            unit.multiply_decimal(dec!(0.5)).unwrap().amount(),
            dec!(10.00)
        );
        assert!(unit.multiply_decimal(dec!(-1)).is_err());
    }

    #[test]
    fn comparisons() {
        let small = Money::new(dec!(1)).unwrap();
        let large = Money::new(dec!(2)).unwrap();
        assert!(large.is_greater_than(&small));
        assert!(small.is_less_than(&large));
        assert!(Money::ZERO.is_zero());
    }

    #[test]
    fn sums_through_add() {
        let total = Money::try_sum(
            [dec!(1.10), dec!(2.20), dec!(3.30)]
                .into_iter()
                .map(|d| Money::new(d).unwrap()),
        )
        .unwrap();
        assert_eq!(total.amount(), dec!(6.60));
    }

    #[test]
    fn overflow_is_an_invalid_amount() {
        assert_matches!(
            Money::parse("40000000000000000000000000000"),
            Err(ServiceError::InvalidAmount(_))
        );
        let huge = Money::parse("700000000000000000000000000").unwrap();
        assert_matches!(huge.add(huge), Err(ServiceError::InvalidAmount(_)));
        assert_matches!(huge.multiply(3), Err(ServiceError::InvalidAmount(_)));
        assert_matches!(
            huge.multiply_decimal(Decimal::MAX),
            Err(ServiceError::InvalidAmount(_))
        );
        assert_matches!(
            Money::try_sum([huge, Money::new(dec!(1)).unwrap()]),
            Err(ServiceError::InvalidAmount(_))
        );
    }

    #[test]
    fn serde_uses_string_form_and_validates() {
        let money = Money::parse("12.5").unwrap();
        assert_eq!(serde_json::to_string(&money).unwrap(), "\"12.50\"");
        let back: Money = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(back, money);
        assert!(serde_json::from_str::<Money>("\"-1\"").is_err());
    }
}
