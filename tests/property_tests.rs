use fulfillment_api::models::{
    card_number::{luhn_valid, mask},
    CardNumber, Money, OrderStatus,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use strum::IntoEnumIterator;

fn money() -> impl Strategy<Value = Money> {
    (0i64..10_000_000).prop_map(|cents| Money::new(Decimal::new(cents, 2)).unwrap())
}

/// Appends the digit that makes `body` pass the Luhn check.
fn with_check_digit(body: &str) -> String {
    (0..10)
        .map(|d| format!("{body}{d}"))
        .find(|candidate| luhn_valid(candidate))
        .unwrap()
}

proptest! {
    #[test]
    fn subtract_undoes_add(a in money(), b in money()) {
        prop_assert_eq!(a.add(b).unwrap().subtract(b).unwrap(), a);
    }

    #[test]
    fn subtracting_more_than_held_fails(a in money(), extra in 1i64..100_000) {
        let larger = a.add(Money::new(Decimal::new(extra, 2)).unwrap()).unwrap();
        prop_assert!(a.subtract(larger).is_err());
    }

    #[test]
    fn amounts_always_carry_two_decimals(units in 0i64..1_000_000, scale in 0u32..6) {
        let money = Money::new(Decimal::new(units, scale)).unwrap();
        prop_assert_eq!(money.amount().scale(), 2);
    }

    #[test]
    fn multiply_matches_repeated_add(a in money(), qty in 0u32..50) {
        let repeated = Money::try_sum((0..qty).map(|_| a)).unwrap();
        prop_assert_eq!(a.multiply(qty).unwrap(), repeated);
    }

    #[test]
    fn check_digit_makes_numbers_valid(body in "[0-9]{12,18}") {
        let number = with_check_digit(&body);
        prop_assert!(luhn_valid(&number));
        prop_assert!(CardNumber::parse(&number).unwrap().is_luhn_valid());
    }

    #[test]
    fn changing_one_digit_breaks_luhn(body in "[0-9]{12,18}", pos in any::<prop::sample::Index>(), bump in 1u32..10) {
        let number = with_check_digit(&body);
        let i = pos.index(number.len());
        let mut digits: Vec<u32> = number.chars().map(|c| c.to_digit(10).unwrap()).collect();
        digits[i] = (digits[i] + bump) % 10;
        let altered: String = digits.iter().map(|d| char::from_digit(*d, 10).unwrap()).collect();
        prop_assert!(!luhn_valid(&altered));
    }

    #[test]
    fn masking_keeps_length_and_last_four(digits in "[0-9]{13,19}") {
        let masked = mask(&digits);
        prop_assert_eq!(masked.len(), digits.len());
        prop_assert_eq!(&masked[masked.len() - 4..], &digits[digits.len() - 4..]);
        prop_assert!(masked[..masked.len() - 4].chars().all(|c| c == '*'));
    }
}

#[test]
fn terminal_statuses_have_no_outgoing_edges() {
    for from in OrderStatus::iter().filter(|s| s.is_terminal()) {
        for to in OrderStatus::iter() {
            assert!(!from.can_transition_to(to), "{from} -> {to}");
        }
    }
}

#[test]
fn only_unpaid_orders_are_cancellable() {
    let cancellable: Vec<_> = OrderStatus::iter().filter(|s| s.is_cancellable()).collect();
    assert_eq!(
        cancellable,
        vec![OrderStatus::Pending, OrderStatus::PaymentFailed]
    );
}
