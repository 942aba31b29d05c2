use rand::Rng;

pub mod audit;
pub mod carts;
pub mod catalog;
pub mod checkout;
pub mod customers;
pub mod notifications;
pub mod orders;
pub mod payment_gateway;
pub mod payment_retry;
pub mod stock_ledger;
pub mod tokenization;

/// Rolls a simulated failure with the given percentage chance.
pub(crate) fn simulated_failure(percent: u32) -> bool {
    match percent {
        0 => false,
        p if p >= 100 => true,
        p => rand::thread_rng().gen_range(0..100) < p,
    }
}

#[cfg(test)]
mod tests {
    use super::simulated_failure;

    #[test]
    fn bounds_are_deterministic() {
        assert!((0..1000).all(|_| !simulated_failure(0)));
        assert!((0..1000).all(|_| simulated_failure(100)));
    }
}
