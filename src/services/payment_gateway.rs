use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::Order;
use crate::services::simulated_failure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReceipt {
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct GatewayDecline {
    pub reason: String,
}

/// One charge attempt against the card processor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(
        &self,
        order: &Order,
        token: &str,
        attempt: u32,
    ) -> Result<GatewayReceipt, GatewayDecline>;
}

/// Declines a configurable share of attempts at random, each independently.
#[derive(Debug, Clone)]
pub struct SimulatedPaymentGateway {
    rejection_percent: u32,
}

impl SimulatedPaymentGateway {
    pub fn new(rejection_percent: u32) -> Self {
        Self { rejection_percent }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn charge(
        &self,
        order: &Order,
        _token: &str,
        attempt: u32,
    ) -> Result<GatewayReceipt, GatewayDecline> {
        if simulated_failure(self.rejection_percent) {
            debug!(order_id = %order.id, attempt, "simulated decline");
            return Err(GatewayDecline {
                reason: "payment declined by issuer".to_string(),
            });
        }
        Ok(GatewayReceipt {
            transaction_id: format!("txn_{}", Uuid::new_v4().simple()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_rejection_always_approves() {
        let gateway = SimulatedPaymentGateway::new(0);
        let order = Order::new(Uuid::new_v4(), None);
        for attempt in 1..=20 {
            let receipt = gateway.charge(&order, "tok_x", attempt).await.unwrap();
            assert!(receipt.transaction_id.starts_with("txn_"));
        }
    }

    #[tokio::test]
    async fn full_rejection_always_declines() {
        let gateway = SimulatedPaymentGateway::new(100);
        let order = Order::new(Uuid::new_v4(), None);
        assert!(gateway.charge(&order, "tok_x", 1).await.is_err());
    }
}
