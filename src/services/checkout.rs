use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::Order;
use crate::repositories::CartRepository;
use crate::services::orders::{CreateOrder, OrderLine, OrderService, PaymentMethod};
use crate::services::payment_retry::PaymentResult;
use crate::tracing::TraceContext;

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub customer_id: Uuid,
    pub delivery_address: Option<String>,
    pub payment: PaymentMethod,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub order: Order,
    pub payment: PaymentResult,
}

/// Turns a customer's cart into a paid order.
#[derive(Clone)]
pub struct CheckoutService {
    carts: Arc<CartRepository>,
    orders: OrderService,
}

impl CheckoutService {
    pub fn new(carts: Arc<CartRepository>, orders: OrderService) -> Self {
        Self { carts, orders }
    }

    /// Creates the order from the cart (clearing it), then charges it. A
    /// failed payment leaves the order in PAYMENT_FAILED and returns
    /// `PaymentFailed`; the cart stays cleared.
    #[instrument(skip(self, ctx, request), fields(trace_id = %ctx.trace_id, customer_id = %request.customer_id))]
    pub async fn checkout(
        &self,
        ctx: &TraceContext,
        request: CheckoutRequest,
    ) -> Result<CheckoutReceipt, ServiceError> {
        let cart = self
            .carts
            .find_by_customer(request.customer_id)
            .await?
            .filter(|cart| !cart.is_empty())
            .ok_or(ServiceError::EmptyCart(request.customer_id))?;

        let items = cart
            .lines
            .iter()
            .map(|line| OrderLine {
                product_id: line.product_id,
                quantity: line.quantity,
            })
            .collect();

        let order = self
            .orders
            .place_order(
                ctx,
                CreateOrder {
                    customer_id: request.customer_id,
                    items,
                    delivery_address: request.delivery_address,
                },
                true,
            )
            .await?;
        info!(order_id = %order.id, "checkout order placed");

        let receipt = self
            .orders
            .process_payment(ctx, order.id, request.payment)
            .await?;
        Ok(CheckoutReceipt {
            order: receipt.order,
            payment: receipt.payment,
        })
    }
}
