use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::Cart;
use crate::repositories::{CartRepository, CustomerRepository, ProductRepository, Repository};

#[derive(Clone)]
pub struct CartService {
    carts: Arc<CartRepository>,
    products: Arc<ProductRepository>,
    customers: Arc<CustomerRepository>,
}

impl CartService {
    pub fn new(
        carts: Arc<CartRepository>,
        products: Arc<ProductRepository>,
        customers: Arc<CustomerRepository>,
    ) -> Self {
        Self {
            carts,
            products,
            customers,
        }
    }

    /// Adds to the cart without touching stock; stock is only taken when the
    /// cart is checked out.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<Cart, ServiceError> {
        let quantity = i32::try_from(quantity)
            .ok()
            .filter(|q| *q > 0)
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "quantity must be between 1 and {}, got {}",
                    i32::MAX,
                    quantity
                ))
            })?;
        if self.customers.find_by_id(customer_id).await?.is_none() {
            return Err(ServiceError::not_found("Customer", customer_id));
        }
        if !self.products.exists(product_id).await? {
            return Err(ServiceError::not_found("Product", product_id));
        }

        let cart = self.carts.add_line(customer_id, product_id, quantity).await?;
        info!(cart_id = %cart.id, lines = cart.lines.len(), "cart updated");
        Ok(cart)
    }

    /// The customer's cart; customers without one get an empty cart.
    pub async fn get_cart(&self, customer_id: Uuid) -> Result<Cart, ServiceError> {
        Ok(self
            .carts
            .find_by_customer(customer_id)
            .await?
            .unwrap_or_else(|| Cart {
                id: Uuid::nil(),
                customer_id,
                lines: Vec::new(),
            }))
    }

    pub async fn clear(&self, customer_id: Uuid) -> Result<u64, ServiceError> {
        CartRepository::clear_on(self.carts.get_db(), customer_id).await
    }
}
