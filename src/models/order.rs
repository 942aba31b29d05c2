//! Order aggregate and its status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use super::money::Money;
use crate::errors::ServiceError;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    PaymentProcessing,
    PaymentConfirmed,
    PaymentFailed,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Allowed edges of the lifecycle:
    ///
    /// ```text
    /// PENDING -> PAYMENT_PROCESSING -> PAYMENT_CONFIRMED -> COMPLETED
    ///                              \-> PAYMENT_FAILED
    /// PENDING | PAYMENT_FAILED -> CANCELLED
    /// ```
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, PaymentProcessing)
                | (PaymentProcessing, PaymentConfirmed)
                | (PaymentProcessing, PaymentFailed)
                | (PaymentConfirmed, Completed)
                | (Pending, Cancelled)
                | (PaymentFailed, Cancelled)
        )
    }

    pub fn is_cancellable(self) -> bool {
        self.can_transition_to(OrderStatus::Cancelled)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Parses the stored column value.
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        OrderStatus::from_str(raw)
            .map_err(|_| ServiceError::Unexpected(format!("unknown order status {:?}", raw)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: u32,
    /// Price at the time the order was placed
    pub unit_price: Money,
}

impl OrderItem {
    pub fn subtotal(&self) -> Result<Money, ServiceError> {
        self.unit_price.multiply(self.quantity)
    }
}

/// An order and its lines. The total is always derived from the lines and
/// the status only moves along [`OrderStatus::can_transition_to`].
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    status: OrderStatus,
    items: Vec<OrderItem>,
    total_amount: Money,
    /// Plaintext in memory only; repositories encrypt it on the way to storage
    #[serde(skip)]
    pub payment_token: Option<String>,
    pub transaction_id: Option<String>,
    pub delivery_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(customer_id: Uuid, delivery_address: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            customer_id,
            status: OrderStatus::Pending,
            items: Vec::new(),
            total_amount: Money::ZERO,
            payment_token: None,
            transaction_id: None,
            delivery_address,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds a persisted order. The total is recomputed from `items`.
    pub fn restore(
        id: Uuid,
        customer_id: Uuid,
        status: OrderStatus,
        items: Vec<OrderItem>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, ServiceError> {
        let mut order = Self {
            id,
            customer_id,
            status,
            items,
            total_amount: Money::ZERO,
            payment_token: None,
            transaction_id: None,
            delivery_address: None,
            created_at,
            updated_at,
        };
        order.recompute_total()?;
        Ok(order)
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// Appends a line. Only allowed before payment starts.
    pub fn add_item(
        &mut self,
        product_id: Uuid,
        quantity: u32,
        unit_price: Money,
    ) -> Result<&OrderItem, ServiceError> {
        self.ensure_editable()?;
        if quantity == 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity for product {} must be greater than zero",
                product_id
            )));
        }
        self.items.push(OrderItem {
            id: Uuid::new_v4(),
            product_id,
            quantity,
            unit_price,
        });
        if let Err(err) = self.recompute_total() {
            self.items.pop();
            return Err(err);
        }
        Ok(&self.items[self.items.len() - 1])
    }

    pub fn remove_item(&mut self, item_id: Uuid) -> Result<OrderItem, ServiceError> {
        self.ensure_editable()?;
        let index = self
            .items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or_else(|| ServiceError::not_found("OrderItem", item_id))?;
        let removed = self.items.remove(index);
        self.recompute_total()?;
        Ok(removed)
    }

    /// Moves to `next`, returning the previous status.
    pub fn transition_to(&mut self, next: OrderStatus) -> Result<OrderStatus, ServiceError> {
        let previous = self.status;
        if !previous.can_transition_to(next) {
            return Err(ServiceError::InvalidStateTransition {
                order_id: self.id,
                from: previous.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(previous)
    }

    fn ensure_editable(&self) -> Result<(), ServiceError> {
        if self.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidStateTransition {
                order_id: self.id,
                from: self.status.to_string(),
                to: "item change".to_string(),
            });
        }
        Ok(())
    }

    fn recompute_total(&mut self) -> Result<(), ServiceError> {
        let subtotals = self
            .items
            .iter()
            .map(OrderItem::subtotal)
            .collect::<Result<Vec<_>, _>>()?;
        self.total_amount = Money::try_sum(subtotals)?;
        Ok(())
    }
}
