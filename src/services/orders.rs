//! Order lifecycle: creation with stock reservation, payment, cancellation.
//!
//! Every status change is a conditional update on the status the service last
//! saw, so a cancel racing a payment on the same order can only apply once.
//! Audit records for work done inside a transaction are written after it
//! commits or rolls back.

use metrics::counter;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{AuditEventType, CardData, NewAuditEvent, Order, OrderStatus};
use crate::repositories::{CartRepository, CustomerRepository, OrderRepository, ProductRepository};
use crate::services::audit::AuditService;
use crate::services::notifications::{NotificationDispatcher, PaymentNotice, Recipient};
use crate::services::payment_retry::{PaymentResult, PaymentRetryPolicy};
use crate::services::stock_ledger::{Reservation, StockLedger};
use crate::services::tokenization::TokenizationService;
use crate::tracing::TraceContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: u32,
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub customer_id: Uuid,
    pub items: Vec<OrderLine>,
    pub delivery_address: Option<String>,
}

/// How an order is to be paid.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Raw card details, tokenized as part of the payment
    NewCard(CardData),
    /// A card the customer tokenized earlier
    StoredCard { card_id: Uuid },
    /// A token issued by the tokenization service
    Token { token: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub order: Order,
    pub payment: PaymentResult,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderRepository>,
    customers: Arc<CustomerRepository>,
    ledger: StockLedger,
    tokenization: TokenizationService,
    payments: PaymentRetryPolicy,
    notifications: NotificationDispatcher,
    audit: AuditService,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: Arc<OrderRepository>,
        customers: Arc<CustomerRepository>,
        ledger: StockLedger,
        tokenization: TokenizationService,
        payments: PaymentRetryPolicy,
        notifications: NotificationDispatcher,
        audit: AuditService,
    ) -> Self {
        Self {
            db,
            orders,
            customers,
            ledger,
            tokenization,
            payments,
            notifications,
            audit,
        }
    }

    /// Creates a PENDING order and reserves stock for every line in one
    /// transaction. The first line that cannot be satisfied aborts the whole
    /// order and nothing is reserved. With `clear_cart` the customer's cart is
    /// emptied in the same transaction.
    #[instrument(skip(self, ctx, request), fields(trace_id = %ctx.trace_id, customer_id = %request.customer_id))]
    pub async fn place_order(
        &self,
        ctx: &TraceContext,
        request: CreateOrder,
        clear_cart: bool,
    ) -> Result<Order, ServiceError> {
        validate_lines(&request.items)?;
        if self.customers.find_by_id(request.customer_id).await?.is_none() {
            return Err(ServiceError::not_found("Customer", request.customer_id));
        }

        let txn = self.db.begin().await?;
        match self.reserve_and_insert(&txn, &request, clear_cart).await {
            Ok((order, reservations)) => {
                txn.commit().await?;
                info!(order_id = %order.id, total = %order.total_amount(), "order created");
                self.emit(
                    ctx,
                    NewAuditEvent::new(AuditEventType::OrderCreated, "Order", order.id).with_data(
                        json!({
                            "customer_id": order.customer_id,
                            "total_amount": order.total_amount(),
                            "items": order.items().len(),
                        }),
                    ),
                )
                .await;
                self.ledger.after_reserved(ctx, &reservations).await;
                Ok(order)
            }
            Err(e) => {
                txn.rollback().await?;
                if let ServiceError::InsufficientStock {
                    product_id,
                    requested,
                    ..
                } = &e
                {
                    self.ledger
                        .reservation_failed(ctx, *product_id, *requested, &e)
                        .await;
                } else {
                    warn!(error = %e, "order creation aborted");
                }
                Err(e)
            }
        }
    }

    async fn reserve_and_insert(
        &self,
        txn: &DatabaseTransaction,
        request: &CreateOrder,
        clear_cart: bool,
    ) -> Result<(Order, Vec<Reservation>), ServiceError> {
        let mut order = Order::new(request.customer_id, request.delivery_address.clone());
        let mut reservations = Vec::with_capacity(request.items.len());

        for line in &request.items {
            let product = ProductRepository::find_by_id_on(txn, line.product_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("Product", line.product_id))?;
            let quantity = i32::try_from(line.quantity).map_err(|_| {
                ServiceError::ValidationError(format!("quantity {} is too large", line.quantity))
            })?;
            reservations.push(StockLedger::reduce_on(txn, product.id, quantity).await?);
            order.add_item(product.id, line.quantity, product.price)?;
        }

        self.orders.insert_on(txn, &order).await?;
        if clear_cart {
            CartRepository::clear_on(txn, request.customer_id).await?;
        }
        Ok((order, reservations))
    }

    pub async fn get_order(&self, id: Uuid) -> Result<Order, ServiceError> {
        self.orders
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", id))
    }

    pub async fn orders_for_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        self.orders.find_by_customer(customer_id).await
    }

    /// Charges a PENDING order. Declines are retried by the retry policy; on
    /// exhaustion the order ends PAYMENT_FAILED with its stock still reserved
    /// and `PaymentFailed` is returned. The customer is notified either way,
    /// off the request path.
    #[instrument(skip(self, ctx, method), fields(trace_id = %ctx.trace_id))]
    pub async fn process_payment(
        &self,
        ctx: &TraceContext,
        order_id: Uuid,
        method: PaymentMethod,
    ) -> Result<PaymentReceipt, ServiceError> {
        let mut order = self.get_order(order_id).await?;
        if !order.status().can_transition_to(OrderStatus::PaymentProcessing) {
            return Err(ServiceError::InvalidStateTransition {
                order_id,
                from: order.status().to_string(),
                to: OrderStatus::PaymentProcessing.to_string(),
            });
        }

        let token = self.resolve_token(ctx, &order, method).await?;

        // Token and status land in one conditional update; a codec failure or a
        // concurrent payment leaves the stored order untouched
        let from = order.status();
        order.transition_to(OrderStatus::PaymentProcessing)?;
        if !self.orders.start_payment_if(order.id, from, &token).await? {
            return Err(self
                .lost_race(order.id, from, OrderStatus::PaymentProcessing)
                .await);
        }
        order.payment_token = Some(token.clone());
        self.status_changed(ctx, order.id, from, OrderStatus::PaymentProcessing)
            .await;
        self.emit(
            ctx,
            NewAuditEvent::new(AuditEventType::PaymentInitiated, "Order", order.id)
                .with_data(json!({ "total_amount": order.total_amount() })),
        )
        .await;

        let result = self.payments.run(ctx, &order, &token).await;

        if let Some(transaction_id) = result.transaction_id.clone().filter(|_| result.success) {
            self.orders.set_transaction_id(order.id, &transaction_id).await?;
            order.transaction_id = Some(transaction_id.clone());
            self.move_status(ctx, &mut order, OrderStatus::PaymentConfirmed)
                .await?;
            self.emit(
                ctx,
                NewAuditEvent::new(AuditEventType::PaymentSucceeded, "Order", order.id).with_data(
                    json!({
                        "transaction_id": transaction_id,
                        "attempts": result.attempts_made,
                    }),
                ),
            )
            .await;
            self.move_status(ctx, &mut order, OrderStatus::Completed)
                .await?;
            counter!("fulfillment_orders.completed", 1);

            self.notify(ctx, &order, PaymentNotice::Succeeded { transaction_id })
                .await;
            return Ok(PaymentReceipt {
                order,
                payment: result,
            });
        }

        self.move_status(ctx, &mut order, OrderStatus::PaymentFailed)
            .await?;
        self.emit(
            ctx,
            NewAuditEvent::new(AuditEventType::PaymentFailed, "Order", order.id)
                .failed(result.message.clone())
                .with_data(json!({ "attempts": result.attempts_made })),
        )
        .await;
        counter!("fulfillment_orders.payment_failed", 1);
        self.notify(
            ctx,
            &order,
            PaymentNotice::Failed {
                attempts: result.attempts_made,
            },
        )
        .await;

        result.into_result(order.id).map(|payment| PaymentReceipt { order, payment })
    }

    /// Cancels a PENDING or PAYMENT_FAILED order and returns its stock in the
    /// same transaction.
    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id))]
    pub async fn cancel_order(&self, ctx: &TraceContext, order_id: Uuid) -> Result<Order, ServiceError> {
        let mut order = self.get_order(order_id).await?;
        let from = order.status();
        if !from.is_cancellable() {
            return Err(ServiceError::InvalidStateTransition {
                order_id,
                from: from.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }

        let txn = self.db.begin().await?;
        let released = match Self::release_all(&txn, &order, from).await {
            Ok(Some(released)) => {
                txn.commit().await?;
                released
            }
            Ok(None) => {
                txn.rollback().await?;
                return Err(self.lost_race(order_id, from, OrderStatus::Cancelled).await);
            }
            Err(e) => {
                txn.rollback().await?;
                return Err(e);
            }
        };
        order.transition_to(OrderStatus::Cancelled)?;

        info!(order_id = %order.id, "order cancelled");
        self.emit(
            ctx,
            NewAuditEvent::new(AuditEventType::OrderStatusChanged, "Order", order.id)
                .with_data(json!({ "from": from, "to": OrderStatus::Cancelled })),
        )
        .await;
        self.emit(
            ctx,
            NewAuditEvent::new(AuditEventType::OrderCancelled, "Order", order.id)
                .with_data(json!({ "previous_status": from })),
        )
        .await;
        for (product_id, quantity) in released {
            self.ledger.after_released(ctx, product_id, quantity).await;
        }
        Ok(order)
    }

    async fn release_all(
        txn: &DatabaseTransaction,
        order: &Order,
        from: OrderStatus,
    ) -> Result<Option<Vec<(Uuid, i32)>>, ServiceError> {
        // None when the order left `from` under us
        if !OrderRepository::update_status_if(txn, order.id, from, OrderStatus::Cancelled).await? {
            return Ok(None);
        }
        let mut released = Vec::with_capacity(order.items().len());
        for item in order.items() {
            let quantity = i32::try_from(item.quantity).map_err(|_| {
                ServiceError::Unexpected(format!("order item {} quantity overflows", item.id))
            })?;
            StockLedger::increase_on(txn, item.product_id, quantity).await?;
            released.push((item.product_id, quantity));
        }
        Ok(Some(released))
    }

    async fn resolve_token(
        &self,
        ctx: &TraceContext,
        order: &Order,
        method: PaymentMethod,
    ) -> Result<String, ServiceError> {
        match method {
            PaymentMethod::NewCard(card) => {
                if card.customer_id != order.customer_id {
                    return Err(ServiceError::ValidationError(
                        "card does not belong to the order's customer".to_string(),
                    ));
                }
                Ok(self.tokenization.tokenize(ctx, card).await?.token)
            }
            PaymentMethod::StoredCard { card_id } => {
                self.tokenization
                    .resolve_stored_token(order.customer_id, card_id)
                    .await
            }
            PaymentMethod::Token { token } => {
                if TokenizationService::validate_token(&token) {
                    Ok(token)
                } else {
                    Err(ServiceError::ValidationError(
                        "payment token is not recognised".to_string(),
                    ))
                }
            }
        }
    }

    /// Applies `next` in memory and in storage, conditional on the stored
    /// status still matching.
    async fn move_status(
        &self,
        ctx: &TraceContext,
        order: &mut Order,
        next: OrderStatus,
    ) -> Result<(), ServiceError> {
        let from = order.status();
        order.transition_to(next)?;
        if !OrderRepository::update_status_if(self.db.as_ref(), order.id, from, next).await? {
            return Err(self.lost_race(order.id, from, next).await);
        }
        self.status_changed(ctx, order.id, from, next).await;
        Ok(())
    }

    async fn status_changed(
        &self,
        ctx: &TraceContext,
        order_id: Uuid,
        from: OrderStatus,
        next: OrderStatus,
    ) {
        info!(order_id = %order_id, from = %from, to = %next, "order status changed");
        self.emit(
            ctx,
            NewAuditEvent::new(AuditEventType::OrderStatusChanged, "Order", order_id)
                .with_data(json!({ "from": from, "to": next })),
        )
        .await;
    }

    async fn lost_race(&self, order_id: Uuid, expected: OrderStatus, next: OrderStatus) -> ServiceError {
        let actual = match self.orders.find_by_id(order_id).await {
            Ok(Some(order)) => order.status().to_string(),
            Ok(None) => return ServiceError::not_found("Order", order_id),
            Err(_) => expected.to_string(),
        };
        warn!(order_id = %order_id, expected = %expected, actual = %actual, "concurrent status change");
        ServiceError::InvalidStateTransition {
            order_id,
            from: actual,
            to: next.to_string(),
        }
    }

    async fn notify(&self, ctx: &TraceContext, order: &Order, notice: PaymentNotice) {
        let customer = match self.customers.find_by_id(order.customer_id).await {
            Ok(Some(customer)) => customer,
            Ok(None) => {
                warn!(order_id = %order.id, "no customer to notify");
                return;
            }
            Err(e) => {
                error!(order_id = %order.id, error = %e, "could not load customer for notification");
                return;
            }
        };
        self.notifications
            .dispatch_payment_notice(
                ctx,
                Recipient {
                    email: customer.email,
                    name: customer.name,
                },
                order.id,
                order.total_amount(),
                notice,
            )
            .await;
    }

    async fn emit(&self, ctx: &TraceContext, event: NewAuditEvent) {
        if let Err(e) = self.audit.record(ctx, event).await {
            error!(error = %e, "failed to write order audit record");
        }
    }
}

fn validate_lines(lines: &[OrderLine]) -> Result<(), ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::ValidationError(
            "an order needs at least one item".to_string(),
        ));
    }
    if let Some(line) = lines.iter().find(|line| line.quantity == 0) {
        return Err(ServiceError::ValidationError(format!(
            "quantity for product {} must be greater than zero",
            line.product_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn rejects_empty_and_zero_quantity_lines() {
        assert_matches!(validate_lines(&[]), Err(ServiceError::ValidationError(_)));
        let line = OrderLine {
            product_id: Uuid::new_v4(),
            quantity: 0,
        };
        assert_matches!(validate_lines(&[line]), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn payment_method_is_tagged() {
        let method: PaymentMethod = serde_json::from_value(json!({
            "type": "stored_card",
            "card_id": Uuid::nil(),
        }))
        .unwrap();
        assert_matches!(method, PaymentMethod::StoredCard { card_id } if card_id.is_nil());

        let method: PaymentMethod = serde_json::from_value(json!({
            "type": "new_card",
            "customer_id": Uuid::nil(),
            "card_number": "4532015112830366",
            "cvv": "123",
            "expiration_date": "12/30",
            "cardholder_name": "Ada Lovelace",
        }))
        .unwrap();
        assert_matches!(method, PaymentMethod::NewCard(_));
    }
}
