use axum::{
    extract::{Extension, Path, State},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::common::{created_response, success_response, validate_input};
use crate::errors::ServiceError;
use crate::services::orders::{CreateOrder, OrderLine, PaymentMethod};
use crate::tracing::TraceContext;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct OrderLineRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub items: Vec<OrderLineRequest>,
    #[validate(length(max = 500))]
    pub delivery_address: Option<String>,
}

/// Create a PENDING order and reserve its stock
pub async fn create_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;
    for item in &request.items {
        validate_input(item)?;
    }

    let order = state
        .services
        .orders
        .place_order(
            &ctx,
            CreateOrder {
                customer_id: request.customer_id,
                items: request
                    .items
                    .iter()
                    .map(|item| OrderLine {
                        product_id: item.product_id,
                        quantity: item.quantity,
                    })
                    .collect(),
                delivery_address: request.delivery_address,
            },
            false,
        )
        .await?;
    Ok(created_response(order))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(success_response(order))
}

/// Pay for a PENDING order with a new card, a stored card or a token
pub async fn process_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Path(id): Path<Uuid>,
    Json(method): Json<PaymentMethod>,
) -> Result<Response, ServiceError> {
    if let PaymentMethod::NewCard(card) = &method {
        validate_input(card)?;
    }
    let receipt = state
        .services
        .orders
        .process_payment(&ctx, id, method)
        .await?;
    Ok(success_response(receipt))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.cancel_order(&ctx, id).await?;
    Ok(success_response(order))
}

/// A customer's orders, newest first
pub async fn list_customer_orders(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let orders = state
        .services
        .orders
        .orders_for_customer(customer_id)
        .await?;
    Ok(success_response(orders))
}
